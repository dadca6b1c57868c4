//! uflash-ch341a - CH341A USB bridge backend
//!
//! Drives the WCH CH341A's SPI pin mux through its bulk endpoints. The
//! bridge is single-wire only and has a small set of fixed clock steps;
//! everything else the core needs is synthesized by the bus layer from the
//! generic transfer primitive implemented here.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod device;
mod error;
mod protocol;

pub use device::{Ch341a, Ch341aDeviceInfo};
pub use error::Ch341aError;
