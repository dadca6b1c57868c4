//! uflash-ch347 - CH347 USB bridge backend
//!
//! Drives the WCH CH347's framed vendor protocol: 0xC0 configuration, 0xC1
//! chip-select control, 0xC3/0xC4 read/write streams. Considerably faster
//! than the CH341A thanks to the 120 MHz clock tree and 510-byte frames.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod device;
mod error;
mod protocol;

pub use device::Ch347;
pub use error::Ch347Error;
pub use protocol::SpiSpeed;
