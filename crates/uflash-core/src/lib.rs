//! uflash-core - Core library for SPI flash programming
//!
//! This crate provides the controller contract, the SPI / SPI-MEM bus
//! abstraction with adaptive transfer packing, the SPI-NOR probe-and-
//! configure engine (JEDEC/SFDP, I/O-mode negotiation, addressing modes,
//! erase planning, write protection, OTP), and the JSON device database.
//!
//! SPI-NAND support builds on top of this crate; controller backends
//! implement [`controller::SpiController`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bus;
pub mod controller;
pub mod db;
pub mod error;
pub mod id;
pub mod nor;
pub mod spi;

pub use bus::SpiBus;
pub use controller::{ControllerCaps, SpiController, Xfer, XferBuf};
pub use db::{Environment, NorDatabase};
pub use error::{Error, Result};
pub use id::FlashId;
pub use nor::SpiNor;
