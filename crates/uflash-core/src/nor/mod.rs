//! SPI-NOR stack: register engine, SFDP, erase planning, probe and data path

pub mod core;
pub mod erase;
pub mod otp;
pub mod part;
pub mod regs;
pub mod sfdp;
pub mod wp;

pub use self::core::{NorInfo, NorState, SpiNor};
pub use erase::EraseRegion;
pub use part::{EraseEntry, EraseInfo, IoOpcode, NorPart, OtpInfo, WpRange};
pub use regs::{RegAccess, RegFlags, RegKind};
