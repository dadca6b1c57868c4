//! uflash-nand - SPI-NAND stack
//!
//! Page-oriented read/program/erase over the uflash-core SPI-MEM bus,
//! memory-organization math, ECC-engine binding with canonical/raw
//! page-layout conversion, bad-block-table and FTL bindings, and the
//! SPI-NAND device database.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bbt;
pub mod bitmap;
pub mod core;
pub mod db;
pub mod ecc;
pub mod ftl;
pub mod layout;
pub mod memorg;
pub mod opcodes;

pub use crate::core::{
    AccessFlags, BulkOutcome, NandChip, NandInfo, NandPart, PageStatus, SpiNand,
};
pub use bbt::{Bbt, BbtConfig, BbtState, FlashBbt, RamBbt};
pub use db::NandDatabase;
pub use ecc::{EccConfig, EccEngine, OnDieEcc, SectorEcc};
pub use ftl::{BasicFtl, FtlCallback, FtlPart, NoCallback};
pub use layout::{FillFlags, PageByteKind, PageLayout};
pub use memorg::{MemAux, Memorg};
