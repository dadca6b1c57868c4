//! SPI-NOR part model
//!
//! A [`NorPart`] is the merged view of everything known about one flash
//! model: database entry fields, SFDP-derived fields, and vendor defaults.
//! Probe fills one of these, then the core derives its steady state from it.

use crate::id::FlashId;
use crate::spi::opcodes;
use crate::spi::{IoCaps, IoType};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Default page size when neither database nor SFDP declares one
pub const DFL_PAGE_SIZE: u32 = 256;
/// Default page-program timeout
pub const DFL_PP_TIME_MS: u32 = 1000;
/// Default per-erase-type timeout
pub const DFL_ERASE_TIME_MS: u32 = 2500;

/// One erase flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseEntry {
    /// Erase opcode
    pub opcode: u8,
    /// Erase size in bytes (power of two)
    pub size: u32,
    /// Worst-case completion time
    #[serde(default = "default_erase_ms")]
    pub max_ms: u32,
}

fn default_erase_ms() -> u32 {
    DFL_ERASE_TIME_MS
}

/// Up to four erase flavors, ordered by the database/SFDP declaration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseInfo {
    /// Declared entries
    #[serde(default)]
    pub entries: [Option<EraseEntry>; 4],
}

impl EraseInfo {
    /// Iterate declared entries
    pub fn iter(&self) -> impl Iterator<Item = &EraseEntry> {
        self.entries.iter().flatten()
    }

    /// Whether any erase flavor is declared
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_none())
    }

    /// Add an entry into the first free slot
    pub fn add(&mut self, entry: EraseEntry) {
        if let Some(slot) = self.entries.iter_mut().find(|e| e.is_none()) {
            *slot = Some(entry);
        }
    }

    /// Find the entry for an exact size
    pub fn entry_for_size(&self, size: u32) -> Option<&EraseEntry> {
        self.iter().find(|e| e.size == size)
    }

    /// Bitmask over entry indices whose size divides the given region size
    pub fn mask_for_region(&self, region_size: u64) -> u8 {
        let mut mask = 0u8;
        for (i, e) in self.entries.iter().enumerate() {
            if let Some(e) = e {
                if region_size % e.size as u64 == 0 {
                    mask |= 1 << i;
                }
            }
        }
        mask
    }
}

/// Opcode plus timing for one I/O flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoOpcode {
    /// Instruction byte
    pub opcode: u8,
    /// Dummy bytes after the address
    #[serde(default)]
    pub ndummy: u8,
    /// Mode-clock bytes folded into the dummy count
    #[serde(default)]
    pub nmode: u8,
}

impl IoOpcode {
    /// Plain opcode without dummies
    pub const fn new(opcode: u8) -> Self {
        Self {
            opcode,
            ndummy: 0,
            nmode: 0,
        }
    }

    /// Opcode with dummy bytes
    pub const fn with_dummy(opcode: u8, ndummy: u8) -> Self {
        Self {
            opcode,
            ndummy,
            nmode: 0,
        }
    }
}

/// Per-[`IoType`] opcode map for one addressing width
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoOpcodeSet {
    entries: [Option<IoOpcode>; 18],
}

impl IoOpcodeSet {
    /// Look up the opcode for a type
    pub fn get(&self, io: IoType) -> Option<IoOpcode> {
        self.entries[io as usize]
    }

    /// Set the opcode for a type
    pub fn set(&mut self, io: IoType, op: IoOpcode) {
        self.entries[io as usize] = Some(op);
    }

    /// Remove the opcode for a type
    pub fn clear(&mut self, io: IoType) {
        self.entries[io as usize] = None;
    }

    /// The capability set covered by this table
    pub fn caps(&self) -> IoCaps {
        let mut caps = IoCaps::empty();
        for io in IoType::ALL {
            if self.entries[io as usize].is_some() {
                caps |= io.cap();
            }
        }
        caps
    }

    /// Default 3-byte-address read opcodes every SPI-NOR understands
    /// (FAST_READ with its 8 dummy clocks)
    pub fn default_read_3b() -> Self {
        let mut set = Self::default();
        set.set(IoType::Io1_1_1, IoOpcode::with_dummy(opcodes::FAST_READ, 8));
        set
    }

    /// Default 3-byte-address page-program opcodes
    pub fn default_pp_3b() -> Self {
        let mut set = Self::default();
        set.set(IoType::Io1_1_1, IoOpcode::new(opcodes::PP));
        set
    }
}

/// Quad-Enable flavor (SFDP BFPT DW15 taxonomy)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QeType {
    /// No QE bit, or quad works regardless
    #[default]
    DontCare,
    /// QE is SR2 bit 1, written through a 2-byte WRSR (01h)
    Sr2Bit1WrSr1,
    /// QE is SR1 bit 6
    Sr1Bit6,
    /// QE is SR2 bit 7
    Sr2Bit7,
    /// QE is SR2 bit 1, written through the dedicated SR2 opcode (31h)
    Sr2Bit1,
}

/// QPI entry flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QpiEnType {
    /// Part has no QPI mode
    #[default]
    None,
    /// 38h
    Op38h,
    /// Set QE first, then 38h
    QeOp38h,
    /// 35h
    Op35h,
}

/// QPI exit flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QpiDisType {
    /// Part has no QPI mode
    #[default]
    None,
    /// FFh
    OpFfh,
    /// F5h
    OpF5h,
    /// Soft reset 66h + 99h
    Op66h99h,
}

/// 4-byte addressing entry flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum A4bEnType {
    /// No 4-byte mode switch (3-byte only part)
    #[default]
    None,
    /// B7h
    OpB7h,
    /// WREN then B7h
    WrenB7h,
    /// Extended address register carries the high byte
    Ear,
    /// Bank register carries the high byte
    Bank,
    /// Part has a dedicated 4-byte opcode set; no mode switch needed
    Opcode4b,
    /// Part always runs with 4-byte addresses
    Always,
}

/// 4-byte addressing exit flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum A4bDisType {
    /// Nothing to exit
    #[default]
    None,
    /// E9h
    OpE9h,
    /// WREN then E9h
    WrenE9h,
    /// Clear the extended address register
    Ear,
    /// Clear the bank register
    Bank,
    /// Soft reset 66h + 99h
    SoftReset,
}

bitflags! {
    /// Soft-reset sequences the part supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SoftResetFlags: u32 {
        /// Drive 0xF on all four I/O lines for 8 clocks
        const DRIVE_4IO_FH_8CLKS = 1 << 0;
        /// Same, 10 clocks when in 4-byte mode
        const DRIVE_4IO_FH_10CLKS_4B = 1 << 1;
        /// Same, 16 clocks
        const DRIVE_4IO_FH_16CLKS = 1 << 2;
        /// Single-opcode F0h reset
        const OP_F0H = 1 << 3;
        /// 66h + 99h reset sequence
        const OP_66H_99H = 1 << 4;
    }
}

bitflags! {
    /// Part-level flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NorFlags: u32 {
        /// Do not attempt SFDP on this part
        const NO_SFDP = 1 << 0;
        /// SFDP must be read with 4-byte addressing
        const SFDP_4B_MODE = 1 << 1;
        /// Status register is volatile
        const SR_VOLATILE = 1 << 2;
        /// Part exposes a unique ID via 4Bh
        const UNIQUE_ID = 1 << 3;
        /// Always select 4-byte mode regardless of size
        const ALWAYS_4B = 1 << 4;
    }
}

/// OTP window geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpInfo {
    /// Index of the first OTP region
    pub start_index: u32,
    /// Number of OTP regions
    pub count: u32,
    /// Region size in bytes
    pub size: u32,
}

/// A write-protect range selectable through the SR block-protect field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WpRange {
    /// First protected byte
    pub base: u64,
    /// Length of the protected range
    pub size: u64,
}

/// One BP-field value and the range it selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WpEntry {
    /// Value of the block-protect field
    pub sr_val: u8,
    /// Protected range (`size == 0` = nothing protected)
    pub base: u64,
    /// Protected size
    pub size: u64,
}

/// The part's write-protect table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WpInfo {
    /// Bit shift of the BP field in the (SR|CR<<8) register pair
    pub shift: u32,
    /// Field mask before shifting
    pub mask: u8,
    /// Selectable ranges
    pub entries: Vec<WpEntry>,
}

/// Everything known about one part after probe
#[derive(Debug, Clone, Default)]
pub struct NorPart {
    /// Display model name
    pub model: String,
    /// Display vendor name
    pub vendor: String,
    /// Matching ID
    pub id: FlashId,
    /// Total size in bytes
    pub size: u64,
    /// Number of dies sharing the CS
    pub ndies: u32,
    /// Program page size
    pub page_size: u32,
    /// Page-program worst-case time
    pub max_pp_time_ms: u32,
    /// Part flags
    pub flags: NorFlags,
    /// Vendor-private flags
    pub vendor_flags: u32,
    /// Highest supported clock (0 = unlimited)
    pub max_speed: u32,

    /// Read opcode tables
    pub read_3b: IoOpcodeSet,
    /// 4-byte-address read opcode table
    pub read_4b: IoOpcodeSet,
    /// Page-program opcode tables
    pub pp_3b: IoOpcodeSet,
    /// 4-byte-address page-program opcode table
    pub pp_4b: IoOpcodeSet,
    /// 3-byte-address erase flavors
    pub erase_3b: EraseInfo,
    /// 4-byte-address erase flavors
    pub erase_4b: EraseInfo,

    /// Quad-Enable flavor
    pub qe_type: QeType,
    /// QPI entry flavor
    pub qpi_en: QpiEnType,
    /// QPI exit flavor
    pub qpi_dis: QpiDisType,
    /// 4-byte-address entry flavor
    pub a4b_en: A4bEnType,
    /// 4-byte-address exit flavor
    pub a4b_dis: A4bDisType,
    /// Soft-reset sequences
    pub soft_reset: SoftResetFlags,

    /// OTP window geometry, when the part has one
    pub otp: Option<OtpInfo>,
    /// Write-protect table, when the part declares one
    pub wp: Option<WpInfo>,
}

impl NorPart {
    /// Minimal part with library defaults applied
    pub fn blank() -> Self {
        NorPart {
            page_size: DFL_PAGE_SIZE,
            max_pp_time_ms: DFL_PP_TIME_MS,
            ndies: 1,
            read_3b: IoOpcodeSet::default_read_3b(),
            pp_3b: IoOpcodeSet::default_pp_3b(),
            ..Default::default()
        }
    }

    /// Read capability set across both address widths
    pub fn read_caps(&self) -> IoCaps {
        self.read_3b.caps() | self.read_4b.caps()
    }
}
