//! SPI-NOR opcode constants
//!
//! Standardized JEDEC opcodes plus the 4-byte-addressing variants. Values are
//! bit-exact; never synthesize these from arithmetic.

/// Write enable
pub const WREN: u8 = 0x06;
/// Write disable
pub const WRDI: u8 = 0x04;
/// Volatile SR write enable
pub const VOLATILE_WREN: u8 = 0x50;

/// Read JEDEC ID
pub const RDID: u8 = 0x9F;
/// Read JEDEC ID, multi-I/O (chips in QPI answer this one)
pub const RDID_MULTI: u8 = 0xAF;
/// Read unique ID
pub const RDUID: u8 = 0x4B;
/// Read SFDP
pub const RDSFDP: u8 = 0x5A;

/// Read data, 3-byte address
pub const READ: u8 = 0x03;
/// Fast read
pub const FAST_READ: u8 = 0x0B;
/// Fast read dual output
pub const READ_1_1_2: u8 = 0x3B;
/// Fast read dual I/O
pub const READ_1_2_2: u8 = 0xBB;
/// Fast read quad output
pub const READ_1_1_4: u8 = 0x6B;
/// Fast read quad I/O
pub const READ_1_4_4: u8 = 0xEB;

/// Read data, 4-byte address
pub const READ_4B: u8 = 0x13;
/// Fast read, 4-byte address
pub const FAST_READ_4B: u8 = 0x0C;
/// Fast read dual output, 4-byte address
pub const READ_1_1_2_4B: u8 = 0x3C;
/// Fast read dual I/O, 4-byte address
pub const READ_1_2_2_4B: u8 = 0xBC;
/// Fast read quad output, 4-byte address
pub const READ_1_1_4_4B: u8 = 0x6C;
/// Fast read quad I/O, 4-byte address
pub const READ_1_4_4_4B: u8 = 0xEC;

/// Page program
pub const PP: u8 = 0x02;
/// Quad-input page program
pub const PP_1_1_4: u8 = 0x32;
/// Quad-I/O page program
pub const PP_1_4_4: u8 = 0x38;
/// Page program, 4-byte address
pub const PP_4B: u8 = 0x12;
/// Quad-input page program, 4-byte address
pub const PP_1_1_4_4B: u8 = 0x34;

/// 4 KiB sector erase
pub const SE_4K: u8 = 0x20;
/// 32 KiB block erase
pub const BE_32K: u8 = 0x52;
/// 64 KiB block erase
pub const BE_64K: u8 = 0xD8;
/// Chip erase
pub const CE: u8 = 0xC7;
/// 4 KiB sector erase, 4-byte address
pub const SE_4K_4B: u8 = 0x21;
/// 32 KiB block erase, 4-byte address
pub const BE_32K_4B: u8 = 0x5C;
/// 64 KiB block erase, 4-byte address
pub const BE_64K_4B: u8 = 0xDC;

/// Read status register 1
pub const RDSR: u8 = 0x05;
/// Write status register 1
pub const WRSR: u8 = 0x01;
/// Read status register 2 (configuration register)
pub const RDCR: u8 = 0x35;
/// Write status register 2 directly
pub const WRSR2: u8 = 0x31;
/// Read status register 3
pub const RDSR3: u8 = 0x15;
/// Write status register 3
pub const WRSR3: u8 = 0x11;

/// Read extended address register
pub const RDEAR: u8 = 0xC8;
/// Write extended address register
pub const WREAR: u8 = 0xC5;
/// Read bank register
pub const RDBANK: u8 = 0x16;
/// Write bank register
pub const WRBANK: u8 = 0x17;
/// Read security register (Macronix SCUR)
pub const RDSCUR: u8 = 0x2B;
/// Write security register (Macronix SCUR)
pub const WRSCUR: u8 = 0x2F;

/// Enter 4-byte address mode
pub const EN4B: u8 = 0xB7;
/// Exit 4-byte address mode
pub const EX4B: u8 = 0xE9;

/// Enter QPI (Winbond/GigaDevice flavor)
pub const EQPI_38: u8 = 0x38;
/// Enter QPI (Micron flavor)
pub const EQPI_35: u8 = 0x35;
/// Exit QPI
pub const RSTQPI_FF: u8 = 0xFF;
/// Exit QPI (Micron flavor)
pub const RSTQPI_F5: u8 = 0xF5;

/// Reset enable
pub const RSTEN: u8 = 0x66;
/// Reset
pub const RST: u8 = 0x99;
/// Legacy single-opcode reset
pub const RST_F0: u8 = 0xF0;

/// Select die (multi-die packages)
pub const SELECT_DIE: u8 = 0xC2;

/// Winbond security register read
pub const OTP_READ: u8 = 0x48;
/// Winbond security register program
pub const OTP_PROG: u8 = 0x42;
/// Winbond security register erase
pub const OTP_ERASE: u8 = 0x44;

/// SR1 write-in-progress bit
pub const SR_BUSY: u8 = 1 << 0;
/// SR1 write-enable-latch bit
pub const SR_WEL: u8 = 1 << 1;
/// First block-protect bit in SR1
pub const SR_BP0_SHIFT: u32 = 2;

/// Bank register: 4-byte address mode flag
pub const BANK_4B_ADDR: u8 = 1 << 7;
