//! SPI-NAND opcode and feature-register constants

/// Reset
pub const RESET: u8 = 0xFF;
/// Read ID
pub const READID: u8 = 0x9F;
/// Get feature
pub const GET_FEATURE: u8 = 0x0F;
/// Set feature
pub const SET_FEATURE: u8 = 0x1F;

/// Page read to cache
pub const READ_TO_CACHE: u8 = 0x13;
/// Read from cache
pub const READ_FROM_CACHE: u8 = 0x03;
/// Fast read from cache
pub const FAST_READ_FROM_CACHE: u8 = 0x0B;
/// Read from cache, dual output
pub const READ_FROM_CACHE_X2: u8 = 0x3B;
/// Read from cache, quad output
pub const READ_FROM_CACHE_X4: u8 = 0x6B;
/// Read from cache, dual I/O
pub const READ_FROM_CACHE_DUAL_IO: u8 = 0xBB;
/// Read from cache, quad I/O
pub const READ_FROM_CACHE_QUAD_IO: u8 = 0xEB;

/// Write disable
pub const WRITE_DISABLE: u8 = 0x04;
/// Write enable
pub const WRITE_ENABLE: u8 = 0x06;
/// Program load (resets the cache to 0xFF first)
pub const PROGRAM_LOAD: u8 = 0x02;
/// Program load, quad input
pub const PROGRAM_LOAD_X4: u8 = 0x32;
/// Program execute
pub const PROGRAM_EXECUTE: u8 = 0x10;

/// Block erase
pub const BLOCK_ERASE: u8 = 0xD8;
/// Select die
pub const SELECT_DIE: u8 = 0xC2;

/// Protection feature register
pub const FEATURE_PROTECT: u8 = 0xA0;
/// Configuration feature register
pub const FEATURE_CONFIG: u8 = 0xB0;
/// Status feature register
pub const FEATURE_STATUS: u8 = 0xC0;

/// Status: operation in progress
pub const STATUS_OIP: u8 = 1 << 0;
/// Status: write enable latch
pub const STATUS_WEL: u8 = 1 << 1;
/// Status: erase failed
pub const STATUS_ERASE_FAIL: u8 = 1 << 2;
/// Status: program failed
pub const STATUS_PROGRAM_FAIL: u8 = 1 << 3;
/// Status: ECC field shift
pub const STATUS_ECC_SHIFT: u32 = 4;
/// Status: ECC field mask (2-bit flavor)
pub const STATUS_ECC_MASK: u8 = 0x3 << STATUS_ECC_SHIFT;

/// Config: quad enable
pub const CONFIG_QUAD_EN: u8 = 1 << 0;
/// Config: on-die ECC enable
pub const CONFIG_ECC_EN: u8 = 1 << 4;
/// Config: OTP area access
pub const CONFIG_OTP_EN: u8 = 1 << 6;
/// Config: OTP lock
pub const CONFIG_OTP_LOCK: u8 = 1 << 7;

/// OTP page index of the unique ID page
pub const OTP_PAGE_UID: u32 = 0;
/// OTP page index of the parameter page
pub const OTP_PAGE_PARAM: u32 = 1;
/// First OTP-proper page index
pub const OTP_PAGE_OTP: u32 = 2;

/// "ONFI" parameter-page signature
pub const ONFI_SIGNATURE: u32 = 0x49464E4F;
