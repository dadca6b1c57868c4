//! Error types for uflash-core
//!
//! One error enum is the universal result carrier for the whole stack. Each
//! variant maps to a stable numeric status code (see [`Error::code`]) so that
//! scripting front-ends observe the same taxonomy across releases.
//!
//! "Success with warning" outcomes (a read whose ECC engine corrected
//! bitflips) are NOT errors; those travel as data next to the payload.

use thiserror::Error;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// Generic failure
    #[error("operation failed")]
    Fail,
    /// An argument was out of the accepted domain
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// The operation is not supported by the device or controller
    #[error("operation not supported")]
    Unsupported,
    /// An object with the same identity already exists
    #[error("already exists")]
    AlreadyExist,
    /// The requested object does not exist
    #[error("does not exist")]
    NotExist,
    /// A bounded wait elapsed
    #[error("operation timed out")]
    Timeout,
    /// Bus/device lock could not be taken
    #[error("failed to lock device")]
    LockFail,

    // File / database errors
    /// A database or configuration file could not be read
    #[error("file error: {0}")]
    File(String),
    /// A database or configuration file could not be parsed
    #[error("JSON error: {0}")]
    Json(String),
    /// A mandatory controller capability or method is missing
    #[error("controller is missing a mandatory capability: {0}")]
    MissingSymbol(&'static str),

    // Device errors
    /// Connection descriptor is missing
    #[error("device configuration missing")]
    MissingConfig,
    /// Connection descriptor is malformed
    #[error("invalid device configuration: {0}")]
    InvalidConfig(String),
    /// No matching device found
    #[error("device not found")]
    DeviceNotFound,
    /// Device disappeared mid-session
    #[error("device disconnected")]
    Disconnected,
    /// Transfer-level I/O failure
    #[error("device I/O error: {0}")]
    Io(String),
    /// Transfer cancelled by request
    #[error("device I/O cancelled")]
    IoCancelled,

    // Flash errors
    /// Operation requires a probed chip
    #[error("flash chip not probed")]
    NotProbed,
    /// The probed ID does not match the requested part
    #[error("flash part mismatch")]
    PartMismatch,
    /// The probed ID matches no database entry and SFDP is unusable
    #[error("flash part not recognised")]
    PartNotRecognised,
    /// Several parts match and the caller must choose
    #[error("flash part not specified")]
    PartNotSpecified,
    /// Address or range beyond the chip
    #[error("address out of range")]
    AddressOutOfRange,
    /// The chip reported a program failure
    #[error("program operation failed")]
    ProgramFailed,
    /// The chip reported an erase failure
    #[error("erase operation failed")]
    EraseFailed,

    /// Read-back comparison failed
    #[error("data verification failed")]
    VerificationFail,

    /// ECC could not reconstruct the data
    #[error("uncorrectable ECC error")]
    EccUncorrectable,
}

impl Error {
    /// Stable numeric status code for scripting front-ends.
    pub fn code(&self) -> u32 {
        match self {
            Error::Fail => 1,
            Error::InvalidParameter(_) => 2,
            Error::Unsupported => 3,
            Error::AlreadyExist => 5,
            Error::NotExist => 6,
            Error::Timeout => 7,
            Error::LockFail => 100,
            Error::File(_) => 200,
            Error::Json(_) => 300,
            Error::MissingSymbol(_) => 400,
            Error::MissingConfig => 500,
            Error::InvalidConfig(_) => 501,
            Error::DeviceNotFound => 502,
            Error::Disconnected => 503,
            Error::Io(_) => 504,
            Error::IoCancelled => 505,
            Error::NotProbed => 600,
            Error::PartMismatch => 601,
            Error::PartNotRecognised => 602,
            Error::PartNotSpecified => 603,
            Error::AddressOutOfRange => 604,
            Error::ProgramFailed => 605,
            Error::EraseFailed => 606,
            Error::VerificationFail => 800,
            Error::EccUncorrectable => 901,
        }
    }
}

/// Result type alias using the core error type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Fail.code(), 1);
        assert_eq!(Error::LockFail.code(), 100);
        assert_eq!(Error::NotProbed.code(), 600);
        assert_eq!(Error::VerificationFail.code(), 800);
        assert_eq!(Error::EccUncorrectable.code(), 901);
    }
}
