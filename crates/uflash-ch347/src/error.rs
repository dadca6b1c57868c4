//! CH347 backend error type

use thiserror::Error;

/// Errors raised while talking to a CH347
#[derive(Debug, Error)]
pub enum Ch347Error {
    /// No matching USB device present
    #[error("no CH347 device found")]
    DeviceNotFound,
    /// The device exists but could not be opened
    #[error("failed to open CH347: {0}")]
    OpenFailed(String),
    /// The SPI interface could not be claimed
    #[error("failed to claim CH347 interface: {0}")]
    ClaimFailed(String),
    /// A bulk transfer failed
    #[error("CH347 transfer failed: {0}")]
    TransferFailed(String),
    /// The device answered with a malformed frame
    #[error("CH347 protocol error: {0}")]
    Protocol(String),
}

impl From<Ch347Error> for uflash_core::Error {
    fn from(e: Ch347Error) -> Self {
        match e {
            Ch347Error::DeviceNotFound => uflash_core::Error::DeviceNotFound,
            other => uflash_core::Error::Io(other.to_string()),
        }
    }
}

/// Backend-local result alias
pub type Result<T> = core::result::Result<T, Ch347Error>;
