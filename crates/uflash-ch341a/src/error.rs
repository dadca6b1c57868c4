//! CH341A backend error type

use thiserror::Error;

/// Errors raised while talking to a CH341A
#[derive(Debug, Error)]
pub enum Ch341aError {
    /// No matching USB device present
    #[error("no CH341A device found")]
    DeviceNotFound,
    /// The device exists but could not be opened
    #[error("failed to open CH341A: {0}")]
    OpenFailed(String),
    /// The SPI interface could not be claimed
    #[error("failed to claim CH341A interface: {0}")]
    ClaimFailed(String),
    /// A bulk transfer failed
    #[error("CH341A transfer failed: {0}")]
    TransferFailed(String),
}

impl From<Ch341aError> for uflash_core::Error {
    fn from(e: Ch341aError) -> Self {
        match e {
            Ch341aError::DeviceNotFound => uflash_core::Error::DeviceNotFound,
            other => uflash_core::Error::Io(other.to_string()),
        }
    }
}

/// Backend-local result alias
pub type Result<T> = core::result::Result<T, Ch341aError>;
