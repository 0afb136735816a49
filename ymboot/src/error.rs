//! Error types for ymboot.

use std::io;
use thiserror::Error;

/// Result type for ymboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ymboot operations.
///
/// Protocol classifications (a malformed packet, a rejected header) are not
/// errors; they are reported through the outcome enums of the protocol
/// modules. This type covers faults of the collaborators around the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No byte arrived within the allowed time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The flash collaborator rejected an erase or program request.
    #[error("Flash error: {0}")]
    Flash(String),

    /// The firmware image cannot be booted.
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

impl Error {
    /// Whether this error is a timeout rather than a hard fault.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
