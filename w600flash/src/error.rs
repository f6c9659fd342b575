//! Error types for w600flash.

use std::io;
use thiserror::Error;

/// Result type for w600flash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for w600flash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Bootloader did not respond to the handshake.
    #[error("Bootloader not responding")]
    DeviceNotFound,

    /// Boot handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Erase operation did not complete.
    #[error("Erase failed: {0}")]
    Erase(String),

    /// XMODEM transfer error.
    #[error("XMODEM error: {0}")]
    Xmodem(String),

    /// Image type is not accepted in the current boot mode.
    #[error("Image rejected: {0}")]
    ImageMode(String),

    /// Baud rate outside the set the bootloader supports.
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),
}
