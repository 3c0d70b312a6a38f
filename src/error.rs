//! # Error Types
//!
//! Custom error types for the field datalogger using `thiserror`.
//!
//! The taxonomy separates what the main loop must act on:
//! - `FatalHardware` ends the loop (the modem could not be powered)
//! - `SoftFailure` falls back to the last safe modem state and skips the
//!   dependent work of the current cycle
//!
//! Everything else is an I/O flavoured failure that callers log and skip.
//! A position fix that cannot be obtained is not an error at all; it is
//! reported as `PositionOutcome::Unavailable` and resolved by a fallback.

use thiserror::Error;

/// Main error type for the field datalogger
#[derive(Debug, Error)]
pub enum LoggerError {
    /// Power-on hardware sequence failed; no automatic recovery
    #[error("Fatal hardware error: {0}")]
    FatalHardware(String),

    /// Modem acknowledgment mismatch, DHCP lease timeout and similar
    #[error("Soft failure: {0}")]
    SoftFailure(String),

    /// Serial link errors, including response timeouts
    #[error("Serial error: {0}")]
    Serial(String),

    /// No serial device could be opened
    #[error("Serial port not found (tried: {0})")]
    SerialPortNotFound(String),

    /// External process could not be run or did not finish in time
    #[error("Command error: {0}")]
    Command(String),

    /// Remote store operation failed
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Position report could not be parsed
    #[error("Malformed position report: {0}")]
    MalformedReport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoggerError {
    /// Only hardware faults are allowed to stop the sampling loop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, LoggerError::FatalHardware(_))
    }
}

/// Result type alias for the field datalogger
pub type Result<T> = std::result::Result<T, LoggerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_hardware_errors_are_fatal() {
        assert!(LoggerError::FatalHardware("gpio".into()).is_fatal());
        assert!(!LoggerError::SoftFailure("ack".into()).is_fatal());
        assert!(!LoggerError::MalformedReport("gps".into()).is_fatal());
        assert!(!LoggerError::Transfer("sftp".into()).is_fatal());
        assert!(!LoggerError::Io(std::io::Error::other("disk")).is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = LoggerError::SerialPortNotFound("/dev/ttyUSB2, /dev/ttyUSB3".into());
        assert_eq!(
            err.to_string(),
            "Serial port not found (tried: /dev/ttyUSB2, /dev/ttyUSB3)"
        );
    }
}
