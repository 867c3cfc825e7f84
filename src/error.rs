//! Custom error types for the station.
//!
//! This module defines the two error types used across the crate. Both are built with
//! `thiserror` and are kept deliberately separate:
//!
//! - **`FrameError`**: everything that can go wrong during a single particulate read
//!   attempt. Checksum mismatches and frame timeouts are *recoverable*; the reader loop
//!   retries them forever. An I/O failure on the open port is not.
//! - **`StationError`**: resource, configuration and storage errors. These are reported
//!   once to the owning task's supervisor (or to `main`) and are never retried
//!   automatically.
//!
//! ## Error Hierarchy
//!
//! - **`SerialOpen`**: the particulate sensor's port could not be opened. Fatal to the
//!   particulate task only; every other sampler keeps running.
//! - **`Gpio`** / **`Sensor`**: a hardware capability refused a request.
//! - **`Config`** / **`Configuration`**: file or environment parsing errors and semantic
//!   validation errors respectively.
//! - **`Io`** / **`Csv`**: persistence failures.
//! - **`Frame`**: a non-recoverable `FrameError` escaping the particulate reader.
//! - **`TaskPanicked`** / **`TaskAborted`** / **`ShutdownFailed`**: supervisor-level outcomes.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the station error type.
pub type AppResult<T> = std::result::Result<T, StationError>;

/// Outcome of a failed particulate frame read attempt.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Frame arrived whole but its checksum did not match
    #[error("Checksum failure: received {received:#04x}, calculated {calculated:#04x}")]
    Checksum {
        /// Checksum byte carried by the frame.
        received: u8,
        /// Checksum computed over the six payload bytes.
        calculated: u8,
    },

    /// No complete frame before the deadline
    #[error("No message received within {0:?}")]
    NoData(Duration),

    /// The port failed or reached end of file
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the reader loop may simply try again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Checksum { .. } | FrameError::NoData(_))
    }
}

/// Resource, configuration and storage errors.
#[derive(Error, Debug)]
pub enum StationError {
    /// Figment could not load or extract the configuration
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed semantic validation
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure while opening or writing a log
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Particulate sensor port could not be opened
    #[error("Failed to open serial port {port}: {reason}")]
    SerialOpen {
        /// Device path that was requested.
        port: String,
        /// Underlying failure.
        reason: String,
    },

    /// Built without the `serial` feature
    #[error("Serial support not enabled. Rebuild with --features serial")]
    SerialFeatureDisabled,

    /// A GPIO request was refused
    #[error("GPIO error on pin {pin}: {reason}")]
    Gpio {
        /// BCM pin number.
        pin: u8,
        /// Underlying failure.
        reason: String,
    },

    /// The environmental sensor failed to produce a sample
    #[error("Environmental sensor error: {0}")]
    Sensor(String),

    /// Non-recoverable frame reader failure
    #[error("Particulate reader error: {0}")]
    Frame(#[from] FrameError),

    /// A supervised task panicked
    #[error("Task '{0}' panicked")]
    TaskPanicked(String),

    /// A supervised task missed the shutdown deadline and was aborted
    #[error("Task '{0}' did not stop in time and was aborted")]
    TaskAborted(String),

    /// One or more tasks ended badly
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<StationError>),
}

impl From<figment::Error> for StationError {
    fn from(value: figment::Error) -> Self {
        StationError::Config(Box::new(value))
    }
}

impl StationError {
    /// Whether the error came from a hardware resource that could not be acquired.
    ///
    /// Resource errors end the owning task; the scheduler never retries them.
    pub fn is_resource_fatal(&self) -> bool {
        matches!(
            self,
            StationError::SerialOpen { .. }
                | StationError::SerialFeatureDisabled
                | StationError::Gpio { .. }
                | StationError::Frame(FrameError::Io(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_and_timeout_are_recoverable() {
        assert!(FrameError::Checksum {
            received: 0x10,
            calculated: 0x11
        }
        .is_recoverable());
        assert!(FrameError::NoData(Duration::from_secs(1)).is_recoverable());
    }

    #[test]
    fn io_failure_is_not_recoverable() {
        let err = FrameError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(!err.is_recoverable());

        let station: StationError = err.into();
        assert!(station.is_resource_fatal());
    }

    #[test]
    fn serial_open_failure_is_resource_fatal() {
        let err = StationError::SerialOpen {
            port: "/dev/ttyUSB0".into(),
            reason: "No such file or directory".into(),
        };
        assert!(err.is_resource_fatal());
        assert!(err.to_string().contains("/dev/ttyUSB0"));
        assert!(!StationError::Sensor("bus busy".into()).is_resource_fatal());
    }

    #[test]
    fn aborted_task_is_not_a_configuration_error() {
        let err = StationError::TaskAborted("logger".into());
        assert_eq!(err.to_string(), "Task 'logger' did not stop in time and was aborted");
        assert!(!err.is_resource_fatal());
    }

    #[test]
    fn checksum_message_shows_both_bytes() {
        let err = FrameError::Checksum {
            received: 0x0a,
            calculated: 0xff,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x0a"));
        assert!(msg.contains("0xff"));
    }
}
