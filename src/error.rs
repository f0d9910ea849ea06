//! Custom error types for the sweep controller.
//!
//! This module defines the two error enums used across the crate. Using the
//! `thiserror` crate, it separates failures that happen on the wire (the
//! instrument session itself) from failures of the sweep logic built on top.
//!
//! ## Error Hierarchy
//!
//! - **`InstrumentError`**: Raised by an instrument adapter. A read that times out or
//!   returns garbage is a per-sample failure and is counted against the consecutive
//!   failure budget. A dropped session (`Disconnected`) is fatal to the whole run.
//! - **`SweepError`**: Raised by plan generation, acquisition and export:
//!   - **`Parse`** / **`InvalidRange`**: user input rejected before any hardware is touched.
//!   - **`AcquisitionFailed`**: too many consecutive corrupt or failed reads at one setpoint.
//!   - **`RetryTimeout`**: equilibrium or frequency match never reached inside the retry window.
//!   - **`Communication`**: the adapter reported a session-fatal failure.
//!   - **`Config`** / **`Configuration`**: configuration could not be loaded or is invalid.
//!
//! By using `#[from]`, `SweepError` can be created from the underlying error types,
//! so the `?` operator works across module boundaries.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the sweep error type.
pub type SweepResult<T> = std::result::Result<T, SweepError>;

/// Failure reported by an instrument adapter.
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// No response to the named command within the I/O timeout.
    #[error("Timed out waiting for response to '{0}'")]
    Timeout(String),

    /// Response that is not a number where one was expected.
    #[error("Malformed response to '{command}': '{response}'")]
    Malformed {
        /// Command that was sent.
        command: String,
        /// Raw response line.
        response: String,
    },

    /// Link closed or unreachable.
    #[error("Instrument disconnected: {0}")]
    Disconnected(String),

    /// Other I/O failure on the link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port failure.
    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl InstrumentError {
    /// Whether the session is unusable after this error.
    ///
    /// Fatal errors end the sweep immediately; everything else is treated as a
    /// single bad read and retried by the acquisition controller.
    pub fn is_fatal(&self) -> bool {
        match self {
            InstrumentError::Disconnected(_) => true,
            InstrumentError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            #[cfg(feature = "instrument_serial")]
            InstrumentError::Serial(err) => {
                matches!(err.kind(), serialport::ErrorKind::NoDevice)
            }
            InstrumentError::Timeout(_) | InstrumentError::Malformed { .. } => false,
        }
    }
}

/// Errors that stop a sweep or prevent one from starting.
#[derive(Error, Debug)]
pub enum SweepError {
    /// Malformed operator input.
    #[error("Could not parse '{input}': {reason}")]
    Parse {
        /// Offending text.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Plan that cannot be generated (bad bounds or count).
    #[error("Invalid sweep range: {0}")]
    InvalidRange(String),

    /// Too many consecutive bad readings at one point.
    #[error("Acquisition failed at point {index} ({setpoint}): {failures} consecutive bad readings")]
    AcquisitionFailed {
        /// Zero-based point index.
        index: usize,
        /// Commanded value at that point.
        setpoint: f64,
        /// Consecutive failures counted.
        failures: u32,
    },

    /// Point never settled within the retry window.
    #[error(
        "Point {index} ({setpoint}) did not settle within {elapsed:?} (last delta {last_delta:.2}%)"
    )]
    RetryTimeout {
        /// Zero-based point index.
        index: usize,
        /// Commanded value at that point.
        setpoint: f64,
        /// Time since the point was configured.
        elapsed: Duration,
        /// Last percent change observed.
        last_delta: f64,
    },

    /// Instrument failure that ends the session.
    #[error("Instrument communication error: {0}")]
    Communication(#[from] InstrumentError),

    /// Fine pass asked for a point the coarse pass did not range.
    #[error("Fine-scale table has {table} entries but the sweep has {points} points")]
    FineScaleUnavailable {
        /// Entries in the fine-scale table.
        table: usize,
        /// Points in the sweep.
        points: usize,
    },

    /// Configuration could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values are inconsistent.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File I/O failure while loading plans or saving results.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for SweepError {
    fn from(value: figment::Error) -> Self {
        SweepError::Config(Box::new(value))
    }
}

impl SweepError {
    /// Whether the operator can simply start another sweep after this error.
    ///
    /// Input and per-setpoint failures leave the instruments usable. A dropped
    /// session, broken configuration or a failed write needs attention first.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SweepError::Parse { .. }
            | SweepError::InvalidRange(_)
            | SweepError::AcquisitionFailed { .. }
            | SweepError::RetryTimeout { .. }
            | SweepError::FineScaleUnavailable { .. } => true,
            SweepError::Communication(err) => !err.is_fatal(),
            SweepError::Config(_) | SweepError::Configuration(_) | SweepError::Io(_) => false,
        }
    }

    /// Index of the setpoint that aborted the sweep, if any.
    pub fn setpoint_index(&self) -> Option<usize> {
        match self {
            SweepError::AcquisitionFailed { index, .. } | SweepError::RetryTimeout { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }

    pub(crate) fn parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        SweepError::Parse {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
