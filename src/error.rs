//! Error types shared across the crate.
//!
//! Each collaborator gets its own enum so callers can match on exactly what
//! went wrong; the orchestrator folds them into [`Error`] and uses
//! [`Error::is_fatal`] to decide whether the loop keeps going.
//!
//! ## Rust concepts
//! - `thiserror` derives `Display` and `std::error::Error` from attributes
//! - `#[from]` generates `From` impls so `?` converts errors automatically

use crate::metrics::MetricKind;
use std::path::PathBuf;
use thiserror::Error;

/// A sensor could not produce a reading.
///
/// Recovered locally: the orchestrator substitutes a synthetic value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("{metric} sensor unavailable: {reason}")]
    Unavailable { metric: MetricKind, reason: String },
}

impl SensorError {
    pub fn unavailable(metric: MetricKind, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            metric,
            reason: reason.into(),
        }
    }
}

/// Lookups against the [`SensorDataStore`](crate::metrics::SensorDataStore).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    /// The series was constructed without pre-filling. Should be unreachable.
    #[error("metric buffer is empty: {0}")]
    EmptyBuffer(MetricKind),
}

/// Failures talking to the LED output device.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("LED device I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("LED device not found: {0}")]
    NotFound(String),
    #[error("frame is {actual}x{actual} pixels, device expects {expected}x{expected}")]
    FrameSize { expected: u32, actual: u32 },
    #[error("LED matrix initialization failed: {0}")]
    Init(String),
}

/// Problems reading or validating `settings.toml` and CLI overrides.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("ROTATION must be 0, 90, 180 or 270 (got {0})")]
    InvalidRotation(u16),
    #[error("DISPLAY must be 0 (readout) or 1 (progress) (got {0})")]
    InvalidDisplayMode(usize),
    #[error("CAPACITY must be at least 1")]
    InvalidCapacity,
    #[error("METRICS lists unknown metric {0:?}")]
    UnknownMetric(String),
    #[error("METRICS must name at least one metric")]
    NoMetrics,
    #[error("{key} must be at most {max} seconds (got {value})")]
    OutOfRange {
        key: &'static str,
        value: f64,
        max: u64,
    },
}

/// Anything that can go wrong inside one orchestrator iteration.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Sensor(#[from] SensorError),
}

impl Error {
    /// Store errors are programmer errors or broken invariants; everything
    /// else is logged and the loop moves on to the next iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_fatal() {
        let err: Error = StoreError::UnknownMetric("wind".into()).into();
        assert!(err.is_fatal());

        let err: Error = StoreError::EmptyBuffer(MetricKind::Pressure).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn driver_and_sensor_errors_are_recoverable() {
        let err: Error = DriverError::NotFound("fb".into()).into();
        assert!(!err.is_fatal());

        let err: Error = SensorError::unavailable(MetricKind::Humidity, "no device").into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn sensor_error_message_names_metric() {
        let err = SensorError::unavailable(MetricKind::Temperature, "read failed");
        assert_eq!(
            err.to_string(),
            "temperature sensor unavailable: read failed"
        );
    }
}
