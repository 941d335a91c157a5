//! Speed measurement collaborator.
//!
//! The scheduler only sees [`SpeedMeasurement`]: one blocking call that
//! yields both rates or fails. Every failure is handled the same way, so
//! the error variants exist for narration rather than branching.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpSpeedTester;
pub use mock::MockSpeedTester;

/// Rates produced by a successful measurement, in Mbps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

/// Errors from a speed measurement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasurementError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Data format error: {message}")]
    Format { message: String },

    #[error("Measurement timed out")]
    Timeout,

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },
}

impl MeasurementError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format { message: message.into() }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable { message: message.into() }
    }
}

/// Trait for throughput measurement backends.
#[async_trait]
pub trait SpeedMeasurement {
    /// Run one full download + upload measurement.
    async fn measure(&self) -> Result<SpeedSample, MeasurementError>;

    /// Name of this backend for logging.
    fn name(&self) -> &str;
}

/// Convert a byte count transferred over `secs` seconds into Mbps.
pub fn mbps(bytes: u64, secs: f64) -> f64 {
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / secs / 1_000_000.0
}
