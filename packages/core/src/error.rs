use thiserror::Error;

use crate::measurement::MeasurementError;

/// Unified application error.
///
/// Configuration problems are fatal at startup. Everything else is scoped
/// to the cycle that hit it: the scheduler reports it and re-arms.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Log I/O error: {0}")]
    LogIo(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Measurement error: {0}")]
    Measurement(#[from] MeasurementError),
}
