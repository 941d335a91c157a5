//! A single successful measurement and its log-line encoding.
//!
//! Each record occupies exactly one line of the log:
//!
//! ```text
//! Timestamp: 2023-06-02 14:30:00,Download Speed: 512.34 Mbps,Upload Speed: 48.10 Mbps,
//! ```
//!
//! The shape is shared with existing log consumers and must not change.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use thiserror::Error;

/// Wall-clock timestamp format used in the log and in alert messages.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TIMESTAMP_PREFIX: &str = "Timestamp: ";
const DOWNLOAD_PREFIX: &str = "Download Speed: ";
const UPLOAD_PREFIX: &str = "Upload Speed: ";
const UNIT_SUFFIX: &str = " Mbps";

/// Immutable result of one successful measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    /// Local wall-clock time the measurement finished.
    pub timestamp: NaiveDateTime,
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid rate in {field}: {value}")]
    InvalidRate { field: &'static str, value: String },
}

impl MeasurementRecord {
    pub fn new(timestamp: NaiveDateTime, download_mbps: f64, upload_mbps: f64) -> Self {
        Self {
            timestamp,
            download_mbps,
            upload_mbps,
        }
    }

    /// `true` when either rate is strictly below `threshold`.
    pub fn is_below(&self, threshold: f64) -> bool {
        self.download_mbps < threshold || self.upload_mbps < threshold
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Serialise as one log line, trailing newline included.
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for MeasurementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{},{}{:.2}{},{}{:.2}{},",
            TIMESTAMP_PREFIX,
            self.formatted_timestamp(),
            DOWNLOAD_PREFIX,
            self.download_mbps,
            UNIT_SUFFIX,
            UPLOAD_PREFIX,
            self.upload_mbps,
            UNIT_SUFFIX,
        )
    }
}

impl FromStr for MeasurementRecord {
    type Err = RecordParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.trim_end_matches(&['\r', '\n'][..]).split(',');

        let timestamp = fields
            .next()
            .and_then(|f| f.strip_prefix(TIMESTAMP_PREFIX))
            .ok_or(RecordParseError::MissingField("Timestamp"))?;
        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|_| RecordParseError::InvalidTimestamp(timestamp.to_string()))?;

        let download_mbps = parse_rate(fields.next(), DOWNLOAD_PREFIX, "Download Speed")?;
        let upload_mbps = parse_rate(fields.next(), UPLOAD_PREFIX, "Upload Speed")?;

        Ok(Self {
            timestamp,
            download_mbps,
            upload_mbps,
        })
    }
}

fn parse_rate(
    field: Option<&str>,
    prefix: &str,
    name: &'static str,
) -> Result<f64, RecordParseError> {
    let raw = field
        .and_then(|f| f.strip_prefix(prefix))
        .and_then(|f| f.strip_suffix(UNIT_SUFFIX))
        .ok_or(RecordParseError::MissingField(name))?;

    raw.trim().parse::<f64>().map_err(|_| RecordParseError::InvalidRate {
        field: name,
        value: raw.to_string(),
    })
}
