//! Threshold-breach alerts.
//!
//! An [`AlertEvent`] is built only when a measurement falls below the
//! configured threshold, handed to an [`AlertSink`], and dropped. Sinks are
//! fire-and-forget: `notify` returns immediately and any delivery work runs
//! on a detached task, so a slow or failing sink never holds up the
//! scheduler.

pub mod console;
pub mod webhook;

use std::time::Duration;

use chrono::NaiveDateTime;

use crate::record::{MeasurementRecord, TIMESTAMP_FORMAT};

pub use self::console::ConsoleAlertSink;
pub use self::webhook::WebhookAlertSink;

/// Transient description of a threshold breach.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub timestamp: NaiveDateTime,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub threshold: f64,
}

impl AlertEvent {
    pub fn from_record(record: &MeasurementRecord, threshold: f64) -> Self {
        Self {
            timestamp: record.timestamp,
            download_mbps: record.download_mbps,
            upload_mbps: record.upload_mbps,
            threshold,
        }
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Human-readable alert text.
    pub fn message(&self) -> String {
        format!(
            "Your speed is below {} Mbps!\n\nTimestamp: {}\nDownload Speed: {:.2} Mbps\nUpload Speed: {:.2} Mbps",
            self.threshold,
            self.formatted_timestamp(),
            self.download_mbps,
            self.upload_mbps,
        )
    }
}

/// Destination for breach alerts.
pub trait AlertSink {
    /// Issue the alert and return without waiting for delivery.
    fn notify(&self, event: AlertEvent);
}

/// How long a displayed alert should stay up. A non-positive `pop_life`
/// means it stays until dismissed externally.
pub fn alert_lifetime(pop_life: i64) -> Option<Duration> {
    u64::try_from(pop_life)
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
