//! Webhook alert delivery.
//!
//! POSTs a JSON notification to a single configured URL whenever a
//! measurement breaches the threshold. Delivery runs on a detached task;
//! the outcome is logged and never reaches the scheduler.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::alerts::{alert_lifetime, AlertEvent, AlertSink};
use crate::error::AppError;

/// Upper bound on a single webhook POST.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON body sent to the webhook target.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    /// Human-readable alert text.
    pub message: String,
    /// Local wall-clock time of the measurement, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub threshold: f64,
    /// Seconds the receiver should display the alert; absent means until
    /// dismissed.
    pub expires_in_seconds: Option<u64>,
}

#[derive(Clone)]
pub struct WebhookAlertSink {
    webhook_url: String,
    lifetime: Option<Duration>,
    http: Client,
}

impl WebhookAlertSink {
    pub fn new(webhook_url: impl Into<String>, pop_life: i64) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|err| AppError::Config(format!("webhook client: {}", err)))?;

        Ok(Self {
            webhook_url: webhook_url.into(),
            lifetime: alert_lifetime(pop_life),
            http,
        })
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    pub fn payload_for(&self, event: &AlertEvent) -> AlertPayload {
        AlertPayload {
            message: event.message(),
            timestamp: event.formatted_timestamp(),
            download_mbps: event.download_mbps,
            upload_mbps: event.upload_mbps,
            threshold: event.threshold,
            expires_in_seconds: self.lifetime.map(|d| d.as_secs()),
        }
    }
}

impl AlertSink for WebhookAlertSink {
    fn notify(&self, event: AlertEvent) {
        let payload = self.payload_for(&event);
        let http = self.http.clone();
        let url = self.webhook_url.clone();

        tokio::spawn(async move {
            match http.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!("Speed alert delivered to {}", url);
                }
                Ok(response) => {
                    tracing::error!(
                        "Webhook {} rejected speed alert with HTTP {}",
                        url,
                        response.status()
                    );
                }
                Err(err) => {
                    tracing::error!("Failed to deliver speed alert to {}: {}", url, err);
                }
            }
        });
    }
}
