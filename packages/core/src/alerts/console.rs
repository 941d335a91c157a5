use std::time::Duration;

use crate::alerts::{alert_lifetime, AlertEvent, AlertSink};

/// Surfaces alerts on the operational log in place of a desktop popup.
///
/// The alert is emitted at `warn`; when a lifetime is configured a detached
/// task notes the dismissal once it elapses.
#[derive(Debug, Clone)]
pub struct ConsoleAlertSink {
    lifetime: Option<Duration>,
}

impl ConsoleAlertSink {
    pub fn new(pop_life: i64) -> Self {
        Self {
            lifetime: alert_lifetime(pop_life),
        }
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }
}

impl AlertSink for ConsoleAlertSink {
    fn notify(&self, event: AlertEvent) {
        tracing::warn!("Speed alert\n{}", event.message());

        if let Some(lifetime) = self.lifetime {
            let timestamp = event.formatted_timestamp();
            tokio::spawn(async move {
                tokio::time::sleep(lifetime).await;
                tracing::info!("Speed alert from {} dismissed", timestamp);
            });
        }
    }
}
