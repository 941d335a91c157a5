//! Scripted measurement backend for tests and dry runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::measurement::{MeasurementError, SpeedMeasurement, SpeedSample};

type Outcome = Result<SpeedSample, MeasurementError>;

/// Returns queued outcomes in order, then repeats the fallback forever.
/// Tracks how many calls were made and the peak number in flight.
pub struct MockSpeedTester {
    queued: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockSpeedTester {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpeedTester {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Ok(SpeedSample {
                download_mbps: 100.0,
                upload_mbps: 100.0,
            }),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_sample(mut self, download_mbps: f64, upload_mbps: f64) -> Self {
        self.fallback = Ok(SpeedSample {
            download_mbps,
            upload_mbps,
        });
        self
    }

    pub fn with_error(mut self, err: MeasurementError) -> Self {
        self.fallback = Err(err);
        self
    }

    /// Queue one outcome ahead of the fallback.
    pub fn then(self, outcome: Outcome) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(outcome);
        }
        self
    }

    /// Hold each measurement open for `delay` (tokio time, so paused
    /// clocks advance through it).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Outcome {
        self.queued
            .lock()
            .ok()
            .and_then(|mut queued| queued.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl SpeedMeasurement for MockSpeedTester {
    async fn measure(&self) -> Result<SpeedSample, MeasurementError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_outcome()
    }

    fn name(&self) -> &str {
        "mock"
    }
}
