//! Measurement scheduler.
//!
//! Drives the measure → log → alert → reschedule cycle. Wake times are
//! aligned to wall-clock multiples of the interval past the hour (a 30
//! minute interval fires at :00 and :30), recomputed from the current
//! clock after every cycle, so slow measurements never accumulate drift.
//!
//! Exactly one task owns the scheduler. The next deadline is armed only
//! after the current cycle returns, so two cycles can never overlap.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::alerts::{AlertEvent, AlertSink};
use crate::config::{Config, DebugLevel};
use crate::error::AppError;
use crate::log_store::LogStore;
use crate::measurement::{MeasurementError, SpeedMeasurement};
use crate::record::MeasurementRecord;

/// Cadence of the level-2 "next test in" notice.
pub const COUNTDOWN_PERIOD: Duration = Duration::from_secs(5);

/// Time until the next wall-clock boundary that is a multiple of
/// `interval_minutes` past the hour. Never negative.
pub fn compute_remaining<T: Timelike>(now: &T, interval_minutes: NonZeroU32) -> Duration {
    let interval = i64::from(interval_minutes.get());
    let minute = i64::from(now.minute());
    let second = i64::from(now.second());

    let remaining = (interval - minute % interval) * 60 - second;
    Duration::from_secs(remaining.max(0) as u64)
}

/// Process-wide scheduling state. Built once at startup, mutated only by
/// [`Scheduler`].
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub interval_minutes: NonZeroU32,
    /// Wall-clock time of the armed wake-up; `None` before the first arm.
    pub next_fire: Option<NaiveDateTime>,
    pub threshold: f64,
    pub debug_level: DebugLevel,
}

impl ScheduleState {
    pub fn new(
        interval_minutes: u32,
        threshold: f64,
        debug_level: DebugLevel,
    ) -> Result<Self, AppError> {
        let interval_minutes = NonZeroU32::new(interval_minutes).ok_or_else(|| {
            AppError::Config("interval_minutes must be greater than zero".into())
        })?;

        Ok(Self {
            interval_minutes,
            next_fire: None,
            threshold,
            debug_level,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(config.interval_minutes, config.threshold_speed, config.debug_mode)
    }
}

/// Result of one cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The measurement was appended; `alerted` is set when a sink was
    /// notified of a breach.
    Logged {
        record: MeasurementRecord,
        alerted: bool,
    },
    /// The measurement failed; nothing was logged or alerted.
    MeasurementFailed(MeasurementError),
    /// The measurement succeeded but the log could not be written.
    LogFailed(AppError),
}

pub struct Scheduler {
    measurement: Arc<dyn SpeedMeasurement + Send + Sync>,
    store: LogStore,
    alert_sink: Option<Arc<dyn AlertSink + Send + Sync>>,
    state: ScheduleState,
}

impl Scheduler {
    /// `alert_sink` is `None` when alerting is disabled.
    pub fn new(
        measurement: Arc<dyn SpeedMeasurement + Send + Sync>,
        store: LogStore,
        alert_sink: Option<Arc<dyn AlertSink + Send + Sync>>,
        state: ScheduleState,
    ) -> Self {
        Self {
            measurement,
            store,
            alert_sink,
            state,
        }
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Run one measurement and act on the result.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let level = self.state.debug_level;

        if level.counts_down() {
            tracing::info!("Starting speed test at {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        }

        let sample = match self.measurement.measure().await {
            Ok(sample) => sample,
            Err(err) => {
                if level.narrates() {
                    tracing::warn!("Speed test via {} failed: {}", self.measurement.name(), err);
                } else {
                    tracing::debug!("Speed test via {} failed: {}", self.measurement.name(), err);
                }
                return CycleOutcome::MeasurementFailed(err);
            }
        };

        let record = MeasurementRecord::new(
            Local::now().naive_local(),
            sample.download_mbps,
            sample.upload_mbps,
        );

        if level.narrates() {
            tracing::info!(
                "{} - Download Speed: {:.2} Mbps, Upload Speed: {:.2} Mbps",
                record.formatted_timestamp(),
                record.download_mbps,
                record.upload_mbps,
            );
        }

        if let Err(err) = self.store.append(&record).await {
            let path = self.store.path().display();
            if level.narrates() {
                tracing::warn!("Failed to write measurement to {}: {}", path, err);
            } else {
                tracing::debug!("Failed to write measurement to {}: {}", path, err);
            }
            return CycleOutcome::LogFailed(err);
        }

        let alerted = self.maybe_alert(&record);
        CycleOutcome::Logged { record, alerted }
    }

    fn maybe_alert(&self, record: &MeasurementRecord) -> bool {
        let threshold = self.state.threshold;
        if !record.is_below(threshold) {
            return false;
        }

        match &self.alert_sink {
            Some(sink) => {
                sink.notify(AlertEvent::from_record(record, threshold));
                true
            }
            None => {
                tracing::debug!("Speed below {} Mbps; alerts disabled", threshold);
                false
            }
        }
    }

    /// Arm the next wake-up relative to `now` and return the delay.
    pub fn schedule_next(&mut self, now: NaiveDateTime) -> Duration {
        let remaining = compute_remaining(&now, self.state.interval_minutes);
        self.state.next_fire = Some(now + chrono::Duration::seconds(remaining.as_secs() as i64));

        tracing::debug!(
            "Next speed test in {}s (at {:?})",
            remaining.as_secs(),
            self.state.next_fire
        );
        remaining
    }

    /// Whole seconds from `now` until the armed wake-up, if any.
    pub fn seconds_until_next_fire(&self, now: NaiveDateTime) -> Option<i64> {
        self.state
            .next_fire
            .map(|next| (next - now).num_seconds().max(0))
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// At debug level 0 the first cycle waits for the next boundary; at
    /// higher levels it fires immediately. An in-flight measurement is
    /// not interrupted by shutdown; the signal is seen once it returns.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let level = self.state.debug_level;
        let first_delay = if level.narrates() {
            self.state.next_fire = Some(Local::now().naive_local());
            Duration::ZERO
        } else {
            self.schedule_next(Local::now().naive_local())
        };
        let mut deadline = Instant::now() + first_delay;

        let mut countdown = time::interval_at(Instant::now() + COUNTDOWN_PERIOD, COUNTDOWN_PERIOD);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Speed monitor started (interval: {}m, threshold: {} Mbps, log: {})",
            self.state.interval_minutes,
            self.state.threshold,
            self.store.path().display()
        );

        // The cycle is awaited inside its arm, so countdown ticks pause while
        // a measurement runs and the ticks it missed are skipped, not replayed.
        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => {
                    self.run_cycle().await;
                    let delay = self.schedule_next(Local::now().naive_local());
                    deadline = Instant::now() + delay;
                }

                _ = countdown.tick(), if level.counts_down() => {
                    if let Some(secs) = self.seconds_until_next_fire(Local::now().naive_local()) {
                        tracing::info!("Next test in {} seconds", secs);
                    }
                }

                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received. Stopping speed monitor.");
                    break;
                }
            }
        }

        tracing::info!("Speed monitor stopped cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use proptest::prelude::*;
    use tempfile::TempDir;

    use crate::measurement::MockSpeedTester;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<AlertEvent>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<AlertEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl AlertSink for RecordingSink {
        fn notify(&self, event: AlertEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn minutes(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, 2)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn make_scheduler(
        dir: &TempDir,
        mock: Arc<MockSpeedTester>,
        sink: Option<Arc<RecordingSink>>,
        threshold: f64,
    ) -> Scheduler {
        let store = LogStore::new(dir.path().join("speed_test_log.csv"), 1024 * 1024);
        let state = ScheduleState::new(30, threshold, DebugLevel::Quiet).unwrap();
        Scheduler::new(
            mock,
            store,
            sink.map(|s| s as Arc<dyn AlertSink + Send + Sync>),
            state,
        )
    }

    // ---- compute_remaining ----

    #[test]
    fn remaining_counts_to_next_boundary() {
        assert_eq!(
            compute_remaining(&at(10, 7, 30), minutes(30)),
            Duration::from_secs(22 * 60 + 30)
        );
    }

    #[test]
    fn remaining_on_a_boundary_is_a_full_interval() {
        assert_eq!(
            compute_remaining(&at(10, 30, 0), minutes(30)),
            Duration::from_secs(30 * 60)
        );
    }

    #[test]
    fn remaining_one_second_before_boundary() {
        assert_eq!(
            compute_remaining(&at(10, 59, 59), minutes(15)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn remaining_ignores_previous_fire_time() {
        // a measurement that overran by 3 minutes still lands on :30
        assert_eq!(
            compute_remaining(&at(10, 3, 12), minutes(30)),
            Duration::from_secs(26 * 60 + 48)
        );
    }

    proptest! {
        #[test]
        fn remaining_lands_on_aligned_boundary(
            h in 0u32..24,
            m in 0u32..60,
            s in 0u32..60,
            interval in prop::sample::select(vec![1u32, 2, 3, 4, 5, 6, 10, 12, 15, 20, 30, 60]),
        ) {
            let now = at(h, m, s);
            let remaining = compute_remaining(&now, minutes(interval));
            let fire = now + chrono::Duration::seconds(remaining.as_secs() as i64);

            prop_assert!(remaining.as_secs() <= u64::from(interval) * 60);
            prop_assert_eq!(fire.second(), 0);
            prop_assert_eq!(fire.minute() % interval, 0);
        }
    }

    // ---- ScheduleState ----

    #[test]
    fn zero_interval_is_a_config_error() {
        assert!(matches!(
            ScheduleState::new(0, 500.0, DebugLevel::Quiet),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn schedule_next_arms_next_fire() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = make_scheduler(&dir, Arc::new(MockSpeedTester::new()), None, 500.0);

        let delay = scheduler.schedule_next(at(10, 7, 30));

        assert_eq!(delay, Duration::from_secs(22 * 60 + 30));
        assert_eq!(scheduler.state().next_fire, Some(at(10, 30, 0)));
        assert_eq!(scheduler.seconds_until_next_fire(at(10, 29, 55)), Some(5));
    }

    // ---- run_cycle ----

    #[tokio::test]
    async fn breach_logs_record_and_alerts_once() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockSpeedTester::new().with_sample(450.0, 600.0));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = make_scheduler(&dir, mock, Some(sink.clone()), 500.0);

        let outcome = scheduler.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Logged { alerted: true, .. }));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].download_mbps, 450.0);
        assert_eq!(events[0].upload_mbps, 600.0);
        assert_eq!(events[0].threshold, 500.0);
        assert_eq!(scheduler.store().read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn healthy_speeds_log_without_alert() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockSpeedTester::new().with_sample(600.0, 550.0));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = make_scheduler(&dir, mock, Some(sink.clone()), 500.0);

        let outcome = scheduler.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Logged { alerted: false, .. }));
        assert!(sink.events().is_empty());

        let records = scheduler.store().read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].download_mbps, 600.0);
        assert_eq!(records[0].upload_mbps, 550.0);
    }

    #[tokio::test]
    async fn breach_with_alerts_disabled_only_logs() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockSpeedTester::new().with_sample(10.0, 10.0));
        let scheduler = make_scheduler(&dir, mock, None, 500.0);

        let outcome = scheduler.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::Logged { alerted: false, .. }));
        assert_eq!(scheduler.store().read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn measurement_failure_skips_log_and_alert_but_rearms() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(
            MockSpeedTester::new().with_error(MeasurementError::network("unreachable")),
        );
        let sink = Arc::new(RecordingSink::default());
        let mut scheduler = make_scheduler(&dir, mock, Some(sink.clone()), 500.0);

        let outcome = scheduler.run_cycle().await;
        let now = Local::now().naive_local();
        let delay = scheduler.schedule_next(now);

        assert!(matches!(outcome, CycleOutcome::MeasurementFailed(_)));
        assert!(sink.events().is_empty());
        assert!(!scheduler.store().path().exists());
        assert!(delay <= Duration::from_secs(30 * 60));
        let next = scheduler.state().next_fire.unwrap();
        assert!(next > now && next <= now + chrono::Duration::minutes(30));
    }

    #[tokio::test]
    async fn unwritable_log_fails_the_cycle_without_alert() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockSpeedTester::new().with_sample(10.0, 10.0));
        let sink = Arc::new(RecordingSink::default());
        // the log path is a directory, so opening it for append fails
        let store = LogStore::new(dir.path(), 1024);
        let state = ScheduleState::new(30, 500.0, DebugLevel::Verbose).unwrap();
        let scheduler = Scheduler::new(
            mock,
            store,
            Some(sink.clone() as Arc<dyn AlertSink + Send + Sync>),
            state,
        );

        let outcome = scheduler.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::LogFailed(_)));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn consecutive_cycles_append_in_order() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(
            MockSpeedTester::new()
                .then(Ok(crate::measurement::SpeedSample {
                    download_mbps: 1.0,
                    upload_mbps: 1.0,
                }))
                .then(Err(MeasurementError::Timeout))
                .with_sample(3.0, 3.0),
        );
        let scheduler = make_scheduler(&dir, mock.clone(), None, 0.0);

        scheduler.run_cycle().await;
        scheduler.run_cycle().await;
        scheduler.run_cycle().await;

        let downloads: Vec<f64> = scheduler
            .store()
            .read_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.download_mbps)
            .collect();
        assert_eq!(downloads, vec![1.0, 3.0]);
        assert_eq!(mock.calls(), 3);
    }

    fn scripted_outcome(outcome: &CycleOutcome) -> String {
        match outcome {
            CycleOutcome::Logged { alerted, .. } => format!("logged alerted={}", alerted),
            CycleOutcome::MeasurementFailed(err) => format!("failed: {}", err),
            CycleOutcome::LogFailed(_) => "log failed".to_string(),
        }
    }

    /// Breach, failure, then healthy speeds through three cycles at `level`.
    /// Returns the outcomes, the log lines without their timestamps, and the
    /// alerted rates.
    async fn run_scripted_cycles(level: DebugLevel) -> (Vec<String>, Vec<String>, Vec<(f64, f64, f64)>) {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(
            MockSpeedTester::new()
                .then(Ok(crate::measurement::SpeedSample {
                    download_mbps: 450.0,
                    upload_mbps: 600.0,
                }))
                .then(Err(MeasurementError::network("unreachable")))
                .with_sample(600.0, 550.0),
        );
        let sink = Arc::new(RecordingSink::default());
        let store = LogStore::new(dir.path().join("speed_test_log.csv"), 1024 * 1024);
        let state = ScheduleState::new(30, 500.0, level).unwrap();
        let scheduler = Scheduler::new(
            mock,
            store,
            Some(sink.clone() as Arc<dyn AlertSink + Send + Sync>),
            state,
        );

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(scripted_outcome(&scheduler.run_cycle().await));
        }

        let contents = std::fs::read_to_string(scheduler.store().path()).unwrap();
        let lines = contents
            .lines()
            .map(|line| line.split_once(',').unwrap().1.to_string())
            .collect();
        let events = sink
            .events()
            .iter()
            .map(|e| (e.download_mbps, e.upload_mbps, e.threshold))
            .collect();

        (outcomes, lines, events)
    }

    #[tokio::test]
    async fn debug_level_changes_nothing_but_narration() {
        let quiet = run_scripted_cycles(DebugLevel::Quiet).await;

        assert_eq!(
            quiet.0,
            vec![
                "logged alerted=true".to_string(),
                format!("failed: {}", MeasurementError::network("unreachable")),
                "logged alerted=false".to_string(),
            ]
        );
        assert_eq!(
            quiet.1,
            vec![
                "Download Speed: 450.00 Mbps,Upload Speed: 600.00 Mbps,".to_string(),
                "Download Speed: 600.00 Mbps,Upload Speed: 550.00 Mbps,".to_string(),
            ]
        );
        assert_eq!(quiet.2, vec![(450.0, 600.0, 500.0)]);

        assert_eq!(run_scripted_cycles(DebugLevel::Verbose).await, quiet);
        assert_eq!(run_scripted_cycles(DebugLevel::Countdown).await, quiet);
    }

    #[derive(Clone, Default)]
    struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Console output of one unwritable-log cycle under the default `warn`
    /// filter.
    async fn unwritable_cycle_output(level: DebugLevel) -> String {
        let output = CapturedOutput::default();
        let writer = output.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockSpeedTester::new().with_sample(600.0, 600.0));
        let state = ScheduleState::new(30, 500.0, level).unwrap();
        let scheduler = Scheduler::new(mock, LogStore::new(dir.path(), 1024), None, state);

        let outcome = scheduler.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::LogFailed(_)));

        let captured = output.0.lock().unwrap().clone();
        String::from_utf8(captured).unwrap()
    }

    #[tokio::test]
    async fn log_write_failure_is_silent_at_quiet_level() {
        assert!(!unwritable_cycle_output(DebugLevel::Quiet)
            .await
            .contains("Failed to write measurement"));
        assert!(unwritable_cycle_output(DebugLevel::Verbose)
            .await
            .contains("Failed to write measurement"));
    }

    // ---- run ----

    fn failing_scheduler(dir: &TempDir, mock: Arc<MockSpeedTester>, level: DebugLevel) -> Scheduler {
        let store = LogStore::new(dir.path().join("speed_test_log.csv"), 1024);
        let state = ScheduleState::new(1, 500.0, level).unwrap();
        Scheduler::new(mock, store, None, state)
    }

    #[tokio::test(start_paused = true)]
    async fn slow_measurements_never_overlap() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(
            MockSpeedTester::new()
                .with_error(MeasurementError::Timeout)
                .with_delay(Duration::from_secs(25 * 60)),
        );
        let scheduler = failing_scheduler(&dir, mock.clone(), DebugLevel::Quiet);

        scheduler
            .run(time::sleep(Duration::from_secs(3 * 3600)))
            .await;

        assert!(mock.calls() >= 2);
        assert_eq!(mock.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn verbose_level_fires_first_cycle_immediately() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockSpeedTester::new().with_error(MeasurementError::Timeout));
        let scheduler = failing_scheduler(&dir, mock.clone(), DebugLevel::Verbose);

        scheduler.run(time::sleep(Duration::from_millis(500))).await;

        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_level_waits_for_first_boundary() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockSpeedTester::new().with_error(MeasurementError::Timeout));
        let scheduler = failing_scheduler(&dir, mock.clone(), DebugLevel::Quiet);

        scheduler.run(time::sleep(Duration::from_millis(500))).await;

        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_does_not_trigger_extra_cycles() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockSpeedTester::new().with_error(MeasurementError::Timeout));
        let scheduler = failing_scheduler(&dir, mock.clone(), DebugLevel::Countdown);

        // 30s of countdown ticks but at most one boundary inside a 1 minute interval
        scheduler.run(time::sleep(Duration::from_secs(30))).await;

        assert!(mock.calls() >= 1 && mock.calls() <= 2);
    }
}
