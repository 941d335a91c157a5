use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::error::AppError;

pub const DEFAULT_THRESHOLD_MBPS: f64 = 500.0;
pub const DEFAULT_INTERVAL_MINUTES: u32 = 30;
pub const DEFAULT_POP_LIFE_SECONDS: i64 = 5;
pub const DEFAULT_LOG_FILE: &str = "speed_test_log.csv";
pub const DEFAULT_MAX_LOG_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_DOWNLOAD_URL: &str = "https://speed.cloudflare.com/__down?bytes=10000000";
pub const DEFAULT_UPLOAD_URL: &str = "https://speed.cloudflare.com/__up";
pub const DEFAULT_UPLOAD_BYTES: usize = 2_000_000;
pub const DEFAULT_SPEEDTEST_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub threshold_speed: f64,
    pub interval_minutes: u32,
    pub pop_enabled: bool,
    pub pop_life: i64,
    pub log_file: PathBuf,
    pub max_log_size: u64,
    pub debug_mode: DebugLevel,
    pub speedtest: SpeedTestConfig,
    pub alert_webhook_url: Option<String>,
}

/// Endpoints and limits for the HTTP speed tester.
#[derive(Debug, Clone)]
pub struct SpeedTestConfig {
    pub download_url: String,
    pub upload_url: String,
    pub upload_bytes: usize,
    /// Deadline for each phase. A phase cut short reports the bytes it moved.
    pub timeout: Duration,
}

/// Console verbosity. Only affects narration, never what gets logged to
/// the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    /// Scheduled tests only.
    Quiet,
    /// Narrate results and failures, run the first test immediately.
    Verbose,
    /// Also narrate test start and a countdown to the next test.
    Countdown,
}

impl DebugLevel {
    pub fn from_u8(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(Self::Quiet),
            1 => Ok(Self::Verbose),
            2 => Ok(Self::Countdown),
            other => Err(format!("DEBUG_MODE must be 0, 1 or 2 (got {})", other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Quiet => 0,
            Self::Verbose => 1,
            Self::Countdown => 2,
        }
    }

    pub fn narrates(self) -> bool {
        self >= Self::Verbose
    }

    pub fn counts_down(self) -> bool {
        self >= Self::Countdown
    }

    /// Default tracing filter when `RUST_LOG` is unset.
    pub fn default_filter(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Verbose => "info",
            Self::Countdown => "debug",
        }
    }
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            upload_bytes: DEFAULT_UPLOAD_BYTES,
            timeout: Duration::from_secs(DEFAULT_SPEEDTEST_TIMEOUT_SECONDS),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold_speed: DEFAULT_THRESHOLD_MBPS,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            pop_enabled: false,
            pop_life: DEFAULT_POP_LIFE_SECONDS,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            debug_mode: DebugLevel::Verbose,
            speedtest: SpeedTestConfig::default(),
            alert_webhook_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys fall back
    /// to defaults; set-but-malformed keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("SPEED_THRESHOLD_MBPS") {
            config.threshold_speed = raw
                .parse::<f64>()
                .map_err(|_| "SPEED_THRESHOLD_MBPS must be a valid number")?;
        }

        if let Some(raw) = lookup("INTERVAL_MINUTES") {
            config.interval_minutes = raw
                .parse::<u32>()
                .map_err(|_| "INTERVAL_MINUTES must be a non-negative integer")?;
        }

        if let Some(raw) = lookup("POPUP_ENABLED") {
            config.pop_enabled = parse_bool(&raw)
                .ok_or_else(|| format!("Invalid POPUP_ENABLED: {}", raw))?;
        }

        if let Some(raw) = lookup("POPUP_LIFE_SECONDS") {
            config.pop_life = raw
                .parse::<i64>()
                .map_err(|_| "POPUP_LIFE_SECONDS must be an integer")?;
        }

        if let Some(raw) = lookup("LOG_FILE") {
            config.log_file = PathBuf::from(raw);
        }

        if let Some(raw) = lookup("MAX_LOG_SIZE_BYTES") {
            config.max_log_size = raw
                .parse::<u64>()
                .map_err(|_| "MAX_LOG_SIZE_BYTES must be a valid number")?;
        }

        if let Some(raw) = lookup("DEBUG_MODE") {
            let level = raw
                .parse::<u8>()
                .map_err(|_| "DEBUG_MODE must be 0, 1 or 2")?;
            config.debug_mode = DebugLevel::from_u8(level)?;
        }

        if let Some(raw) = lookup("SPEEDTEST_DOWNLOAD_URL") {
            config.speedtest.download_url = raw;
        }

        if let Some(raw) = lookup("SPEEDTEST_UPLOAD_URL") {
            config.speedtest.upload_url = raw;
        }

        if let Some(raw) = lookup("SPEEDTEST_UPLOAD_BYTES") {
            config.speedtest.upload_bytes = raw
                .parse::<usize>()
                .map_err(|_| "SPEEDTEST_UPLOAD_BYTES must be a valid number")?;
        }

        if let Some(raw) = lookup("SPEEDTEST_TIMEOUT_SECONDS") {
            let secs = raw
                .parse::<u64>()
                .map_err(|_| "SPEEDTEST_TIMEOUT_SECONDS must be a valid number")?;
            config.speedtest.timeout = Duration::from_secs(secs);
        }

        config.alert_webhook_url = lookup("ALERT_WEBHOOK_URL").filter(|url| !url.is_empty());

        Ok(config)
    }

    /// Apply command-line overrides on top of the environment.
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<(), String> {
        if let Some(threshold) = cli.threshold {
            self.threshold_speed = threshold;
        }
        if let Some(interval) = cli.interval {
            self.interval_minutes = interval;
        }
        if let Some(enabled) = cli.popup {
            self.pop_enabled = enabled;
        }
        if let Some(life) = cli.popup_life {
            self.pop_life = life;
        }
        if let Some(path) = &cli.log_file {
            self.log_file = path.clone();
        }
        if let Some(size) = cli.max_log_size {
            self.max_log_size = size;
        }
        if let Some(level) = cli.debug {
            self.debug_mode = DebugLevel::from_u8(level)?;
        }
        if let Some(url) = &cli.webhook_url {
            self.alert_webhook_url = Some(url.clone());
        }
        Ok(())
    }

    /// Reject values the scheduler cannot run with. Must pass before the
    /// first cycle is armed.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.interval_minutes == 0 {
            return Err(AppError::Config(
                "interval_minutes must be greater than zero".into(),
            ));
        }
        if !self.threshold_speed.is_finite() || self.threshold_speed < 0.0 {
            return Err(AppError::Config(format!(
                "threshold_speed must be a non-negative number (got {})",
                self.threshold_speed
            )));
        }
        if self.max_log_size == 0 {
            return Err(AppError::Config(
                "max_log_size must be greater than zero".into(),
            ));
        }
        if self.speedtest.timeout.is_zero() {
            return Err(AppError::Config(
                "speed test timeout must be greater than zero".into(),
            ));
        }
        if 60 % self.interval_minutes != 0 {
            tracing::warn!(
                "interval of {} minutes does not divide the hour; alignment restarts at :00",
                self.interval_minutes
            );
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
