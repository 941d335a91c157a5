use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// ISP speed monitor CLI arguments. Every flag overrides the matching
/// environment variable.
#[derive(Debug, Parser)]
#[command(
    name = "speed-monitor",
    version,
    about = "Periodic ISP throughput measurements with a size-capped log"
)]
pub struct Cli {
    /// Minimum acceptable speed in Mbps
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Testing interval in minutes
    #[arg(long)]
    pub interval: Option<u32>,

    /// Raise an alert when a test falls below the threshold (true or false)
    #[arg(long, action = ArgAction::Set)]
    pub popup: Option<bool>,

    /// Seconds before an alert dismisses itself (0 or less keeps it open)
    #[arg(long, allow_negative_numbers = true)]
    pub popup_life: Option<i64>,

    /// Path to the measurement log
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Maximum size of the measurement log in bytes
    #[arg(long)]
    pub max_log_size: Option<u64>,

    /// Console verbosity (0, 1 or 2)
    #[arg(long)]
    pub debug: Option<u8>,

    /// Deliver alerts to this webhook instead of the console
    #[arg(long)]
    pub webhook_url: Option<String>,
}
