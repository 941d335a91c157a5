use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::signal;

use speed_monitor::alerts::{AlertSink, ConsoleAlertSink, WebhookAlertSink};
use speed_monitor::cli::Cli;
use speed_monitor::config::{Config, DebugLevel};
use speed_monitor::error::AppError;
use speed_monitor::log_store::LogStore;
use speed_monitor::logging::init_logging;
use speed_monitor::measurement::{HttpSpeedTester, SpeedMeasurement};
use speed_monitor::scheduler::{ScheduleState, Scheduler};

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_logging(DebugLevel::Verbose);
            tracing::error!("{}", err);
            std::process::exit(1);
        }
    };

    init_logging(config.debug_mode);
    tracing::debug!("Loaded config: {:?}", config);

    if let Err(err) = config.validate() {
        tracing::error!("{}", err);
        std::process::exit(1);
    }

    let scheduler = build_scheduler(&config).unwrap_or_else(|err| {
        tracing::error!("{}", err);
        std::process::exit(1);
    });

    scheduler
        .run(async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
        })
        .await;
}

fn load_config(cli: &Cli) -> Result<Config, AppError> {
    let mut config = Config::from_env().map_err(AppError::Config)?;
    config.apply_cli(cli).map_err(AppError::Config)?;
    Ok(config)
}

fn build_scheduler(config: &Config) -> Result<Scheduler, AppError> {
    let state = ScheduleState::from_config(config)?;

    let measurement: Arc<dyn SpeedMeasurement + Send + Sync> =
        Arc::new(HttpSpeedTester::new(config.speedtest.clone())?);

    let store = LogStore::new(config.log_file.clone(), config.max_log_size);

    let alert_sink = if config.pop_enabled {
        let sink: Arc<dyn AlertSink + Send + Sync> = match &config.alert_webhook_url {
            Some(url) => Arc::new(WebhookAlertSink::new(url.clone(), config.pop_life)?),
            None => Arc::new(ConsoleAlertSink::new(config.pop_life)),
        };
        Some(sink)
    } else {
        None
    };

    Ok(Scheduler::new(measurement, store, alert_sink, state))
}
