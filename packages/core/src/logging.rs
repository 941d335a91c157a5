use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::DebugLevel;

/// Initialize structured logging for the application.
///
/// `RUST_LOG` takes precedence; otherwise the default filter follows the
/// configured debug level. This must be called once at startup (in main.rs).
pub fn init_logging(level: DebugLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.default_filter()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Logging initialized (debug level {})", level.as_u8());
}
