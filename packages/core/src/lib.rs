// Library root — exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod alerts;
pub mod error;
pub mod log_store;
pub mod measurement;
pub mod record;
pub mod scheduler;

// Startup plumbing used by the binary.
pub mod cli;
pub mod config;
pub mod logging;
