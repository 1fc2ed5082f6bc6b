pub mod auth;
pub mod calendar;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod month_feed;
pub mod notify;
pub mod session;
pub mod store;
pub mod tracker;
pub mod workflow;

pub use crate::config::TrackerConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::tracker::TrackerCore;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON lines into `<log_dir>/tracker.log.<date>`. Safe to call twice; the
/// second subscriber is rejected and reported as an error.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "tracker.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}

/// Message safe to print for a front end; details stay in the log.
pub fn to_client_error(error: &AppError) -> String {
    error.user_message()
}
