//! Tracing initialisation: console plus rolling `debug.log` / `error.log` files.

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LogConfig;
use crate::error::ConfigError;

/// Guards for the non-blocking file writers. Dropping them flushes and stops the writers,
/// so `main` keeps this alive for the whole process lifetime.
pub struct LogGuards {
    _debug: WorkerGuard,
    _error: WorkerGuard,
}

fn daily_file(directory: &Path, name: &str) -> Result<RollingFileAppender, ConfigError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(name)
        .build(directory)
        .map_err(|e| ConfigError::InvalidValue {
            key: "VERBA_LOG_DIR".to_string(),
            message: format!("{}: {e}", directory.display()),
        })
}

/// Install the global subscriber.
pub fn init(config: &LogConfig) -> Result<LogGuards, ConfigError> {
    let debug_appender = daily_file(&config.directory, "debug.log")?;
    let error_appender = daily_file(&config.directory, "error.log")?;
    let (debug_writer, debug_guard) = tracing_appender::non_blocking(debug_appender);
    let (error_writer, error_guard) = tracing_appender::non_blocking(error_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(debug_writer))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(error_writer)
                .with_filter(LevelFilter::from_level(Level::ERROR)),
        )
        .init();

    Ok(LogGuards {
        _debug: debug_guard,
        _error: error_guard,
    })
}
