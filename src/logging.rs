/*!
 * Logging and tracing initialization
 */

use std::fs::OpenOptions;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::EngineConfig;
use crate::error::{Result, ShuttleError};

/// Initialize structured logging based on configuration
pub fn init_logging(config: &EngineConfig) -> Result<()> {
    let env_filter = build_filter(config)?;

    if let Some(ref log_path) = config.log_file {
        init_file_logging(log_path, env_filter)?;
    } else {
        init_stdout_logging(env_filter)?;
    }

    Ok(())
}

fn effective_level(config: &EngineConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

fn build_filter(config: &EngineConfig) -> Result<EnvFilter> {
    let log_level = effective_level(config);
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("shuttle={}", log_level)))
        .map_err(|e| ShuttleError::Config(format!("Failed to create log filter: {}", e)))
}

/// Initialize logging to stderr
fn init_stdout_logging(env_filter: EnvFilter) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ShuttleError::Config(format!("Logging already initialized: {}", e)))
}

/// Initialize JSON logging to a file; runs append to the same history
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| ShuttleError::Config(format!("Failed to open log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ShuttleError::Config(format!("Logging already initialized: {}", e)))
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shuttle=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
