/*!
 * Configuration types for the transfer engine
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ShuttleError};

/// Engine configuration, loadable from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Copy buffer size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Bytes transferred between periodic transfer-log saves
    #[serde(default = "default_log_flush_interval")]
    pub log_flush_interval: u64,

    /// Completed log entries older than this are pruned
    #[serde(default = "default_log_retention_hours")]
    pub log_retention_hours: u64,

    /// Hard cap on queued units per enqueue call and on worker iterations
    #[serde(default = "default_max_queue_units")]
    pub max_queue_units: usize,

    /// Maximum remote directory nesting followed during expansion
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// What to do when a leaf destination already exists
    #[serde(default)]
    pub existing_files: ExistingFilePolicy,

    /// Transfer log location (None = per-user config directory)
    #[serde(default)]
    pub transfer_log_path: Option<PathBuf>,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            log_flush_interval: default_log_flush_interval(),
            log_retention_hours: default_log_retention_hours(),
            max_queue_units: default_max_queue_units(),
            max_depth: default_max_depth(),
            existing_files: ExistingFilePolicy::Overwrite,
            transfer_log_path: None,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Handling of leaf destinations that already exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExistingFilePolicy {
    /// Replace the destination
    #[default]
    Overwrite,

    /// Leave the destination alone and mark the unit completed
    Skip,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Upper bound on `log_retention_hours` (100 years)
pub const MAX_LOG_RETENTION_HOURS: u64 = 24 * 365 * 100;

// Default value functions for serde
fn default_chunk_size() -> usize {
    8 * 1024 // 8 KB
}

fn default_log_flush_interval() -> u64 {
    1024 * 1024 // 1 MB
}

fn default_log_retention_hours() -> u64 {
    24
}

fn default_max_queue_units() -> usize {
    100_000
}

fn default_max_depth() -> usize {
    64
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| ShuttleError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ShuttleError::Config(format!("Failed to encode config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ShuttleError::Config("chunk_size must be positive".to_string()));
        }
        if self.max_queue_units == 0 {
            return Err(ShuttleError::Config(
                "max_queue_units must be positive".to_string(),
            ));
        }
        if self.log_retention_hours > MAX_LOG_RETENTION_HOURS {
            return Err(ShuttleError::Config(format!(
                "log_retention_hours must be at most {}",
                MAX_LOG_RETENTION_HOURS
            )));
        }
        Ok(())
    }

    /// Resolved transfer log path
    pub fn transfer_log_path(&self) -> PathBuf {
        self.transfer_log_path
            .clone()
            .unwrap_or_else(default_transfer_log_path)
    }

    /// Retention window for completed log entries
    ///
    /// Clamped to `MAX_LOG_RETENTION_HOURS` for configs that skipped `validate`
    pub fn log_retention(&self) -> chrono::Duration {
        let hours = self.log_retention_hours.min(MAX_LOG_RETENTION_HOURS);
        chrono::Duration::hours(hours as i64)
    }
}

/// Directory holding shuttle's per-user state
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shuttle")
}

/// `<config_dir>/transfers/transfer_log.json`
pub fn default_transfer_log_path() -> PathBuf {
    config_dir().join("transfers").join("transfer_log.json")
}
