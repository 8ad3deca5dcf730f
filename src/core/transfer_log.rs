/*!
 * Durable transfer log for resume-after-restart
 *
 * A single pretty-printed JSON array of `LogEntry` records. Every
 * read-modify-write cycle runs under the log's mutex, and writes go to a
 * temporary file in the same directory that then replaces the log, so a
 * crash never leaves a half-written primary file behind.
 *
 * Failures here are diagnostics only: they are logged and swallowed, because
 * losing resume capability is acceptable and losing the transfer is not.
 */

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::unit::{Direction, TransferUnit};
use crate::config::EngineConfig;
use crate::error::{Result, ShuttleError};

/// One persisted transfer attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub source: String,
    pub destination: String,
    pub display_name: String,
    pub direction: Direction,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub completed: bool,
    pub failed: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Rewritten on every save
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// An active (neither completed nor failed) entry
    pub fn active(unit: &TransferUnit, bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            source: unit.source.clone(),
            destination: unit.destination.clone(),
            display_name: unit.display_name.clone(),
            direction: unit.direction,
            bytes_transferred,
            total_bytes,
            completed: false,
            failed: false,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn completed(unit: &TransferUnit, bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            completed: true,
            ..Self::active(unit, bytes_transferred, total_bytes)
        }
    }

    pub fn failed(
        unit: &TransferUnit,
        bytes_transferred: u64,
        total_bytes: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            failed: true,
            error_message: Some(message.into()),
            ..Self::active(unit, bytes_transferred, total_bytes)
        }
    }

    /// Only active entries are eligible for resume matching
    pub fn is_active(&self) -> bool {
        !self.completed && !self.failed
    }

    pub fn matches(&self, source: &str, destination: &str) -> bool {
        self.source == source && self.destination == destination
    }

    /// Offset to resume from, when the entry records a partial transfer
    pub fn resume_offset(&self) -> Option<u64> {
        if self.bytes_transferred > 0 && self.bytes_transferred < self.total_bytes {
            Some(self.bytes_transferred)
        } else {
            None
        }
    }
}

/// The on-disk transfer log service
///
/// Constructed once at startup and shared by reference with the queue.
#[derive(Debug)]
pub struct TransferLog {
    path: PathBuf,
    retention: Duration,
    lock: Mutex<()>,
}

impl TransferLog {
    pub fn new(path: impl Into<PathBuf>, retention: Duration) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "Cannot create transfer log directory");
            }
        }
        Self {
            path,
            retention,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.transfer_log_path(), config.log_retention())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `entry`, replacing any active entry for the same pair
    ///
    /// Also prunes completed entries older than the retention window.
    pub fn save_transfer(&self, entry: LogEntry) {
        let (source, destination) = (entry.source.clone(), entry.destination.clone());
        if let Err(e) = self.try_save(entry) {
            warn!(
                source = %source,
                destination = %destination,
                error = %e,
                "Failed to save transfer log entry"
            );
        }
    }

    /// Every entry in the log; never fails
    pub fn load_all_transfers(&self) -> Vec<LogEntry> {
        let _guard = self.guard();
        self.load_unlocked()
    }

    /// The active entry for `(source, destination)`, if any
    pub fn find_incomplete_transfer(&self, source: &str, destination: &str) -> Option<LogEntry> {
        self.load_all_transfers()
            .into_iter()
            .find(|e| e.is_active() && e.matches(source, destination))
    }

    /// All active entries, oldest first
    pub fn incomplete_transfers(&self) -> Vec<LogEntry> {
        let mut entries: Vec<_> = self
            .load_all_transfers()
            .into_iter()
            .filter(LogEntry::is_active)
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_save(&self, mut entry: LogEntry) -> Result<()> {
        let _guard = self.guard();
        let mut entries = self.load_unlocked();

        let now = Utc::now();
        entry.timestamp = now;
        let cutoff = now - self.retention;
        entries.retain(|e| !(e.completed && e.timestamp < cutoff));
        entries.retain(|e| !(e.is_active() && e.matches(&entry.source, &entry.destination)));
        entries.push(entry);

        self.write_unlocked(&entries)
    }

    fn load_unlocked(&self) -> Vec<LogEntry> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read transfer log");
                return Vec::new();
            }
        };
        if raw.trim().is_empty() {
            return Vec::new();
        }

        match serde_json::from_str::<Vec<LogEntry>>(&raw) {
            Ok(entries) => entries,
            Err(strict_err) => {
                let err = ShuttleError::LogCorruption(strict_err.to_string());
                warn!(error = %err, "Malformed transfer log, retrying in lenient mode");
                match parse_lenient(&raw) {
                    Some(entries) => {
                        warn!(recovered = entries.len(), "Recovered transfer log entries");
                        entries
                    }
                    None => {
                        self.backup_corrupt();
                        Vec::new()
                    }
                }
            }
        }
    }

    fn write_unlocked(&self, entries: &[LogEntry]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .map_err(|e| ShuttleError::LogWrite(format!("{}: {}", parent.display(), e)))?;

        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|e| ShuttleError::LogWrite(format!("temp file: {}", e)))?;
        serde_json::to_writer_pretty(&mut tmp, entries)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| ShuttleError::LogWrite(format!("{}: {}", self.path.display(), e)))?;

        debug!(entries = entries.len(), "Transfer log written");
        Ok(())
    }

    /// Move an unreadable log aside as `<log>.backup.<millis>`
    fn backup_corrupt(&self) {
        let backup = PathBuf::from(format!(
            "{}.backup.{}",
            self.path.display(),
            Utc::now().timestamp_millis()
        ));
        warn!(backup = %backup.display(), "Transfer log unrecoverable, backing up and resetting");
        if let Err(e) = fs::copy(&self.path, &backup) {
            warn!(error = %e, "Failed to back up corrupt transfer log");
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(error = %e, "Failed to remove corrupt transfer log");
        }
    }
}

/// Best-effort parse of a damaged log
///
/// Accepts a `null` document, drops individual records that no longer match
/// the schema, and closes an array cut off after its last complete record.
fn parse_lenient(raw: &str) -> Option<Vec<LogEntry>> {
    let trimmed = raw.trim_start_matches('\u{feff}').trim();
    if trimmed == "null" {
        return Some(Vec::new());
    }

    let values = serde_json::from_str::<Vec<serde_json::Value>>(trimmed)
        .ok()
        .or_else(|| {
            let cut = trimmed.rfind('}')?;
            let closed = format!("{}]", &trimmed[..=cut]);
            serde_json::from_str::<Vec<serde_json::Value>>(&closed).ok()
        })?;

    Some(
        values
            .into_iter()
            .filter_map(|v| serde_json::from_value::<LogEntry>(v).ok())
            .collect(),
    )
}
