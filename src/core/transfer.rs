/*!
 * Single-unit transfer routines
 *
 * One leaf file (download or upload) or one container per call, always with
 * the session already locked by the worker. Resume points come from the
 * transfer log and are checked against the partial file before use.
 */

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::dispatch::{StatusKind, StatusReporter, UiDispatcher};
use super::progress::{ProgressReader, UnitCounter};
use super::task::{Task, TaskHandle};
use super::transfer_log::{LogEntry, TransferLog};
use super::unit::{Direction, TransferUnit};
use crate::config::{EngineConfig, ExistingFilePolicy};
use crate::error::{Result, ShuttleError};
use crate::session::{is_already_exists_reply, stat_remote, SessionAdapter};

/// Everything a transfer routine needs besides the session
pub struct TransferContext<'a> {
    pub log: &'a TransferLog,
    pub task: &'a TaskHandle,
    /// Worker-side byte counts, read back when the unit fails
    pub counter: &'a Arc<UnitCounter>,
    pub dispatcher: &'a Arc<dyn UiDispatcher>,
    pub reporter: &'a StatusReporter,
    pub config: &'a EngineConfig,
}

impl TransferContext<'_> {
    fn post(&self, f: impl FnOnce(&mut Task) + Send + 'static) {
        self.task.post(self.dispatcher.as_ref(), f);
    }
}

/// How a unit finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Bytes were copied; `bytes` includes any resumed prefix
    Transferred { bytes: u64, total: u64 },
    /// Destination kept under `ExistingFilePolicy::Skip`
    Skipped,
    /// Container created or already present
    ContainerReady,
}

/// Resume strategy for one leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Continue from a verified offset
    Resume { from_offset: u64 },
    /// A log entry exists but its partial data cannot be trusted
    Restart { reason: String },
    /// No resume information
    StartFresh,
}

impl ResumeDecision {
    pub fn start_offset(&self) -> u64 {
        match self {
            ResumeDecision::Resume { from_offset } => *from_offset,
            _ => 0,
        }
    }
}

/// Decide how to resume a download into `local`
///
/// The local partial file is authoritative: it must hold at least the logged
/// byte count, and anything past that count is discarded.
pub fn decide_download_resume(
    entry: Option<&LogEntry>,
    local: &Path,
    remote_size: u64,
) -> ResumeDecision {
    let Some(entry) = entry else {
        return ResumeDecision::StartFresh;
    };
    let Some(offset) = entry.resume_offset() else {
        return ResumeDecision::StartFresh;
    };
    if remote_size > 0 && remote_size != entry.total_bytes {
        return ResumeDecision::Restart {
            reason: format!(
                "remote size changed from {} to {}",
                entry.total_bytes, remote_size
            ),
        };
    }
    match fs::metadata(local) {
        Ok(meta) if meta.len() >= offset => ResumeDecision::Resume {
            from_offset: offset,
        },
        Ok(meta) => ResumeDecision::Restart {
            reason: format!("local file has {} bytes, log recorded {}", meta.len(), offset),
        },
        Err(_) => ResumeDecision::Restart {
            reason: "partial file is missing".to_string(),
        },
    }
}

/// Decide how to resume an upload to `remote`
///
/// Requires an appending session and a remote size probe. A remote partial
/// shorter than the logged offset is resumed from its actual size.
pub fn decide_upload_resume(
    session: &mut dyn SessionAdapter,
    entry: Option<&LogEntry>,
    remote: &str,
    local_size: u64,
) -> ResumeDecision {
    let Some(entry) = entry else {
        return ResumeDecision::StartFresh;
    };
    let Some(offset) = entry.resume_offset() else {
        return ResumeDecision::StartFresh;
    };
    if entry.total_bytes != local_size {
        return ResumeDecision::Restart {
            reason: format!(
                "source size changed from {} to {}",
                entry.total_bytes, local_size
            ),
        };
    }
    if !session.supports_append() {
        return ResumeDecision::Restart {
            reason: "session cannot append".to_string(),
        };
    }
    match stat_remote(session, remote) {
        Ok(Some(remote_entry)) if !remote_entry.is_directory => {
            let size = remote_entry.size;
            if size == offset {
                ResumeDecision::Resume { from_offset: offset }
            } else if size > 0 && size < offset {
                ResumeDecision::Resume { from_offset: size }
            } else {
                ResumeDecision::Restart {
                    reason: format!("remote has {} bytes, log recorded {}", size, offset),
                }
            }
        }
        Ok(_) => ResumeDecision::Restart {
            reason: "remote partial file is missing".to_string(),
        },
        Err(e) => ResumeDecision::Restart {
            reason: format!("remote size probe failed: {}", e),
        },
    }
}

/// Download one remote leaf into `unit.destination`
pub fn download_file(
    session: &mut dyn SessionAdapter,
    unit: &TransferUnit,
    ctx: &TransferContext<'_>,
) -> Result<TransferOutcome> {
    let remote = unit.remote_path();
    let local = Path::new(unit.local_path());

    let total = match stat_remote(session, remote) {
        Ok(Some(entry)) if !entry.is_directory => entry.size,
        Ok(_) => 0,
        Err(e) => {
            debug!(path = %remote, error = %e, "Remote size unavailable");
            0
        }
    };

    let (source, destination) = unit.pair();
    let active = ctx.log.find_incomplete_transfer(source, destination);
    if active.is_none() && ctx.config.existing_files == ExistingFilePolicy::Skip && local.exists() {
        info!(path = %local.display(), "Destination exists, skipping");
        return Ok(TransferOutcome::Skipped);
    }

    let decision = decide_download_resume(active.as_ref(), local, total);
    if let ResumeDecision::Restart { reason } = &decision {
        info!(path = %remote, reason = %reason, "Restarting download from zero");
    }
    let start = decision.start_offset();
    announce_start(ctx, Direction::Download, start, total);

    let copied = {
        let stream = session.open_download_stream_at(remote, start)?;
        let result = open_download_target(local, start).and_then(|file| {
            let mut writer = BufWriter::new(file);
            let mut reader = ProgressReader::new(
                stream,
                ctx.counter.clone(),
                Direction::Download,
                ctx.task.clone(),
                ctx.dispatcher.clone(),
            );
            let copied = copy_chunks(&mut reader, &mut writer, start, total, unit, ctx)?;
            writer.flush()?;
            Ok(copied)
        });
        result
    };
    let copied = match copied {
        Ok(n) => n,
        Err(e) => {
            abort_pending(session, remote);
            return Err(e);
        }
    };

    let ok = session.complete_pending_transfer()?;
    let reply = report_reply(session, ctx);
    if !ok {
        // Some servers under-report success on downloads
        let len = fs::metadata(local).map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            return Err(ShuttleError::transfer_failed(remote, reply_or(&reply, "download not confirmed")));
        }
        warn!(path = %remote, reply = %reply, bytes = len, "Completion not confirmed, keeping downloaded file");
    }

    debug!(path = %remote, bytes = copied, resumed_from = start, "Download finished");
    Ok(TransferOutcome::Transferred {
        bytes: copied,
        total: total.max(copied),
    })
}

/// Upload one local leaf to `unit.destination`
pub fn upload_file(
    session: &mut dyn SessionAdapter,
    unit: &TransferUnit,
    ctx: &TransferContext<'_>,
) -> Result<TransferOutcome> {
    let local = Path::new(unit.local_path());
    let remote = unit.remote_path();
    let total = fs::metadata(local)?.len();

    let (source, destination) = unit.pair();
    let active = ctx.log.find_incomplete_transfer(source, destination);
    if active.is_none() && ctx.config.existing_files == ExistingFilePolicy::Skip {
        if let Ok(Some(_)) = stat_remote(session, remote) {
            info!(path = %remote, "Remote destination exists, skipping");
            return Ok(TransferOutcome::Skipped);
        }
    }

    let decision = decide_upload_resume(session, active.as_ref(), remote, total);
    if let ResumeDecision::Restart { reason } = &decision {
        info!(path = %remote, reason = %reason, "Restarting upload from zero");
    }
    let start = decision.start_offset();
    announce_start(ctx, Direction::Upload, start, total);

    let mut file = File::open(local)?;
    if start > 0 {
        file.seek(SeekFrom::Start(start))?;
    }

    let copied = {
        let stream = if start > 0 {
            session.open_append_stream(remote)?
        } else {
            session.open_upload_stream(remote)?
        };
        let mut writer = stream;
        let mut reader = ProgressReader::new(
            BufReader::new(file),
            ctx.counter.clone(),
            Direction::Upload,
            ctx.task.clone(),
            ctx.dispatcher.clone(),
        );
        let result = copy_chunks(&mut reader, &mut writer, start, total, unit, ctx)
            .and_then(|n| {
                writer.flush()?;
                Ok(n)
            });
        result
    };
    let copied = match copied {
        Ok(n) => n,
        Err(e) => {
            abort_pending(session, remote);
            return Err(e);
        }
    };

    let ok = session.complete_pending_transfer()?;
    let reply = report_reply(session, ctx);
    if !ok {
        return Err(ShuttleError::transfer_failed(remote, reply_or(&reply, "upload not confirmed")));
    }

    debug!(path = %remote, bytes = copied, resumed_from = start, "Upload finished");
    Ok(TransferOutcome::Transferred {
        bytes: copied,
        total: total.max(copied),
    })
}

/// Create the destination directory for a container unit
///
/// "Already exists" is success. A refused creation is double-checked with a
/// listing probe, and a failed probe is not taken to mean absence.
pub fn create_container(
    session: &mut dyn SessionAdapter,
    unit: &TransferUnit,
    ctx: &TransferContext<'_>,
) -> Result<TransferOutcome> {
    ctx.post(|t| t.set_status("Creating directory..."));

    match unit.direction {
        Direction::Download => {
            fs::create_dir_all(unit.local_path())?;
            Ok(TransferOutcome::ContainerReady)
        }
        Direction::Upload => {
            let remote = unit.remote_path();
            match session.create_directory(remote) {
                Ok(true) => Ok(TransferOutcome::ContainerReady),
                Ok(false) => {
                    let reply = session.last_reply_text();
                    if is_already_exists_reply(&reply) {
                        debug!(path = %remote, "Remote directory already exists");
                        return Ok(TransferOutcome::ContainerReady);
                    }
                    match stat_remote(session, remote) {
                        Ok(Some(entry)) if entry.is_directory => Ok(TransferOutcome::ContainerReady),
                        Ok(_) => Err(ShuttleError::protocol(reply_or(&reply, "directory not created"))),
                        Err(probe) => {
                            debug!(path = %remote, error = %probe, "Directory probe failed");
                            Err(ShuttleError::protocol(reply_or(&reply, "directory not created")))
                        }
                    }
                }
                Err(e) if e.is_already_exists() => Ok(TransferOutcome::ContainerReady),
                Err(e) => Err(e),
            }
        }
    }
}

fn announce_start(ctx: &TransferContext<'_>, direction: Direction, start: u64, total: u64) {
    ctx.counter.start(start, total);
    let status = match (start > 0, direction) {
        (true, _) => "Resuming transfer...",
        (false, Direction::Download) => "Downloading...",
        (false, Direction::Upload) => "Uploading...",
    };
    ctx.post(move |t| {
        t.set_total_bytes(total);
        t.set_bytes_transferred(start);
        t.set_status(status);
    });
}

/// Open the local target, keeping exactly `start` bytes of any partial file
fn open_download_target(local: &Path, start: u64) -> Result<File> {
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    if start == 0 {
        return Ok(File::create(local)?);
    }
    let mut file = OpenOptions::new().write(true).open(local)?;
    file.set_len(start)?;
    file.seek(SeekFrom::Start(start))?;
    Ok(file)
}

/// Chunked copy with a transfer-log checkpoint every `log_flush_interval` bytes
fn copy_chunks<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    start: u64,
    total: u64,
    unit: &TransferUnit,
    ctx: &TransferContext<'_>,
) -> Result<u64> {
    let mut buffer = vec![0u8; ctx.config.chunk_size.max(1)];
    let mut position = start;
    let mut since_checkpoint = 0u64;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buffer[..n])?;
        position += n as u64;
        since_checkpoint += n as u64;

        if since_checkpoint >= ctx.config.log_flush_interval {
            writer.flush()?;
            ctx.log
                .save_transfer(LogEntry::active(unit, position, total.max(position)));
            since_checkpoint = 0;
        }
    }

    Ok(position)
}

/// Close out a data command after a failed copy so the session can be reused
fn abort_pending(session: &mut dyn SessionAdapter, path: &str) {
    match session.complete_pending_transfer() {
        Ok(_) => debug!(path = %path, reply = %session.last_reply_text(), "Pending transfer closed"),
        Err(e) => debug!(path = %path, error = %e, "Failed to close pending transfer"),
    }
}

fn report_reply(session: &dyn SessionAdapter, ctx: &TransferContext<'_>) -> String {
    let reply = session.last_reply_text().trim().to_string();
    if !reply.is_empty() {
        ctx.reporter.report(StatusKind::Reply, reply.clone());
    }
    reply
}

fn reply_or(reply: &str, fallback: &str) -> String {
    if reply.is_empty() {
        fallback.to_string()
    } else {
        reply.to_string()
    }
}
