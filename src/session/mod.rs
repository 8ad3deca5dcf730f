/*!
 * Session adapter contract
 *
 * The engine drives exactly one remote connection per adapter. An adapter
 * exposes directory listing, directory creation, stream-based upload and
 * download, and reply inspection. Streams borrow the adapter mutably, so a
 * data stream must be dropped before the pending transfer is completed and
 * no two streams can be open on one connection at the same time.
 */

pub mod local;

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::error::{Result, ShuttleError};

pub use local::LocalSession;

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
            size,
            modified: None,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            size: 0,
            modified: None,
        }
    }

    /// `.` and `..` pseudo-entries some servers include in listings
    pub fn is_dot_entry(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// Capability contract the transfer engine needs from a protocol session
pub trait SessionAdapter: Send {
    /// List a directory, or the single entry for a file path
    fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>>;

    fn change_directory(&mut self, path: &str) -> Result<bool>;

    fn current_directory(&mut self) -> Result<String>;

    /// Create one directory level
    ///
    /// Callers must not distinguish "already exists" from success.
    fn create_directory(&mut self, path: &str) -> Result<bool>;

    /// Open a stream that replaces the remote file
    fn open_upload_stream(&mut self, path: &str) -> Result<Box<dyn Write + '_>>;

    fn open_download_stream(&mut self, path: &str) -> Result<Box<dyn Read + '_>>;

    /// Finish the command behind the last data stream
    fn complete_pending_transfer(&mut self) -> Result<bool>;

    fn last_reply_text(&self) -> String;

    fn is_connected(&self) -> bool {
        true
    }

    /// Open a download stream positioned at `offset`
    ///
    /// Adapters without a restart command get the bytes before `offset`
    /// read and discarded.
    fn open_download_stream_at(&mut self, path: &str, offset: u64) -> Result<Box<dyn Read + '_>> {
        let mut stream = self.open_download_stream(path)?;
        if offset > 0 {
            let skipped = io::copy(&mut stream.by_ref().take(offset), &mut io::sink())?;
            if skipped < offset {
                return Err(ShuttleError::transfer_failed(
                    path,
                    format!("remote stream ended at {} before resume offset {}", skipped, offset),
                ));
            }
        }
        Ok(stream)
    }

    /// Whether `open_append_stream` is available
    fn supports_append(&self) -> bool {
        false
    }

    /// Open a stream that appends to the remote file
    fn open_append_stream(&mut self, path: &str) -> Result<Box<dyn Write + '_>> {
        Err(ShuttleError::protocol(format!(
            "append not supported by this session: {}",
            path
        )))
    }
}

/// A session shared between the queue and its worker
pub type SharedSession = Arc<Mutex<dyn SessionAdapter>>;

/// Wrap an adapter for use with the transfer queue
pub fn shared<S: SessionAdapter + 'static>(session: S) -> SharedSession {
    Arc::new(Mutex::new(session))
}

/// Join a remote directory path and a child name with `/`
pub fn join_remote(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Last path component of a remote path
pub fn remote_file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Parent of a remote path, `None` for the root
pub fn remote_parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => Some(".".to_string()),
    }
}

/// Look up a remote path through its parent's listing
///
/// The parent listing is authoritative for the entry's kind. Returns `None`
/// when the parent lists no entry with that name.
pub fn stat_remote(session: &mut dyn SessionAdapter, path: &str) -> Result<Option<RemoteEntry>> {
    let name = remote_file_name(path);
    match remote_parent(path) {
        Some(parent) => {
            let entries = session.list(&parent)?;
            Ok(entries.into_iter().find(|e| e.name == name))
        }
        None => Ok(Some(RemoteEntry::directory("/"))),
    }
}

/// Classify an "already exists" reply from a directory creation command
pub fn is_already_exists_reply(reply: &str) -> bool {
    let reply = reply.trim();
    reply.starts_with("521") || reply.to_ascii_lowercase().contains("exist")
}
