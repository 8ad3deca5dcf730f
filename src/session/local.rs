/*!
 * Directory-rooted session adapter
 *
 * Serves a local directory through the session contract, with FTP-style
 * reply lines. The binary uses it as a stand-in server and the tests use it
 * as the remote side of every scenario.
 */

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::{RemoteEntry, SessionAdapter};
use crate::error::{Result, ShuttleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Upload,
    Download,
}

/// Session adapter over a local directory tree
#[derive(Debug)]
pub struct LocalSession {
    root: PathBuf,
    cwd: String,
    last_reply: String,
    pending: Option<PendingKind>,
    connected: bool,
}

impl LocalSession {
    /// Serve `root` as the remote `/`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ShuttleError::Setup(format!(
                "session root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            cwd: "/".to_string(),
            last_reply: "220 Service ready".to_string(),
            pending: None,
            connected: true,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Drop the connection; later units fail with a setup error
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.last_reply = "221 Goodbye".to_string();
    }

    /// Map a remote path onto the served directory, never escaping the root
    pub fn resolve(&self, path: &str) -> PathBuf {
        let absolute = if path.starts_with('/') {
            path.to_string()
        } else {
            super::join_remote(&self.cwd, path)
        };

        let mut parts: Vec<String> = Vec::new();
        for component in Path::new(&absolute).components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::ParentDir => {
                    parts.pop();
                }
                _ => {}
            }
        }

        parts.iter().fold(self.root.clone(), |acc, p| acc.join(p))
    }

    fn reply(&mut self, text: impl Into<String>) {
        self.last_reply = text.into();
        debug!(reply = %self.last_reply, "local session reply");
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ShuttleError::Setup("session is disconnected".to_string()))
        }
    }

    fn begin(&mut self, kind: PendingKind) -> Result<()> {
        if self.pending.is_some() {
            return Err(ShuttleError::protocol(
                "425 a data transfer is already pending",
            ));
        }
        self.pending = Some(kind);
        self.reply("150 Opening BINARY mode data connection");
        Ok(())
    }

    fn entry_for(path: &Path, name: String) -> Result<RemoteEntry> {
        let meta = fs::metadata(path)?;
        Ok(RemoteEntry {
            name,
            is_directory: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().ok(),
        })
    }

    fn open_for_write(&mut self, path: &str, append: bool) -> Result<File> {
        self.ensure_connected()?;
        let local = self.resolve(path);
        match local.parent() {
            Some(parent) if parent.is_dir() => {}
            _ => {
                self.reply(format!("553 Could not create file: {}", path));
                return Err(ShuttleError::protocol(self.last_reply.clone()));
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&local)?;
        Ok(file)
    }
}

impl SessionAdapter for LocalSession {
    fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.ensure_connected()?;
        let local = self.resolve(path);

        if local.is_dir() {
            let mut entries = Vec::new();
            for dir_entry in fs::read_dir(&local)? {
                let dir_entry = dir_entry?;
                let name = dir_entry.file_name().to_string_lossy().into_owned();
                entries.push(Self::entry_for(&dir_entry.path(), name)?);
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            self.reply("226 Directory send OK");
            Ok(entries)
        } else if local.is_file() {
            let name = super::remote_file_name(path).to_string();
            let entry = Self::entry_for(&local, name)?;
            self.reply("226 Directory send OK");
            Ok(vec![entry])
        } else {
            self.reply(format!("550 {}: No such file or directory", path));
            Err(ShuttleError::protocol(self.last_reply.clone()))
        }
    }

    fn change_directory(&mut self, path: &str) -> Result<bool> {
        self.ensure_connected()?;
        if self.resolve(path).is_dir() {
            let absolute = self
                .resolve(path)
                .strip_prefix(&self.root)
                .map(|rel| {
                    let rel = rel.to_string_lossy().replace('\\', "/");
                    format!("/{}", rel)
                })
                .unwrap_or_else(|_| "/".to_string());
            self.cwd = absolute;
            self.reply("250 Directory successfully changed");
            Ok(true)
        } else {
            self.reply("550 Failed to change directory");
            Ok(false)
        }
    }

    fn current_directory(&mut self) -> Result<String> {
        self.ensure_connected()?;
        self.reply(format!("257 \"{}\" is the current directory", self.cwd));
        Ok(self.cwd.clone())
    }

    fn create_directory(&mut self, path: &str) -> Result<bool> {
        self.ensure_connected()?;
        let local = self.resolve(path);
        if local.is_dir() {
            self.reply(format!("550 {}: File exists", path));
            return Ok(false);
        }
        match fs::create_dir(&local) {
            Ok(()) => {
                self.reply(format!("257 \"{}\" created", path));
                Ok(true)
            }
            Err(e) => {
                self.reply(format!("550 Create directory operation failed: {}", e));
                Ok(false)
            }
        }
    }

    fn open_upload_stream(&mut self, path: &str) -> Result<Box<dyn Write + '_>> {
        let file = self.open_for_write(path, false)?;
        self.begin(PendingKind::Upload)?;
        Ok(Box::new(file))
    }

    fn open_download_stream(&mut self, path: &str) -> Result<Box<dyn Read + '_>> {
        self.open_download_stream_at(path, 0)
    }

    fn complete_pending_transfer(&mut self) -> Result<bool> {
        match self.pending.take() {
            Some(kind) => {
                debug!(?kind, "completing pending transfer");
                self.reply("226 Transfer complete");
                Ok(true)
            }
            None => {
                self.reply("503 No transfer in progress");
                Ok(false)
            }
        }
    }

    fn last_reply_text(&self) -> String {
        self.last_reply.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn open_download_stream_at(&mut self, path: &str, offset: u64) -> Result<Box<dyn Read + '_>> {
        self.ensure_connected()?;
        let local = self.resolve(path);
        if !local.is_file() {
            self.reply(format!("550 {}: No such file", path));
            return Err(ShuttleError::protocol(self.last_reply.clone()));
        }
        let mut file = File::open(&local)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        self.begin(PendingKind::Download)?;
        if offset > 0 {
            self.reply(format!("350 Restarting at {}", offset));
        }
        Ok(Box::new(file))
    }

    fn supports_append(&self) -> bool {
        true
    }

    fn open_append_stream(&mut self, path: &str) -> Result<Box<dyn Write + '_>> {
        let file = self.open_for_write(path, true)?;
        self.begin(PendingKind::Upload)?;
        Ok(Box::new(file))
    }
}
