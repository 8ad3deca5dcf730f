//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assert_fs::prelude::*;
use assert_fs::TempDir;
use crossbeam_channel::Receiver;
use shuttle::{
    EngineConfig, InlineDispatcher, LocalSession, RemoteEntry, Result, SessionAdapter, Task,
    TransferLog, TransferQueue,
};

pub const WAIT: Duration = Duration::from_secs(20);

/// Deterministic, non-repeating-per-window test content
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// `photos/` with three files and a `trip/` subdirectory holding two more
pub fn photos_tree(root: &TempDir) {
    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        root.child("photos").child(name).write_str(name).unwrap();
    }
    for name in ["d.jpg", "e.jpg"] {
        root.child("photos/trip").child(name).write_str(name).unwrap();
    }
}

pub fn log_at(state: &Path) -> Arc<TransferLog> {
    Arc::new(TransferLog::new(
        state.join("transfer_log.json"),
        chrono::Duration::hours(24),
    ))
}

/// Queue with inline dispatch so Tasks are observable without a UI pump
pub fn inline_queue(config: EngineConfig, log: Arc<TransferLog>) -> TransferQueue {
    TransferQueue::new(config, log, Arc::new(InlineDispatcher))
}

/// Completed and failed are exclusive; completion means full progress
pub fn assert_task_invariants(tasks: &[Task]) {
    for task in tasks {
        assert!(!(task.completed && task.failed), "{} is both", task.display_name);
        if task.completed {
            assert_eq!(task.progress, 1.0, "{}", task.display_name);
            assert!(task.error_message.is_none());
        }
        if task.failed {
            assert!(task.error_message.is_some(), "{}", task.display_name);
        }
    }
}

/// Poll `condition` until it holds or the wait budget runs out
pub fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Stream openings observed by a `ScriptedSession`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    Download { path: String, offset: u64 },
    Upload(String),
    Append(String),
}

/// `LocalSession` wrapper with fault injection and stream recording
pub struct ScriptedSession {
    inner: LocalSession,
    pub opened: Arc<Mutex<Vec<Opened>>>,
    fail: Option<(String, u64)>,
    gate: Option<(String, Receiver<()>)>,
    panic_on: Option<String>,
    completion_override: Option<bool>,
    append: bool,
}

impl ScriptedSession {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: LocalSession::new(root).unwrap(),
            opened: Arc::new(Mutex::new(Vec::new())),
            fail: None,
            gate: None,
            panic_on: None,
            completion_override: None,
            append: true,
        }
    }

    /// Reads of `path` fail with a connection reset after `bytes`
    pub fn fail_download_after(mut self, path: &str, bytes: u64) -> Self {
        self.fail = Some((path.to_string(), bytes));
        self
    }

    /// The first read of `path` blocks until `gate` receives or closes
    pub fn hold_download(mut self, path: &str, gate: Receiver<()>) -> Self {
        self.gate = Some((path.to_string(), gate));
        self
    }

    /// Opening `path` for download panics inside the adapter
    pub fn panic_on_download(mut self, path: &str) -> Self {
        self.panic_on = Some(path.to_string());
        self
    }

    /// Report this value from every `complete_pending_transfer`
    pub fn complete_with(mut self, value: bool) -> Self {
        self.completion_override = Some(value);
        self
    }

    pub fn without_append(mut self) -> Self {
        self.append = false;
        self
    }

    pub fn recorder(&self) -> Arc<Mutex<Vec<Opened>>> {
        self.opened.clone()
    }

    fn record(&self, event: Opened) {
        self.opened.lock().unwrap().push(event);
    }
}

impl SessionAdapter for ScriptedSession {
    fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.inner.list(path)
    }

    fn change_directory(&mut self, path: &str) -> Result<bool> {
        self.inner.change_directory(path)
    }

    fn current_directory(&mut self) -> Result<String> {
        self.inner.current_directory()
    }

    fn create_directory(&mut self, path: &str) -> Result<bool> {
        self.inner.create_directory(path)
    }

    fn open_upload_stream(&mut self, path: &str) -> Result<Box<dyn Write + '_>> {
        self.record(Opened::Upload(path.to_string()));
        self.inner.open_upload_stream(path)
    }

    fn open_download_stream(&mut self, path: &str) -> Result<Box<dyn Read + '_>> {
        self.open_download_stream_at(path, 0)
    }

    fn complete_pending_transfer(&mut self) -> Result<bool> {
        let ok = self.inner.complete_pending_transfer()?;
        Ok(self.completion_override.unwrap_or(ok))
    }

    fn last_reply_text(&self) -> String {
        self.inner.last_reply_text()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn open_download_stream_at(&mut self, path: &str, offset: u64) -> Result<Box<dyn Read + '_>> {
        self.record(Opened::Download {
            path: path.to_string(),
            offset,
        });
        if self.panic_on.as_deref() == Some(path) {
            panic!("adapter blew up opening {}", path);
        }
        let fail_after = match &self.fail {
            Some((p, bytes)) if p == path => Some(*bytes),
            _ => None,
        };
        let gate = match &self.gate {
            Some((p, rx)) if p == path => Some(rx.clone()),
            _ => None,
        };

        let stream = self.inner.open_download_stream_at(path, offset)?;
        Ok(Box::new(ScriptedReader {
            inner: stream,
            remaining: fail_after,
            gate,
        }))
    }

    fn supports_append(&self) -> bool {
        self.append
    }

    fn open_append_stream(&mut self, path: &str) -> Result<Box<dyn Write + '_>> {
        self.record(Opened::Append(path.to_string()));
        self.inner.open_append_stream(path)
    }
}

struct ScriptedReader<R> {
    inner: R,
    remaining: Option<u64>,
    gate: Option<Receiver<()>>,
}

impl<R: Read> Read for ScriptedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(gate) = self.gate.take() {
            let _ = gate.recv();
        }
        match self.remaining {
            Some(0) => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "simulated connection reset",
            )),
            Some(left) => {
                let cap = buf.len().min(left as usize);
                let n = self.inner.read(&mut buf[..cap])?;
                self.remaining = Some(left - n as u64);
                Ok(n)
            }
            None => self.inner.read(buf),
        }
    }
}
