/*!
 * UI dispatch port and callback plumbing
 *
 * The engine never touches presentation state directly. Every Task mutation
 * and every callback is wrapped in a closure and handed to a `UiDispatcher`,
 * which runs it on whatever single-threaded context the embedding
 * application observes Tasks from. Jobs run in submission order.
 */

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A unit of work scheduled onto the UI context
pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

/// Schedules closures onto the presentation context
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, job: UiJob);
}

/// Runs jobs immediately on the calling thread
///
/// For headless embeddings and tests, where the worker thread itself is the
/// only writer.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl UiDispatcher for InlineDispatcher {
    fn dispatch(&self, job: UiJob) {
        job();
    }
}

/// Queues jobs on a channel drained by a `UiPump`
#[derive(Clone)]
pub struct ChannelDispatcher {
    sender: Sender<UiJob>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, UiPump) {
        let (tx, rx) = unbounded();
        (ChannelDispatcher { sender: tx }, UiPump { receiver: rx })
    }
}

impl UiDispatcher for ChannelDispatcher {
    fn dispatch(&self, job: UiJob) {
        // Pump dropped: the UI is gone and nobody observes Tasks anymore
        let _ = self.sender.send(job);
    }
}

/// Receiving end of a `ChannelDispatcher`, owned by the UI thread
pub struct UiPump {
    receiver: Receiver<UiJob>,
}

impl UiPump {
    /// Run every job queued so far without blocking
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for jobs, running everything that arrives
    pub fn run_for(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.receiver.recv_timeout(deadline - now) {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        ran
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

/// Kind tag for status-bar narration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// A reply line from the remote server
    Reply,
    Completed,
    Failed,
    Warning,
    Info,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Reply => "FTP",
            StatusKind::Completed => "Completed",
            StatusKind::Failed => "Failed",
            StatusKind::Warning => "Warning",
            StatusKind::Info => "Info",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(kind, message)` status-bar hook
pub type StatusCallback = Arc<dyn Fn(StatusKind, &str) + Send + Sync>;

/// Fired once the queue drains with every Task terminal
pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

/// Sends status narration through the dispatcher
#[derive(Clone)]
pub struct StatusReporter {
    dispatcher: Arc<dyn UiDispatcher>,
    callback: Option<StatusCallback>,
}

impl StatusReporter {
    pub fn new(dispatcher: Arc<dyn UiDispatcher>, callback: Option<StatusCallback>) -> Self {
        Self {
            dispatcher,
            callback,
        }
    }

    pub fn report(&self, kind: StatusKind, message: impl Into<String>) {
        if let Some(callback) = &self.callback {
            let callback = callback.clone();
            let message = message.into();
            self.dispatcher
                .dispatch(Box::new(move || callback(kind, &message)));
        }
    }
}
