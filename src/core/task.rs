/*!
 * Task model: the UI-facing progress record for one unit
 */

use std::sync::{Arc, PoisonError, RwLock};

use super::dispatch::UiDispatcher;
use super::unit::{Direction, TransferUnit};

/// Mutable progress record for one in-flight or finished unit
///
/// `completed` and `failed` are mutually exclusive terminal flags; once either
/// is set every mutator becomes a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub source: String,
    pub destination: String,
    pub display_name: String,
    pub direction: Direction,
    pub bytes_transferred: u64,
    /// 0 while unknown (and for containers)
    pub total_bytes: u64,
    pub progress: f64,
    pub status: String,
    pub completed: bool,
    pub failed: bool,
    pub error_message: Option<String>,
}

impl Task {
    pub fn from_unit(unit: &TransferUnit) -> Self {
        Self {
            source: unit.source.clone(),
            destination: unit.destination.clone(),
            display_name: unit.display_name.clone(),
            direction: unit.direction,
            bytes_transferred: 0,
            total_bytes: 0,
            progress: 0.0,
            status: "Waiting...".to_string(),
            completed: false,
            failed: false,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.completed || self.failed
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        if !self.is_terminal() {
            self.status = status.into();
        }
    }

    pub fn set_total_bytes(&mut self, total: u64) {
        if !self.is_terminal() {
            self.total_bytes = total;
            self.recompute_progress();
        }
    }

    /// Record a new byte count, keeping `bytes_transferred <= total_bytes`
    pub fn set_bytes_transferred(&mut self, bytes: u64) {
        if self.is_terminal() {
            return;
        }
        self.bytes_transferred = bytes;
        if self.total_bytes > 0 && bytes > self.total_bytes {
            // Source grew while being read
            self.total_bytes = bytes;
        }
        self.recompute_progress();
    }

    fn recompute_progress(&mut self) {
        if self.total_bytes > 0 {
            self.progress = (self.bytes_transferred as f64 / self.total_bytes as f64).min(1.0);
        }
    }

    pub fn mark_completed(&mut self) {
        self.finish_completed("Completed");
    }

    /// Completed without transferring, e.g. destination kept by policy
    pub fn mark_skipped(&mut self, reason: &str) {
        self.finish_completed(&format!("Skipped ({})", reason));
    }

    fn finish_completed(&mut self, status: &str) {
        if self.is_terminal() {
            return;
        }
        self.progress = 1.0;
        self.status = status.to_string();
        self.completed = true;
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        let message = message.into();
        self.status = format!("Error: {}", message);
        self.error_message = Some(message);
        self.failed = true;
    }
}

/// Shared handle to one Task
#[derive(Debug, Clone)]
pub struct TaskHandle(Arc<RwLock<Task>>);

impl TaskHandle {
    pub fn new(task: Task) -> Self {
        TaskHandle(Arc::new(RwLock::new(task)))
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Task {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Mutate in place; call only from the UI context
    pub fn update(&self, f: impl FnOnce(&mut Task)) {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Schedule a mutation onto the UI context
    pub fn post(
        &self,
        dispatcher: &dyn UiDispatcher,
        f: impl FnOnce(&mut Task) + Send + 'static,
    ) {
        let handle = self.clone();
        dispatcher.dispatch(Box::new(move || handle.update(f)));
    }
}

/// Append-only observed collection of Tasks
#[derive(Debug, Clone, Default)]
pub struct TaskList {
    inner: Arc<RwLock<Vec<TaskHandle>>>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, handle: TaskHandle) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<TaskHandle> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    pub fn handles(&self) -> Vec<TaskHandle> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.handles().iter().map(TaskHandle::snapshot).collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.snapshot().iter().all(Task::is_terminal)
    }

    pub fn summary(&self) -> QueueSummary {
        QueueSummary::from_tasks(&self.snapshot())
    }
}

/// Counts over the observed Tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub bytes_transferred: u64,
}

impl QueueSummary {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut summary = QueueSummary {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            if task.completed {
                summary.completed += 1;
            } else if task.failed {
                summary.failed += 1;
            } else {
                summary.pending += 1;
            }
            summary.bytes_transferred += task.bytes_transferred;
        }
        summary
    }
}
