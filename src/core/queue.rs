/*!
 * Transfer queue and background worker
 *
 * Uploads are expanded on the caller's thread. Download requests are queued
 * as-is and expanded by the worker under its own session lock, so enqueueing
 * never waits on a transfer in flight. A single worker thread drains the
 * queue in order. Each unit gets one Task, published through the UI
 * dispatcher before any of its fields change. A failing unit is recorded
 * and the worker moves on.
 */

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn};

use super::dispatch::{
    CompletionCallback, StatusCallback, StatusKind, StatusReporter, UiDispatcher,
};
use super::expand::{plan_download, plan_upload, ExpandLimits, Expansion};
use super::progress::UnitCounter;
use super::task::{Task, TaskHandle, TaskList};
use super::transfer::{create_container, download_file, upload_file, TransferContext, TransferOutcome};
use super::transfer_log::{LogEntry, TransferLog};
use super::unit::{Direction, TransferUnit};
use crate::config::EngineConfig;
use crate::error::{Result, ShuttleError};
use crate::session::{SessionAdapter, SharedSession};

/// What one `enqueue_*` call added
///
/// Downloads are expanded on the worker: their roots count as `deferred`,
/// and a truncated expansion is announced through a Warning status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    pub queued: usize,
    /// Download roots waiting for the worker to expand them
    pub deferred: usize,
    /// The unit cap was hit and `dropped` units were left out
    pub truncated: bool,
    pub dropped: usize,
}

struct QueuedUnit {
    unit: TransferUnit,
    session: SharedSession,
}

struct DownloadRequest {
    remote_paths: Vec<String>,
    local_dir: PathBuf,
    session: SharedSession,
}

enum Job {
    Expand(DownloadRequest),
    Unit(QueuedUnit),
}

struct QueueState {
    pending: VecDeque<Job>,
    /// Jobs accepted since the worker last started; bounds its iterations
    accepted: usize,
    worker_active: bool,
    accepting: bool,
}

#[derive(Default)]
struct Callbacks {
    completion: Option<CompletionCallback>,
    status: Option<StatusCallback>,
}

struct Shared {
    state: Mutex<QueueState>,
    idle: Condvar,
    tasks: TaskList,
    log: Arc<TransferLog>,
    dispatcher: Arc<dyn UiDispatcher>,
    config: EngineConfig,
    callbacks: RwLock<Callbacks>,
}

/// Single-worker transfer queue
pub struct TransferQueue {
    shared: Arc<Shared>,
}

impl TransferQueue {
    pub fn new(config: EngineConfig, log: Arc<TransferLog>, dispatcher: Arc<dyn UiDispatcher>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    accepted: 0,
                    worker_active: false,
                    accepting: true,
                }),
                idle: Condvar::new(),
                tasks: TaskList::new(),
                log,
                dispatcher,
                config,
                callbacks: RwLock::new(Callbacks::default()),
            }),
        }
    }

    /// Queue remote files and trees for download into `local_dir`
    ///
    /// Returns without touching the session; the worker lists the remote
    /// side when it reaches this request.
    pub fn enqueue_download<S: AsRef<str>>(
        &self,
        remote_paths: &[S],
        local_dir: &Path,
        session: SharedSession,
    ) -> Result<EnqueueReport> {
        let request = DownloadRequest {
            remote_paths: remote_paths.iter().map(|p| p.as_ref().to_string()).collect(),
            local_dir: local_dir.to_path_buf(),
            session,
        };
        let deferred = request.remote_paths.len();

        let mut state = self.shared.lock_state();
        if !state.accepting {
            return Err(ShuttleError::QueueClosed);
        }
        if deferred > 0 {
            state.pending.push_back(Job::Expand(request));
            state.accepted += 1;
            debug!(roots = deferred, "Download request queued for expansion");
            self.shared.ensure_worker(&mut state)?;
        }

        Ok(EnqueueReport {
            deferred,
            ..Default::default()
        })
    }

    /// Queue local files and trees for upload into `remote_dir`
    pub fn enqueue_upload<P: AsRef<Path>>(
        &self,
        local_paths: &[P],
        remote_dir: &str,
        session: SharedSession,
    ) -> Result<EnqueueReport> {
        let limits = {
            let state = self.shared.lock_state();
            if !state.accepting {
                return Err(ShuttleError::QueueClosed);
            }
            self.shared.limits(&state)
        };
        let expansion = plan_upload(local_paths, remote_dir, limits);
        self.submit(expansion, limits, session)
    }

    /// Live, append-only Task collection for UI binding
    pub fn tasks(&self) -> TaskList {
        self.shared.tasks.clone()
    }

    pub fn set_completion_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared.callbacks_mut().completion = Some(Arc::new(callback));
    }

    pub fn set_status_callback(&self, callback: impl Fn(StatusKind, &str) + Send + Sync + 'static) {
        self.shared.callbacks_mut().status = Some(Arc::new(callback));
    }

    /// Stop accepting work and discard units that have not started
    ///
    /// The unit in flight runs to completion. A download request being
    /// expanded at this moment is dropped once its listing returns.
    pub fn shutdown(&self) {
        let discarded = {
            let mut state = self.shared.lock_state();
            state.accepting = false;
            let discarded = state.pending.len();
            state.pending.clear();
            discarded
        };
        info!(discarded, "Transfer queue shut down");
    }

    /// Units and download requests waiting behind the one in flight
    pub fn pending_units(&self) -> usize {
        self.shared.lock_state().pending.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock_state();
        !state.worker_active && state.pending.is_empty()
    }

    /// Block until the worker drains or `timeout` elapses; true if drained
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock_state();
        while state.worker_active || !state.pending.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        true
    }

    fn submit(
        &self,
        expansion: Expansion,
        limits: ExpandLimits,
        session: SharedSession,
    ) -> Result<EnqueueReport> {
        let report = EnqueueReport {
            queued: expansion.units.len(),
            deferred: 0,
            truncated: expansion.is_truncated(),
            dropped: expansion.dropped,
        };
        if report.truncated {
            self.shared.warn_truncated(limits, report.dropped);
        }

        let mut state = self.shared.lock_state();
        if !state.accepting {
            return Err(ShuttleError::QueueClosed);
        }
        state
            .pending
            .extend(expansion.units.into_iter().map(|unit| {
                Job::Unit(QueuedUnit {
                    unit,
                    session: session.clone(),
                })
            }));
        state.accepted += report.queued;
        debug!(queued = report.queued, pending = state.pending.len(), "Units enqueued");
        self.shared.ensure_worker(&mut state)?;

        Ok(report)
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks_mut(&self) -> RwLockWriteGuard<'_, Callbacks> {
        self.callbacks.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn limits(&self, state: &QueueState) -> ExpandLimits {
        ExpandLimits {
            max_depth: self.config.max_depth,
            max_units: self.config.max_queue_units.saturating_sub(state.pending.len()),
        }
    }

    /// Start the worker if it is not running and there is work for it
    fn ensure_worker(self: &Arc<Self>, state: &mut QueueState) -> Result<()> {
        if !state.worker_active && !state.pending.is_empty() {
            let shared = self.clone();
            let _worker = thread::Builder::new()
                .name("shuttle-worker".to_string())
                .spawn(move || worker_loop(shared))?;
            state.worker_active = true;
        }
        Ok(())
    }

    fn warn_truncated(&self, limits: ExpandLimits, dropped: usize) {
        let err = ShuttleError::QueueTruncated {
            limit: self.config.max_queue_units,
            dropped,
        };
        warn!(available = limits.max_units, "{}", err);
        self.reporter().report(StatusKind::Warning, err.to_string());
    }

    fn reporter(&self) -> StatusReporter {
        let status = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
            .clone();
        StatusReporter::new(self.dispatcher.clone(), status)
    }

    /// Fire the completion hook on the UI context once every Task is terminal
    fn dispatch_completion_check(&self) {
        let completion = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .completion
            .clone();
        if let Some(callback) = completion {
            let tasks = self.tasks.clone();
            self.dispatcher.dispatch(Box::new(move || {
                if tasks.all_terminal() {
                    callback();
                }
            }));
        }
    }
}

/// Lock the session, taking it over from a unit that panicked while holding it
fn lock_session(session: &SharedSession) -> MutexGuard<'_, dyn SessionAdapter + 'static> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn worker_loop(shared: Arc<Shared>) {
    debug!("Transfer worker started");
    let mut iterations = 0usize;

    loop {
        let next = {
            let mut state = shared.lock_state();
            if iterations >= state.accepted && !state.pending.is_empty() {
                let abandoned = state.pending.len();
                state.pending.clear();
                drop(state);
                let err = ShuttleError::QueueTruncated {
                    limit: shared.config.max_queue_units,
                    dropped: abandoned,
                };
                warn!(iterations, "Worker ran past the accepted work: {}", err);
                shared.reporter().report(StatusKind::Warning, err.to_string());
                None
            } else {
                state.pending.pop_front()
            }
        };

        match next {
            Some(Job::Unit(queued)) => {
                iterations += 1;
                run_unit(&shared, queued);
            }
            Some(Job::Expand(request)) => {
                iterations += 1;
                expand_request(&shared, request);
            }
            None => {
                shared.dispatch_completion_check();
                let mut state = shared.lock_state();
                if state.pending.is_empty() {
                    state.worker_active = false;
                    state.accepted = 0;
                    shared.idle.notify_all();
                    break;
                }
            }
        }
    }
    debug!("Transfer worker idle");
}

/// List a download request and queue its units ahead of later requests
fn expand_request(shared: &Shared, request: DownloadRequest) {
    let DownloadRequest {
        remote_paths,
        local_dir,
        session,
    } = request;
    let limits = shared.limits(&shared.lock_state());

    let expansion = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut guard = lock_session(&session);
        plan_download(&mut *guard, &remote_paths[..], &local_dir, limits)
    }));
    let expansion = match expansion {
        Ok(expansion) => expansion,
        Err(_) => {
            error!(roots = remote_paths.len(), "Listing panicked, download request dropped");
            shared.reporter().report(
                StatusKind::Failed,
                format!("Listing failed: {}", remote_paths.join(", ")),
            );
            return;
        }
    };
    if expansion.is_truncated() {
        shared.warn_truncated(limits, expansion.dropped);
    }

    let mut state = shared.lock_state();
    if !state.accepting {
        debug!(units = expansion.units.len(), "Queue closed during listing, units dropped");
        return;
    }
    let queued = expansion.units.len();
    for unit in expansion.units.into_iter().rev() {
        state.pending.push_front(Job::Unit(QueuedUnit {
            unit,
            session: session.clone(),
        }));
    }
    state.accepted += queued;
    debug!(queued, pending = state.pending.len(), "Download request expanded");
}

fn run_unit(shared: &Shared, queued: QueuedUnit) {
    let QueuedUnit { unit, session } = queued;
    let span = info_span!("unit", name = %unit.display_name, direction = %unit.direction);
    let _enter = span.enter();

    let task = TaskHandle::new(Task::from_unit(&unit));
    {
        let tasks = shared.tasks.clone();
        let handle = task.clone();
        shared.dispatcher.dispatch(Box::new(move || tasks.push(handle)));
    }

    // An active entry is a resume point and must survive until the routine reads it
    let (source, destination) = unit.pair();
    if shared
        .log
        .find_incomplete_transfer(source, destination)
        .is_none()
    {
        shared.log.save_transfer(LogEntry::active(&unit, 0, 0));
    }

    let reporter = shared.reporter();
    let counter = UnitCounter::new();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        execute_unit(shared, &unit, &session, &task, &counter, &reporter)
    }))
    .unwrap_or_else(|_| {
        release_after_panic(&session);
        Err(ShuttleError::transfer_failed(&unit.source, "transfer routine panicked"))
    });

    match result {
        Ok(outcome) => finish_success(shared, &unit, &task, &reporter, outcome),
        Err(e) => finish_failure(shared, &unit, &task, &reporter, &counter, e),
    }
}

/// Close any data command the panicking routine left open
fn release_after_panic(session: &SharedSession) {
    let released = panic::catch_unwind(AssertUnwindSafe(|| {
        lock_session(session).complete_pending_transfer()
    }));
    match released {
        Ok(Ok(_)) => debug!("Session released after panic"),
        Ok(Err(e)) => debug!(error = %e, "Session release after panic failed"),
        Err(_) => warn!("Session panicked again while being released"),
    }
}

fn execute_unit(
    shared: &Shared,
    unit: &TransferUnit,
    session: &SharedSession,
    task: &TaskHandle,
    counter: &Arc<UnitCounter>,
    reporter: &StatusReporter,
) -> Result<TransferOutcome> {
    let mut guard = lock_session(session);
    if !guard.is_connected() {
        return Err(ShuttleError::Setup("session is disconnected".to_string()));
    }

    let ctx = TransferContext {
        log: &shared.log,
        task,
        counter,
        dispatcher: &shared.dispatcher,
        reporter,
        config: &shared.config,
    };

    if unit.is_container {
        create_container(&mut *guard, unit, &ctx)
    } else {
        match unit.direction {
            Direction::Download => download_file(&mut *guard, unit, &ctx),
            Direction::Upload => upload_file(&mut *guard, unit, &ctx),
        }
    }
}

fn finish_success(
    shared: &Shared,
    unit: &TransferUnit,
    task: &TaskHandle,
    reporter: &StatusReporter,
    outcome: TransferOutcome,
) {
    match outcome {
        TransferOutcome::Transferred { bytes, total } => {
            shared.log.save_transfer(LogEntry::completed(unit, bytes, total));
            task.post(shared.dispatcher.as_ref(), move |t| {
                t.set_total_bytes(total);
                t.set_bytes_transferred(bytes);
                t.mark_completed();
            });
            info!(bytes, "Unit completed");
            reporter.report(
                StatusKind::Completed,
                format!("{} completed: {}", unit.direction, unit.display_name),
            );
        }
        TransferOutcome::Skipped => {
            shared.log.save_transfer(LogEntry::completed(unit, 0, 0));
            task.post(shared.dispatcher.as_ref(), |t| t.mark_skipped("exists"));
            info!("Unit skipped, destination exists");
            reporter.report(
                StatusKind::Completed,
                format!("Skipped existing: {}", unit.display_name),
            );
        }
        TransferOutcome::ContainerReady => {
            shared.log.save_transfer(LogEntry::completed(unit, 0, 0));
            task.post(shared.dispatcher.as_ref(), |t| t.mark_completed());
            debug!("Container ready");
            reporter.report(
                StatusKind::Completed,
                format!("Directory ready: {}", unit.display_name),
            );
        }
    }
}

fn finish_failure(
    shared: &Shared,
    unit: &TransferUnit,
    task: &TaskHandle,
    reporter: &StatusReporter,
    counter: &UnitCounter,
    err: ShuttleError,
) {
    let message = err.to_string();
    if err.is_unit_fatal() {
        error!(category = %err.category(), error = %message, "Unit failed");
    } else {
        warn!(category = %err.category(), error = %message, "Unit stopped");
    }

    // The Task may still be waiting on the UI pump; the counter is current
    shared.log.save_transfer(LogEntry::failed(
        unit,
        counter.bytes(),
        counter.total(),
        message.clone(),
    ));

    let task_message = message.clone();
    task.post(shared.dispatcher.as_ref(), move |t| t.mark_failed(task_message));
    reporter.report(
        StatusKind::Failed,
        format!("{} failed: {}: {}", unit.direction, unit.display_name, message),
    );
}
