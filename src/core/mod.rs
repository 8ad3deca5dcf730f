/*!
 * Core transfer engine: units, tasks, the transfer log and the worker queue
 */

pub mod dispatch;
pub mod expand;
pub mod progress;
pub mod queue;
pub mod task;
pub mod transfer;
pub mod transfer_log;
pub mod unit;

pub use dispatch::{
    ChannelDispatcher, CompletionCallback, InlineDispatcher, StatusCallback, StatusKind,
    StatusReporter, UiDispatcher, UiJob, UiPump,
};
pub use expand::{plan_download, plan_upload, ExpandLimits, Expansion};
pub use progress::{format_status, ProgressReader, UnitCounter};
pub use queue::{EnqueueReport, TransferQueue};
pub use task::{QueueSummary, Task, TaskHandle, TaskList};
pub use transfer::{ResumeDecision, TransferOutcome};
pub use transfer_log::{LogEntry, TransferLog};
pub use unit::{Direction, TransferUnit};
