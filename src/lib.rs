/*!
 * Shuttle - background transfer engine for a dual-pane file manager
 *
 * Moves files and directory trees between the local filesystem and a remote
 * server over a single stateful session:
 * - Tree expansion into an ordered, pre-order unit queue
 * - One background worker per queue, one data stream per session
 * - Byte-level progress published to a UI-owned Task collection
 * - A JSON transfer log for resume after restart, with corruption recovery
 * - Per-unit failure isolation
 */

pub mod cli_progress;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod session;

// Re-export commonly used types
pub use config::{EngineConfig, ExistingFilePolicy, LogLevel};
pub use core::{
    ChannelDispatcher, Direction, EnqueueReport, InlineDispatcher, LogEntry, QueueSummary,
    StatusKind, Task, TaskList, TransferLog, TransferQueue, TransferUnit, UiDispatcher, UiPump,
};
pub use error::{Result, ShuttleError};
pub use session::{shared, LocalSession, RemoteEntry, SessionAdapter, SharedSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
