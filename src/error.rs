/*!
 * Error types for the transfer engine
 */

use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShuttleError>;

/// Exit code constants for the command-line front end
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum ShuttleError {
    /// No usable session for the unit (disconnected or poisoned adapter)
    #[error("Session unavailable: {0}")]
    Setup(String),

    /// Local or stream I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Listing, directory creation or reply failure reported by the session
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        already_exists: bool,
    },

    /// The session reported an unsuccessful transfer
    #[error("Transfer failed for {path}: {reason}")]
    TransferFailed { path: String, reason: String },

    /// The transfer log could not be parsed
    #[error("Transfer log corrupted: {0}")]
    LogCorruption(String),

    /// The transfer log could not be written
    #[error("Transfer log write failed: {0}")]
    LogWrite(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The queue was shut down and no longer accepts work
    #[error("Transfer queue is shut down")]
    QueueClosed,

    /// Expansion hit the unit cap
    #[error("Queue truncated at {limit} units ({dropped} dropped)")]
    QueueTruncated { limit: usize, dropped: usize },
}

impl ShuttleError {
    /// Protocol failure that is not an "already exists" reply
    pub fn protocol(message: impl Into<String>) -> Self {
        ShuttleError::Protocol {
            message: message.into(),
            already_exists: false,
        }
    }

    /// Protocol failure classified as "already exists"
    pub fn already_exists(message: impl Into<String>) -> Self {
        ShuttleError::Protocol {
            message: message.into(),
            already_exists: true,
        }
    }

    pub fn transfer_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ShuttleError::TransferFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for "already exists"-class failures, which directory creation treats as success
    pub fn is_already_exists(&self) -> bool {
        match self {
            ShuttleError::Protocol { already_exists, .. } => *already_exists,
            ShuttleError::Io(e) => e.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }

    /// Check if this error should abort the current unit
    ///
    /// Log errors never reach transfer logic, so they are the only non-fatal kind here.
    pub fn is_unit_fatal(&self) -> bool {
        !matches!(
            self,
            ShuttleError::LogCorruption(_) | ShuttleError::LogWrite(_)
        ) && !self.is_already_exists()
    }

    /// Get error category for logging and status narration
    pub fn category(&self) -> ErrorCategory {
        match self {
            ShuttleError::Setup(_) => ErrorCategory::Setup,
            ShuttleError::Io(_) | ShuttleError::TransferFailed { .. } => ErrorCategory::Io,
            ShuttleError::Protocol { .. } => ErrorCategory::Protocol,
            ShuttleError::LogCorruption(_)
            | ShuttleError::LogWrite(_)
            | ShuttleError::Serialization(_) => ErrorCategory::Log,
            ShuttleError::Config(_) => ErrorCategory::Configuration,
            ShuttleError::QueueClosed | ShuttleError::QueueTruncated { .. } => ErrorCategory::Queue,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Setup | ErrorCategory::Configuration => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }
}

/// Error categories for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Setup,
    Io,
    Protocol,
    Log,
    Configuration,
    Queue,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Setup => "setup",
            ErrorCategory::Io => "io",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Log => "log",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Queue => "queue",
        };
        write!(f, "{}", name)
    }
}
