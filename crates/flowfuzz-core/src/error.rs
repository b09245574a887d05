//! Application error types with rich context

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Device Bridge Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Device bridge not found. Put adb (or hdc) on PATH, or set its path under [bridge].")]
    BridgeNotFound,

    #[error("Device bridge unavailable: {message}")]
    BridgeUnavailable { message: String },

    #[error("Device command '{operation}' timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    #[error("No device attached")]
    NoDevice,

    // ─────────────────────────────────────────────────────────────
    // Action Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Unsupported action: {tag}")]
    UnsupportedAction { tag: String },

    #[error("Invalid action parameters: {message}")]
    InvalidAction { message: String },

    // ─────────────────────────────────────────────────────────────
    // Run Lifecycle Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Test case generation failed: {message}")]
    GenerationFailure { message: String },

    #[error("Persistence checkpoint failed: {message}")]
    PersistenceFailure { message: String },

    #[error("Task {task_id} is already running")]
    AlreadyRunning { task_id: String },

    #[error("Task {task_id} is not running")]
    NotRunning { task_id: String },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Invalid task id '{task_id}': must be a single path component")]
    InvalidTaskId { task_id: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn bridge(message: impl Into<String>) -> Self {
        Self::BridgeUnavailable {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn unsupported_action(tag: impl Into<String>) -> Self {
        Self::UnsupportedAction { tag: tag.into() }
    }

    pub fn invalid_action(message: impl Into<String>) -> Self {
        Self::InvalidAction {
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationFailure {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceFailure {
            message: message.into(),
        }
    }

    pub fn already_running(task_id: impl Into<String>) -> Self {
        Self::AlreadyRunning {
            task_id: task_id.into(),
        }
    }

    pub fn not_running(task_id: impl Into<String>) -> Self {
        Self::NotRunning {
            task_id: task_id.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_task_id(task_id: impl Into<String>) -> Self {
        Self::InvalidTaskId {
            task_id: task_id.into(),
        }
    }

    /// Failures that are local to one action or one checkpoint.
    ///
    /// The run records them and moves on to the next action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::BridgeUnavailable { .. }
                | Error::Timeout { .. }
                | Error::UnsupportedAction { .. }
                | Error::InvalidAction { .. }
                | Error::PersistenceFailure { .. }
        )
    }

    /// Failures that end the run, during setup or inside a test case.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::BridgeNotFound
                | Error::NoDevice
                | Error::GenerationFailure { .. }
                | Error::AlreadyRunning { .. }
                | Error::InvalidTaskId { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
