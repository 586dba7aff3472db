//! Error types for provisioning operations.
//!
//! Errors are categorized so the status poller can tell transient query
//! failures apart from problems that will not go away on their own.

use thiserror::Error;

/// Categories of provisioning errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad or missing specification, empty host list
    Configuration,
    /// The build backend refused or failed to start a build
    BuildStart,
    /// Status query failed (transient, retryable)
    Transport,
    /// The build never reached a terminal state within the poll bound
    Timeout,
    /// The requested operation has no implementation yet
    Unsupported,
    /// Configuration-management run failed for a built host
    ConfigApply,
    /// Internal fault (panic inside a task, I/O)
    Internal,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport)
    }
}

/// Errors that can occur while provisioning hosts.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid invocation or specification; nothing is dispatched
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation exists in the interface but has no backend implementation
    #[error("{operation} is not yet implemented")]
    NotImplemented {
        /// What was attempted
        operation: String,
    },

    /// An external tool required by a backend is not on PATH
    #[error("{tool} not found in PATH")]
    ToolNotFound {
        /// Executable name
        tool: String,
    },

    /// An external command ran but exited unsuccessfully
    #[error("{message}: {stderr}")]
    CommandFailed {
        /// What the command was doing
        message: String,
        /// Captured stderr, trimmed
        stderr: String,
    },

    /// Status query could not reach the backend or got garbage back
    #[error("status query failed: {message}")]
    Transport {
        /// Detail from the failed query
        message: String,
    },

    /// The backend reported a build status we do not understand
    #[error("unexpected build status for {host}: {status:?}")]
    UnexpectedStatus {
        /// Host that was queried
        host: String,
        /// Raw status text
        status: String,
    },

    /// The backend reported the build as failed
    #[error("build failed for {host}")]
    BuildFailed {
        /// Host whose build failed
        host: String,
    },

    /// The poll bound was exhausted before a terminal status
    #[error("timed out waiting for {host} after {attempts} status checks{}", last_error_suffix(.last_error))]
    PollTimeout {
        /// Host that never converged
        host: String,
        /// Number of status queries made
        attempts: u32,
        /// Most recent query error, if the last attempts failed
        last_error: Option<String>,
    },

    /// A task panicked inside a worker
    #[error("task for {host} panicked: {message}")]
    TaskPanicked {
        /// Host whose task panicked
        host: String,
        /// Panic payload, when it was a string
        message: String,
    },

    /// Configuration-management run failed for one host
    #[error("configuration run failed for {host}: {message}")]
    ConfigApply {
        /// Host being configured
        host: String,
        /// Failure detail
        message: String,
    },

    /// A provisioning phase died without producing a result
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error from backend output
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration(_) => ErrorCategory::Configuration,
            Error::NotImplemented { .. } => ErrorCategory::Unsupported,
            Error::ToolNotFound { .. } | Error::CommandFailed { .. } => ErrorCategory::BuildStart,
            Error::Transport { .. } | Error::UnexpectedStatus { .. } | Error::Json(_) => {
                ErrorCategory::Transport
            }
            Error::BuildFailed { .. } => ErrorCategory::BuildStart,
            Error::PollTimeout { .. } => ErrorCategory::Timeout,
            Error::ConfigApply { .. } => ErrorCategory::ConfigApply,
            Error::TaskPanicked { .. } | Error::Internal(_) | Error::Io(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(" (last error: {e})"))
        .unwrap_or_default()
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;
