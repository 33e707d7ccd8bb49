//! Error types for the sandbox orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for orchestrator operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A submission or request was missing required fields.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested job does not exist.
    #[error("job not found: {0}")]
    NotFound(String),

    /// A tool tried to reach a path outside the repository root.
    #[error("access outside the sandbox is blocked: {path}")]
    Security { path: PathBuf },

    /// The reasoning service failed or is not configured.
    #[error("reasoning service error: {0}")]
    ExternalService(String),

    /// Clone, checkout, status or diff failed.
    #[error("git operation failed: {0}")]
    SourceControl(String),

    /// A tool call could not be completed.
    #[error("tool error: {0}")]
    Tool(String),

    /// A turn cap or deadline was exceeded.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error during workspace operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected failure that should not reach callers verbatim.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error represents an exceeded bound rather than a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;
