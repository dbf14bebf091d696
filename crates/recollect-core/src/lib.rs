//! Core error definitions for the recollect workspace.
//!
//! Every fallible operation in `recollect-memory` returns [`RecollectResult`],
//! so callers can tell malformed input apart from a missing record, a failing
//! embedding backend, or broken storage.
//!
//! # Main types
//!
//! - [`RecollectError`] — Unified error enum for all recollect subsystems.
//! - [`RecollectResult`] — Convenience alias for `Result<T, RecollectError>`.

/// Top-level error type for the recollect crates.
///
/// Each variant corresponds to one failure class. Only [`Validation`] and
/// [`NotFound`] are caused by the caller; the rest come from collaborators.
///
/// [`Validation`]: RecollectError::Validation
/// [`NotFound`]: RecollectError::NotFound
#[derive(Debug, thiserror::Error)]
pub enum RecollectError {
    /// Malformed input: empty content, inverted line range, mismatched
    /// vector lengths. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A write referenced a record that does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The embedding backend is unavailable, failed, or timed out.
    #[error("Embedding backend error: {0}")]
    Backend(String),

    /// The underlying persistence layer failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecollectError {
    /// Whether retrying the same call could succeed.
    ///
    /// Only backend failures are transient; the core itself never retries,
    /// this is a hint for the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecollectError::Backend(_))
    }
}

/// A convenience `Result` alias using [`RecollectError`].
pub type RecollectResult<T> = Result<T, RecollectError>;
