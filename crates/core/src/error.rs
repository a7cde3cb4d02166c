//! Error types for the kbvec workspace.
//!
//! One enum covers configuration, embedding, index, cache and database
//! failures. Bug-class failures (store/map desync, missing cache entries for
//! live identifiers) have their own variant so they are never confused with
//! an ordinary "no match" or "not found" outcome.

use thiserror::Error;

/// Unified error type for kbvec.
///
/// All fallible functions in the workspace return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration and initialization errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller supplied an unusable argument
    #[error("Validation error: {0}")]
    Validation(String),

    /// Embedding provider failures
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A vector does not match the configured embedding dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector store failures
    #[error("Index error: {0}")]
    Index(String),

    /// A rebuild aborted before the swap; the previous index is still live
    #[error("Rebuild failed for record {id} during {phase}: {reason}")]
    Rebuild {
        id: u64,
        phase: &'static str,
        reason: String,
    },

    /// Store, position map and cache disagree
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// System-of-record errors
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// True for errors that indicate a bug rather than absent data.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, AppError::Invariant(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
