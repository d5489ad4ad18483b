//! Error types for the attest persistence layer.

use thiserror::Error;

/// Errors that can occur in the evidence store or validation ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No evidence record exists for the given digest.
    #[error("evidence not found: {digest}")]
    EvidenceNotFound { digest: String },

    /// A digest string failed validation (length or hex charset).
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// No run record exists for the given ID.
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// A run lifecycle operation was attempted in the wrong state.
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// No snapshot has been committed at the given revision.
    #[error("snapshot not found at revision {revision}")]
    SnapshotNotFound { revision: u64 },

    /// A commit carried a revision that is not the successor of the latest
    /// committed revision.
    #[error("revision conflict: expected {expected}, got {got}")]
    RevisionConflict { expected: u64, got: u64 },

    /// Serialization or deserialization of a persisted record failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether a retry with backoff may succeed.
    ///
    /// Only infrastructure failures are transient; contract violations
    /// (missing records, state guards, revision conflicts) are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
