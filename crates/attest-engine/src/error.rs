//! Run-level error wrapper for the engine.

use thiserror::Error;

use attest_core::{ModelError, ProjectionError, RegistryError};
use attest_store::StoreError;

/// Why a validation run (or a pipeline operation) failed as a whole.
///
/// Failures local to one check or one control never surface here; they are
/// contained and recorded as `unknown`/`partial` statuses. Only structural
/// failures abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The run was cancelled before its aggregation commit. Partial results
    /// were discarded.
    #[error("run cancelled before commit")]
    Cancelled,

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("model failure: {0}")]
    Model(#[from] ModelError),

    #[error("registry failure: {0}")]
    Registry(#[from] RegistryError),

    #[error("projection failure: {0}")]
    Projection(#[from] ProjectionError),

    /// Projection was requested before any run committed a snapshot.
    #[error("no committed snapshot to project")]
    NoSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_convert() {
        let err: RunError = StoreError::SnapshotNotFound { revision: 2 }.into();
        assert!(matches!(err, RunError::Store(_)));
        assert!(err.to_string().contains("revision 2"));
    }

    #[test]
    fn model_errors_convert() {
        let err: RunError = ModelError::UnknownControl {
            control_id: "zz-99".to_string(),
        }
        .into();
        assert!(matches!(err, RunError::Model(_)));
    }
}
