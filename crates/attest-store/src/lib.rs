//! Attest-Store: Persistence Layer for Attest
//!
//! This crate provides the storage abstractions the validation engine is
//! built on:
//!
//! - `EvidenceStore`: content-addressed evidence records linked to controls
//! - `ValidationLedger`: append-only per-control validation history plus
//!   committed aggregated snapshots
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: content addressing, append-only audit trails, and atomic commits.
//!
//! All traits are async and backend-agnostic. In-memory backends live in the
//! `memory` module; durable filesystem backends live in the `fs` module.

mod digest;
mod error;
pub mod evidence;
pub mod fs;
pub mod memory;
pub mod validation;

pub use digest::ContentDigest;
pub use error::{StoreError, StoreResult};
pub use evidence::{Evidence, EvidenceId, EvidenceStore, NewEvidence};
pub use fs::{FsEvidenceStore, FsValidationLedger};
pub use memory::{MemoryEvidenceStore, MemoryValidationLedger};
pub use validation::{
    AggregatedSnapshot, CheckResult, ControlId, ControlStatus, DriftEntry, KsiStatus,
    RecordedResult, RunId, RunScope, RunStatus, ValidationLedger, ValidationRun,
};
