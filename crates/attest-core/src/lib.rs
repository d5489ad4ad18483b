//! Attest Core Library
//!
//! Domain logic for compliance validation: the system model of declared
//! controls, the KSI check registry, the built-in checks, and the
//! deterministic artifact projector. Persisted types and storage traits live
//! in `attest-store`; execution and aggregation live in `attest-engine`.

pub mod builtin;
pub mod model;
pub mod obs;
pub mod projector;
pub mod registry;
pub mod telemetry;

pub use model::{Control, ImplementationStatus, ModelError, SystemModel};

pub use registry::{Check, CheckOutcome, CheckRegistry, FnCheck, RegistryError};

pub use builtin::{
    builtin_checks, DeclaredImplementationCheck, EvidenceFreshCheck, EvidenceLinkedCheck,
};

pub use projector::{
    project, write_artifact_set, ArtifactSet, FindingEntry, FindingsDoc, PlanControl,
    ProjectionError, StatusEntry, SystemSecurityPlan, ValidationStatusDoc,
    ARTIFACT_SCHEMA_VERSION,
};

pub use obs::{
    emit_check_contained, emit_check_evaluated, emit_drift_detected, emit_evidence_ingested,
    emit_run_cancelled, emit_run_committed, emit_run_finalize_error, emit_run_started, RunSpan,
};
pub use telemetry::init_tracing;

/// Attest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
