//! Attest Engine - Validation Execution and Aggregation
//!
//! This crate turns the registered KSI checks, the system model and the
//! evidence store into committed validation state:
//!
//! - `Executor`: runs checks concurrently per control with timeout and
//!   failure containment
//! - `Aggregator`: applies the staleness override, computes drift against
//!   the previous snapshot and commits to the validation ledger
//! - `ValidationPipeline`: the facade that sequences runs, evidence
//!   ingestion and artifact projection under the run-level lock
//! - `MonitorFeed`: turns continuous-monitoring findings into synthetic
//!   evidence plus a scoped re-run

pub mod aggregator;
pub mod config;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod notify;
pub mod pipeline;

pub use aggregator::Aggregator;
pub use config::{EngineConfig, RetryPolicy};
pub use error::RunError;
pub use executor::{CancelFlag, ExecutionReport, Executor, SkippedCheck};
pub use monitor::{Finding, MonitorFeed};
pub use notify::{DriftEvent, DriftNotifier, LogNotifier, MemoryNotifier};
pub use pipeline::ValidationPipeline;
