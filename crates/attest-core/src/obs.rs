//! Structured observability hooks for validation run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for key lifecycle events: run start/commit/cancel,
//!   check evaluation and containment, drift detection, evidence ingestion
//!
//! Events are emitted at `info!` level (filterable via `RUST_LOG`).

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span for the duration of a
/// validation run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // All tracing calls are now associated with run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("attest.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: validation run started.
pub fn emit_run_started(run_id: &str, scope: &str, controls: usize) {
    info!(event = "run.started", run_id = %run_id, scope = %scope, controls = controls);
}

/// Emit event: run committed a snapshot at the given revision.
pub fn emit_run_committed(run_id: &str, revision: u64, drift_entries: usize, duration_ms: u64) {
    info!(
        event = "run.committed",
        run_id = %run_id,
        revision = revision,
        drift_entries = drift_entries,
        duration_ms = duration_ms,
    );
}

/// Emit event: run cancelled before its commit; partial results discarded.
pub fn emit_run_cancelled(run_id: &str) {
    info!(event = "run.cancelled", run_id = %run_id);
}

/// Emit event: run finalization error (warning level).
pub fn emit_run_finalize_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.finalize_error", run_id = %run_id, error = %error);
}

/// Emit event: a check produced a result for a control.
pub fn emit_check_evaluated(check_id: &str, control_id: &str, status: &str) {
    info!(event = "check.evaluated", check_id = %check_id, control_id = %control_id, status = %status);
}

/// Emit event: a check failure was contained and downgraded to `unknown`.
pub fn emit_check_contained(check_id: &str, control_id: &str, reason: &str) {
    warn!(event = "check.contained", check_id = %check_id, control_id = %control_id, reason = %reason);
}

/// Emit event: a drift entry was detected during aggregation.
pub fn emit_drift_detected(run_id: &str, kind: &str, control_id: &str) {
    info!(event = "drift.detected", run_id = %run_id, kind = %kind, control_id = %control_id);
}

/// Emit event: evidence stored for a control.
pub fn emit_evidence_ingested(evidence_id: &str, control_id: &str) {
    info!(event = "evidence.ingested", evidence_id = %evidence_id, control_id = %control_id);
}
