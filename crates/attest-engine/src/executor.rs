//! Check execution with per-control concurrency and failure containment.
//!
//! The executor groups registered checks by target control, evaluates
//! groups concurrently under a bounded semaphore, and evaluates checks
//! within a group sequentially in registration order. Check failures,
//! panics and timeouts are contained: they become `unknown` results with a
//! diagnostic, never run-level errors. Only store failures (after retries)
//! and cancellation abort a run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;

use attest_core::obs::{emit_check_contained, emit_check_evaluated};
use attest_core::registry::{Check, CheckOutcome, CheckRegistry};
use attest_core::{Control, SystemModel};
use attest_store::{
    CheckResult, ControlId, ControlStatus, Evidence, EvidenceStore, KsiStatus, RunScope,
};

use crate::config::EngineConfig;
use crate::error::RunError;

/// Shared cancellation flag for an in-flight run.
///
/// Checked at the start of every control group and re-checked under the
/// aggregator's commit lock, so a cancelled run never reaches history.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A check that could not run because its target control is absent from
/// the model. Local: surfaced in the report, never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCheck {
    pub check_id: String,
    pub control_id: ControlId,
}

/// Everything a single execution produced.
#[derive(Debug)]
pub struct ExecutionReport {
    /// Raw per-check results, one per (check, control) invocation.
    pub results: Vec<CheckResult>,
    /// Lattice-combined status per control, with non-pass diagnostics.
    pub combined: BTreeMap<ControlId, ControlStatus>,
    /// Checks skipped because their target control is unknown.
    pub skipped: Vec<SkippedCheck>,
}

/// Runs the registered checks against a frozen model view.
pub struct Executor {
    store: Arc<dyn EvidenceStore>,
    registry: Arc<CheckRegistry>,
    config: EngineConfig,
}

impl Executor {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        registry: Arc<CheckRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Execute all in-scope checks against `model` and combine the results
    /// per control.
    pub async fn run(
        &self,
        model: &SystemModel,
        scope: &RunScope,
        cancel: &CancelFlag,
    ) -> Result<ExecutionReport, RunError> {
        let in_scope = |control_id: &ControlId| match scope {
            RunScope::Full => true,
            RunScope::Controls { control_ids } => control_ids.contains(control_id),
        };

        // Group checks by target control; registration order within a group
        // is the evaluation order.
        let mut groups: BTreeMap<ControlId, Vec<Arc<dyn Check>>> = BTreeMap::new();
        let mut skipped = Vec::new();
        for check in self.registry.checks() {
            for control_id in check.control_ids() {
                if !in_scope(&control_id) {
                    continue;
                }
                if !model.contains(&control_id) {
                    skipped.push(SkippedCheck {
                        check_id: check.id().to_string(),
                        control_id,
                    });
                    continue;
                }
                groups.entry(control_id).or_default().push(Arc::clone(check));
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut handles = Vec::with_capacity(groups.len());
        for (control_id, checks) in groups {
            let control = model
                .get(&control_id)
                .expect("grouped controls exist in the model")
                .clone();
            let store = Arc::clone(&self.store);
            let config = self.config.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                run_group(store, control, checks, config).await.map(Some)
            }));
        }

        let mut results = Vec::new();
        let mut combined = BTreeMap::new();
        for joined in join_all(handles).await {
            let group = joined.expect("group tasks contain their own failures")?;
            if let Some((control_id, group_results, status)) = group {
                results.extend(group_results);
                combined.insert(control_id, status);
            }
        }

        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        Ok(ExecutionReport {
            results,
            combined,
            skipped,
        })
    }
}

/// Evaluate one control's checks sequentially and fold the lattice.
async fn run_group(
    store: Arc<dyn EvidenceStore>,
    control: Control,
    checks: Vec<Arc<dyn Check>>,
    config: EngineConfig,
) -> Result<(ControlId, Vec<CheckResult>, ControlStatus), RunError> {
    let evidence = config.retry.run(|| store.linked_to(&control.id)).await?;

    let mut results = Vec::with_capacity(checks.len());
    for check in &checks {
        let outcome = invoke_contained(check, &control, &evidence, config.check_timeout).await;
        emit_check_evaluated(check.id(), control.id.as_str(), outcome.status.as_str());
        results.push(CheckResult {
            check_id: check.id().to_string(),
            check_version: check.version().to_string(),
            control_id: control.id.clone(),
            status: outcome.status,
            evidence: outcome.evidence,
            evaluated_at: Utc::now(),
            message: outcome.message,
        });
    }

    let status = KsiStatus::combine(results.iter().map(|r| r.status));
    let diagnostics = results
        .iter()
        .filter(|r| r.status != KsiStatus::Pass)
        .filter_map(|r| {
            r.message
                .as_ref()
                .map(|message| format!("{}: {message}", r.check_id))
        })
        .collect();

    Ok((
        control.id.clone(),
        results,
        ControlStatus {
            status,
            diagnostics,
        },
    ))
}

/// Invoke one check with containment: error returns, panics and timeouts
/// all downgrade to `unknown` with a diagnostic.
async fn invoke_contained(
    check: &Arc<dyn Check>,
    control: &Control,
    evidence: &[Evidence],
    timeout: Duration,
) -> CheckOutcome {
    // The check runs in its own task so a panic is absorbed at the join
    // boundary instead of tearing down the whole group.
    let mut handle = tokio::spawn({
        let check = Arc::clone(check);
        let control = control.clone();
        let evidence = evidence.to_vec();
        async move { check.validate(&control, &evidence).await }
    });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(outcome))) => outcome,
        Ok(Ok(Err(err))) => {
            emit_check_contained(check.id(), control.id.as_str(), "check returned an error");
            CheckOutcome::new(KsiStatus::Unknown).with_message(format!("check failed: {err:#}"))
        }
        Ok(Err(join_err)) => {
            let reason = if join_err.is_panic() {
                "check panicked"
            } else {
                "check task aborted"
            };
            emit_check_contained(check.id(), control.id.as_str(), reason);
            CheckOutcome::new(KsiStatus::Unknown).with_message(format!("{reason}: {join_err}"))
        }
        Err(_elapsed) => {
            handle.abort();
            emit_check_contained(check.id(), control.id.as_str(), "check timed out");
            CheckOutcome::new(KsiStatus::Unknown)
                .with_message(format!("timed out after {}ms", timeout.as_millis()))
        }
    }
}
