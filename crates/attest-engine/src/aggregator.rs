//! Aggregation: staleness override, drift computation, serialized commits.
//!
//! The aggregator is the single sequential point of the pipeline. Two runs
//! may execute checks concurrently; their commits are totally ordered by
//! the commit lock, which also assigns snapshot revisions. Cancellation is
//! re-checked under the lock, so a cancelled run's partial results never
//! reach history.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use attest_core::obs::emit_drift_detected;
use attest_store::{
    AggregatedSnapshot, ControlStatus, DriftEntry, EvidenceStore, KsiStatus, RunId, RunScope,
    ValidationLedger,
};

use crate::config::EngineConfig;
use crate::error::RunError;
use crate::executor::{CancelFlag, ExecutionReport};
use crate::notify::{DriftEvent, DriftNotifier};

pub struct Aggregator {
    store: Arc<dyn EvidenceStore>,
    ledger: Arc<dyn ValidationLedger>,
    notifier: Arc<dyn DriftNotifier>,
    config: EngineConfig,
    /// Serializes commits: revision assignment and the ledger append happen
    /// under this lock.
    commit_lock: Mutex<()>,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        ledger: Arc<dyn ValidationLedger>,
        notifier: Arc<dyn DriftNotifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            config,
            commit_lock: Mutex::new(()),
        }
    }

    /// Fold an execution report into history: apply the staleness override,
    /// compute drift against the latest snapshot, append the results and
    /// commit the new snapshot. Returns the committed snapshot.
    pub async fn commit(
        &self,
        run_id: &RunId,
        scope: RunScope,
        mut report: ExecutionReport,
        cancel: &CancelFlag,
    ) -> Result<AggregatedSnapshot, RunError> {
        self.apply_staleness_override(&mut report).await?;

        let snapshot = {
            let _commit = self.commit_lock.lock().await;

            // Late cancellation wins: nothing from this run reaches history.
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            let previous = self
                .config
                .retry
                .run(|| self.ledger.latest_snapshot())
                .await?;

            let statuses = match &scope {
                // A full run's tracked set is exactly what it evaluated.
                RunScope::Full => report.combined.clone(),
                // A targeted run overlays its controls on the carried-over
                // previous snapshot, so the rest of the catalog stays tracked.
                RunScope::Controls { .. } => {
                    let mut merged = previous
                        .as_ref()
                        .map(|s| s.statuses.clone())
                        .unwrap_or_default();
                    merged.extend(report.combined.clone());
                    merged
                }
            };

            let drift = compute_drift(previous.as_ref(), &statuses);
            let snapshot = AggregatedSnapshot {
                run_id: run_id.clone(),
                revision: previous.as_ref().map(|s| s.revision + 1).unwrap_or(1),
                taken_at: Utc::now(),
                scope,
                statuses,
                drift,
            };

            // No retry here: the commit is not idempotent, and the ledger's
            // revision guard rejects a duplicate anyway.
            self.ledger
                .commit_run(run_id, &report.results, snapshot.clone())
                .await?;
            snapshot
        };

        self.notify_drift(run_id, &snapshot).await;
        Ok(snapshot)
    }

    /// Force controls whose newest evidence is older than the freshness
    /// threshold to `partial`, keeping the pre-override status visible in
    /// the diagnostic. Controls with no evidence are left to the checks.
    async fn apply_staleness_override(
        &self,
        report: &mut ExecutionReport,
    ) -> Result<(), RunError> {
        let threshold = self.config.evidence_freshness;
        for (control_id, entry) in report.combined.iter_mut() {
            let evidence = self
                .config
                .retry
                .run(|| self.store.linked_to(control_id))
                .await?;
            let Some(newest) = evidence.first() else {
                continue;
            };
            let age = Utc::now() - newest.collected_at;
            if age > threshold {
                let prior = entry.status;
                entry.status = KsiStatus::Partial;
                entry.diagnostics.push(format!(
                    "evidence stale: newest collected {} days ago exceeds {}-day threshold \
                     (pre-override status: {prior})",
                    age.num_days(),
                    threshold.num_days(),
                ));
            }
        }
        Ok(())
    }

    /// Deliver one event per drift entry, at-least-once with bounded retry.
    /// The snapshot is already durable; exhausted retries are logged and
    /// dropped, never unwound into the run result.
    async fn notify_drift(&self, run_id: &RunId, snapshot: &AggregatedSnapshot) {
        for entry in &snapshot.drift {
            emit_drift_detected(&run_id.0, entry.kind(), entry.control_id().as_str());
            let event = DriftEvent {
                run_id: run_id.clone(),
                revision: snapshot.revision,
                entry: entry.clone(),
            };

            let mut delay = self.config.retry.base_delay;
            let mut attempt = 1u32;
            loop {
                match self.notifier.notify(&event).await {
                    Ok(()) => break,
                    Err(err) if attempt < self.config.retry.attempts => {
                        warn!(
                            event = "drift.notify_retry",
                            run_id = %run_id,
                            control_id = %event.entry.control_id(),
                            attempt = attempt,
                            error = %err,
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        attempt += 1;
                    }
                    Err(err) => {
                        warn!(
                            event = "drift.notify_failed",
                            run_id = %run_id,
                            control_id = %event.entry.control_id(),
                            error = %err,
                        );
                        break;
                    }
                }
            }
        }
    }
}

/// Delta between the previous snapshot (if any) and the new status map.
/// Drift is only ever computed against the immediately preceding snapshot.
fn compute_drift(
    previous: Option<&AggregatedSnapshot>,
    current: &std::collections::BTreeMap<attest_store::ControlId, ControlStatus>,
) -> Vec<DriftEntry> {
    let mut drift = Vec::new();
    let empty = std::collections::BTreeMap::new();
    let prev = previous.map(|s| &s.statuses).unwrap_or(&empty);

    for (control_id, entry) in current {
        match prev.get(control_id) {
            Some(before) if before.status != entry.status => {
                drift.push(DriftEntry::StatusChanged {
                    control_id: control_id.clone(),
                    from: before.status,
                    to: entry.status,
                });
            }
            Some(_) => {}
            None => drift.push(DriftEntry::NewlyTracked {
                control_id: control_id.clone(),
                status: entry.status,
            }),
        }
    }

    for (control_id, before) in prev {
        if !current.contains_key(control_id) {
            drift.push(DriftEntry::NoLongerTracked {
                control_id: control_id.clone(),
                last_status: before.status,
            });
        }
    }

    drift
}
