//! In-memory stores for testing and single-process use.
//!
//! Provides `MemoryEvidenceStore` and `MemoryValidationLedger` that satisfy
//! the trait contracts without touching the filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{StoreError, StoreResult};
use crate::evidence::{Evidence, EvidenceId, EvidenceStore, NewEvidence};
use crate::validation::{
    AggregatedSnapshot, CheckResult, ControlId, RecordedResult, RunId, RunScope, RunStatus,
    ValidationLedger, ValidationRun,
};

// ---------------------------------------------------------------------------
// MemoryEvidenceStore
// ---------------------------------------------------------------------------

/// In-memory evidence store backed by a `HashMap<digest, (metadata, bytes)>`.
#[derive(Debug, Default)]
pub struct MemoryEvidenceStore {
    records: Mutex<HashMap<String, (Evidence, Vec<u8>)>>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn put(&self, new: NewEvidence) -> StoreResult<EvidenceId> {
        let evidence = Evidence::from_new(&new);
        let id = evidence.id.clone();
        let mut records = self.records.lock().unwrap();
        // Records are immutable: re-ingesting identical content is a no-op.
        records
            .entry(id.digest().as_str().to_string())
            .or_insert((evidence, new.content));
        Ok(id)
    }

    async fn get(&self, id: &EvidenceId) -> StoreResult<Evidence> {
        let records = self.records.lock().unwrap();
        records
            .get(id.digest().as_str())
            .map(|(evidence, _)| evidence.clone())
            .ok_or_else(|| StoreError::EvidenceNotFound {
                digest: id.digest().as_str().to_string(),
            })
    }

    async fn content(&self, id: &EvidenceId) -> StoreResult<Vec<u8>> {
        let records = self.records.lock().unwrap();
        records
            .get(id.digest().as_str())
            .map(|(_, content)| content.clone())
            .ok_or_else(|| StoreError::EvidenceNotFound {
                digest: id.digest().as_str().to_string(),
            })
    }

    async fn contains(&self, id: &EvidenceId) -> StoreResult<bool> {
        let records = self.records.lock().unwrap();
        Ok(records.contains_key(id.digest().as_str()))
    }

    async fn linked_to(&self, control_id: &ControlId) -> StoreResult<Vec<Evidence>> {
        let records = self.records.lock().unwrap();
        let mut linked: Vec<Evidence> = records
            .values()
            .filter(|(evidence, _)| evidence.supports.contains(control_id))
            .map(|(evidence, _)| evidence.clone())
            .collect();
        linked.sort_by(|a, b| {
            b.collected_at
                .cmp(&a.collected_at)
                .then_with(|| a.id.digest().cmp(b.id.digest()))
        });
        Ok(linked)
    }
}

// ---------------------------------------------------------------------------
// MemoryValidationLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerState {
    runs: HashMap<String, ValidationRun>,
    history: HashMap<String, Vec<RecordedResult>>,
    snapshots: Vec<AggregatedSnapshot>,
}

/// In-memory validation ledger.
///
/// Snapshots live in a `Vec` ordered by revision; per-control history is a
/// `HashMap<control, Vec<RecordedResult>>` with entries appended in commit
/// order.
#[derive(Debug, Default)]
pub struct MemoryValidationLedger {
    state: Mutex<LedgerState>,
}

impl MemoryValidationLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValidationLedger for MemoryValidationLedger {
    async fn begin_run(&self, scope: RunScope) -> StoreResult<RunId> {
        let run_id = RunId::new();
        let run = ValidationRun {
            run_id: run_id.clone(),
            scope,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
        };
        let mut state = self.state.lock().unwrap();
        state.runs.insert(run_id.0.clone(), run);
        Ok(run_id)
    }

    async fn get_run(&self, run_id: &RunId) -> StoreResult<ValidationRun> {
        let state = self.state.lock().unwrap();
        state
            .runs
            .get(&run_id.0)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn commit_run(
        &self,
        run_id: &RunId,
        results: &[CheckResult],
        snapshot: AggregatedSnapshot,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let run = state
            .runs
            .get(&run_id.0)
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        if run.status != RunStatus::Running {
            return Err(StoreError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: format!("{:?}", run.status),
                expected: "Running".to_string(),
            });
        }
        let expected = state.snapshots.last().map(|s| s.revision + 1).unwrap_or(1);
        if snapshot.revision != expected {
            return Err(StoreError::RevisionConflict {
                expected,
                got: snapshot.revision,
            });
        }
        for result in results {
            let entries = state
                .history
                .entry(result.control_id.as_str().to_string())
                .or_default();
            let seq = entries.last().map(|e| e.seq + 1).unwrap_or(1);
            entries.push(RecordedResult {
                seq,
                run_id: run_id.clone(),
                revision: snapshot.revision,
                result: result.clone(),
            });
        }
        state.snapshots.push(snapshot);
        let run = state.runs.get_mut(&run_id.0).unwrap();
        run.status = RunStatus::Committed;
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn abort_run(&self, run_id: &RunId) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let run = state
            .runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        if run.status != RunStatus::Running {
            return Err(StoreError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: format!("{:?}", run.status),
                expected: "Running".to_string(),
            });
        }
        run.status = RunStatus::Aborted;
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn cancel_run(&self, run_id: &RunId) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let run = state
            .runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        if run.status != RunStatus::Running {
            return Err(StoreError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: format!("{:?}", run.status),
                expected: "Running".to_string(),
            });
        }
        run.status = RunStatus::Cancelled;
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn history(&self, control_id: &ControlId) -> StoreResult<Vec<RecordedResult>> {
        let state = self.state.lock().unwrap();
        let mut entries = state
            .history
            .get(control_id.as_str())
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    async fn latest_snapshot(&self) -> StoreResult<Option<AggregatedSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state.snapshots.last().cloned())
    }

    async fn snapshot_at(&self, revision: u64) -> StoreResult<AggregatedSnapshot> {
        let state = self.state.lock().unwrap();
        state
            .snapshots
            .iter()
            .find(|s| s.revision == revision)
            .cloned()
            .ok_or(StoreError::SnapshotNotFound { revision })
    }

    async fn list_runs(&self) -> StoreResult<Vec<ValidationRun>> {
        let state = self.state.lock().unwrap();
        let mut runs: Vec<ValidationRun> = state.runs.values().cloned().collect();
        runs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.run_id.0.cmp(&b.run_id.0))
        });
        Ok(runs)
    }
}
