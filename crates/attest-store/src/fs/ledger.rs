//! Filesystem-backed validation ledger.
//!
//! Layout:
//! - `<root>/runs/<run_id>.json` — run lifecycle records
//! - `<root>/commits/rev-<zero-padded revision>.json` — one file per
//!   committed revision, holding the snapshot plus the check results it
//!   recorded
//!
//! The commit file is the commit point. Its name carries the revision, so a
//! noclobber rename doubles as the uniqueness guard: two writers racing for
//! the same revision cannot both succeed. Run records are advisory metadata
//! and are updated after the commit file lands.
//!
//! Per-control history is derived by folding the commit files in revision
//! order, which keeps the on-disk format free of mutable index files.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{write_atomic, write_atomic_noclobber};
use crate::error::{StoreError, StoreResult};
use crate::validation::{
    AggregatedSnapshot, CheckResult, ControlId, RecordedResult, RunId, RunScope, RunStatus,
    ValidationLedger, ValidationRun,
};

/// Everything a single commit made durable.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerCommit {
    snapshot: AggregatedSnapshot,
    results: Vec<CheckResult>,
}

pub struct FsValidationLedger {
    runs_dir: PathBuf,
    commits_dir: PathBuf,
}

impl FsValidationLedger {
    /// Create a ledger rooted at `root`. Creates the layout if needed.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let runs_dir = root.as_ref().join("runs");
        let commits_dir = root.as_ref().join("commits");
        fs::create_dir_all(&runs_dir)?;
        fs::create_dir_all(&commits_dir)?;
        Ok(Self {
            runs_dir,
            commits_dir,
        })
    }

    fn run_path(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir.join(format!("{}.json", run_id.0))
    }

    fn commit_path(&self, revision: u64) -> PathBuf {
        self.commits_dir.join(format!("rev-{revision:020}.json"))
    }

    fn load_run(&self, run_id: &RunId) -> StoreResult<ValidationRun> {
        let raw = fs::read(self.run_path(run_id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::RunNotFound {
                    run_id: run_id.0.clone(),
                }
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn store_run(&self, run: &ValidationRun) -> StoreResult<()> {
        let raw = serde_json::to_vec_pretty(run)?;
        write_atomic(&self.run_path(&run.run_id), &raw)
    }

    /// Committed revisions in ascending order. Ignores stray temp files.
    fn committed_revisions(&self) -> StoreResult<Vec<u64>> {
        let mut revisions = Vec::new();
        for entry in fs::read_dir(&self.commits_dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rev) = name
                .strip_prefix("rev-")
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            if let Ok(rev) = rev.parse::<u64>() {
                revisions.push(rev);
            }
        }
        revisions.sort_unstable();
        Ok(revisions)
    }

    fn read_commit(&self, revision: u64) -> StoreResult<LedgerCommit> {
        let raw = fs::read(self.commit_path(revision)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::SnapshotNotFound { revision }
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn transition(&self, run_id: &RunId, to: RunStatus) -> StoreResult<()> {
        let mut run = self.load_run(run_id)?;
        if run.status != RunStatus::Running {
            return Err(StoreError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: format!("{:?}", run.status),
                expected: "Running".to_string(),
            });
        }
        run.status = to;
        run.completed_at = Some(Utc::now());
        self.store_run(&run)
    }
}

#[async_trait]
impl ValidationLedger for FsValidationLedger {
    async fn begin_run(&self, scope: RunScope) -> StoreResult<RunId> {
        let run_id = RunId::new();
        let run = ValidationRun {
            run_id: run_id.clone(),
            scope,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.store_run(&run)?;
        Ok(run_id)
    }

    async fn get_run(&self, run_id: &RunId) -> StoreResult<ValidationRun> {
        self.load_run(run_id)
    }

    async fn commit_run(
        &self,
        run_id: &RunId,
        results: &[CheckResult],
        snapshot: AggregatedSnapshot,
    ) -> StoreResult<()> {
        let run = self.load_run(run_id)?;
        if run.status != RunStatus::Running {
            return Err(StoreError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: format!("{:?}", run.status),
                expected: "Running".to_string(),
            });
        }
        let expected = self.committed_revisions()?.last().map(|r| r + 1).unwrap_or(1);
        if snapshot.revision != expected {
            return Err(StoreError::RevisionConflict {
                expected,
                got: snapshot.revision,
            });
        }

        let revision = snapshot.revision;
        let commit = LedgerCommit {
            snapshot,
            results: results.to_vec(),
        };
        let raw = serde_json::to_vec_pretty(&commit)?;
        if !write_atomic_noclobber(&self.commit_path(revision), &raw)? {
            // Lost a race for this revision to another writer.
            let expected = self.committed_revisions()?.last().map(|r| r + 1).unwrap_or(1);
            return Err(StoreError::RevisionConflict {
                expected,
                got: revision,
            });
        }

        self.transition(run_id, RunStatus::Committed)
    }

    async fn abort_run(&self, run_id: &RunId) -> StoreResult<()> {
        self.transition(run_id, RunStatus::Aborted)
    }

    async fn cancel_run(&self, run_id: &RunId) -> StoreResult<()> {
        self.transition(run_id, RunStatus::Cancelled)
    }

    async fn history(&self, control_id: &ControlId) -> StoreResult<Vec<RecordedResult>> {
        let mut entries = Vec::new();
        let mut seq = 0u64;
        for revision in self.committed_revisions()? {
            let commit = self.read_commit(revision)?;
            for result in commit.results {
                if &result.control_id != control_id {
                    continue;
                }
                seq += 1;
                entries.push(RecordedResult {
                    seq,
                    run_id: commit.snapshot.run_id.clone(),
                    revision,
                    result,
                });
            }
        }
        Ok(entries)
    }

    async fn latest_snapshot(&self) -> StoreResult<Option<AggregatedSnapshot>> {
        match self.committed_revisions()?.last() {
            Some(&revision) => Ok(Some(self.read_commit(revision)?.snapshot)),
            None => Ok(None),
        }
    }

    async fn snapshot_at(&self, revision: u64) -> StoreResult<AggregatedSnapshot> {
        Ok(self.read_commit(revision)?.snapshot)
    }

    async fn list_runs(&self) -> StoreResult<Vec<ValidationRun>> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.runs_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read(&path)?;
            runs.push(serde_json::from_slice::<ValidationRun>(&raw)?);
        }
        runs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.run_id.0.cmp(&b.run_id.0))
        });
        Ok(runs)
    }
}
