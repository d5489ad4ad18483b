//! Validation records and the `ValidationLedger` trait.
//!
//! The ledger is the audit backbone of the engine:
//! - per-control history is append-only (entries are never edited or
//!   reordered),
//! - snapshots carry a monotonically increasing revision assigned at commit,
//! - a run transitions Running -> Committed | Aborted | Cancelled (terminal).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::evidence::EvidenceId;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable identifier of a security control (e.g. "ac-2", "sc-7").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlId(pub String);

impl ControlId {
    pub fn new(id: impl Into<String>) -> Self {
        ControlId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ControlId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ControlId {
    fn from(s: &str) -> Self {
        ControlId(s.to_string())
    }
}

/// Unique identifier for a validation run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId.
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// KSI status lattice
// ---------------------------------------------------------------------------

/// Outcome of a Key Security Indicator check.
///
/// The wire vocabulary is the lowercase strings `true`, `false`, `partial`
/// and `unknown`, matching the status values external consumers expect in
/// validation documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KsiStatus {
    /// The control is validated as implemented.
    #[serde(rename = "true")]
    Pass,
    /// The control is validated as not implemented.
    #[serde(rename = "false")]
    Fail,
    /// Some aspects validate, or the validation is degraded (stale evidence,
    /// indeterminate checks).
    #[serde(rename = "partial")]
    Partial,
    /// The check could not produce a determination.
    #[serde(rename = "unknown")]
    Unknown,
}

impl KsiStatus {
    /// The wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            KsiStatus::Pass => "true",
            KsiStatus::Fail => "false",
            KsiStatus::Partial => "partial",
            KsiStatus::Unknown => "unknown",
        }
    }

    /// Fold multiple check statuses for one control into a single status.
    ///
    /// Lattice: any `Fail` dominates; otherwise any `Partial` or `Unknown`
    /// degrades the result to `Partial`; only a unanimous `Pass` passes.
    /// An empty input yields `Unknown` (no information is not a pass).
    pub fn combine<I>(statuses: I) -> KsiStatus
    where
        I: IntoIterator<Item = KsiStatus>,
    {
        let mut saw_any = false;
        let mut degraded = false;
        for status in statuses {
            saw_any = true;
            match status {
                KsiStatus::Fail => return KsiStatus::Fail,
                KsiStatus::Partial | KsiStatus::Unknown => degraded = true,
                KsiStatus::Pass => {}
            }
        }
        if !saw_any {
            KsiStatus::Unknown
        } else if degraded {
            KsiStatus::Partial
        } else {
            KsiStatus::Pass
        }
    }
}

impl std::fmt::Display for KsiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Check results and per-control history
// ---------------------------------------------------------------------------

/// Result of one check invocation against one control.
///
/// Produced fresh on every run and never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Identifier of the check that produced this result.
    pub check_id: String,
    /// Version of the check implementation.
    pub check_version: String,
    /// Control this result applies to.
    pub control_id: ControlId,
    /// Status on the KSI lattice.
    pub status: KsiStatus,
    /// Evidence record the check based its determination on, if any.
    pub evidence: Option<EvidenceId>,
    /// When the check was evaluated.
    pub evaluated_at: DateTime<Utc>,
    /// Diagnostic message (failure detail, staleness note, timeout).
    pub message: Option<String>,
}

/// One entry in a control's append-only validation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResult {
    /// Monotonic sequence number within the control's history.
    pub seq: u64,
    /// Run that committed this entry.
    pub run_id: RunId,
    /// Snapshot revision the entry was committed under.
    pub revision: u64,
    /// The check result.
    pub result: CheckResult,
}

// ---------------------------------------------------------------------------
// Aggregated snapshots and drift
// ---------------------------------------------------------------------------

/// What a validation run covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunScope {
    /// Evaluate every control the registered checks target. The snapshot's
    /// tracked set is exactly the controls evaluated this run.
    Full,
    /// Re-evaluate only the named controls; statuses of all other controls
    /// carry forward from the previous snapshot.
    Controls { control_ids: Vec<ControlId> },
}

impl RunScope {
    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            RunScope::Full => "full",
            RunScope::Controls { .. } => "controls",
        }
    }
}

/// Validated status of one control within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlStatus {
    /// Combined status across all checks that evaluated the control.
    pub status: KsiStatus,
    /// Diagnostics accumulated while evaluating (non-pass check messages,
    /// staleness overrides, containment notes).
    pub diagnostics: Vec<String>,
}

/// A change in a control's tracked status between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriftEntry {
    /// The control's status differs from the immediately preceding snapshot.
    StatusChanged {
        control_id: ControlId,
        from: KsiStatus,
        to: KsiStatus,
    },
    /// The control is tracked now but was absent from the previous snapshot.
    NewlyTracked {
        control_id: ControlId,
        status: KsiStatus,
    },
    /// The control was tracked previously but is absent from this snapshot.
    NoLongerTracked {
        control_id: ControlId,
        last_status: KsiStatus,
    },
}

impl DriftEntry {
    /// The control this entry concerns.
    pub fn control_id(&self) -> &ControlId {
        match self {
            DriftEntry::StatusChanged { control_id, .. } => control_id,
            DriftEntry::NewlyTracked { control_id, .. } => control_id,
            DriftEntry::NoLongerTracked { control_id, .. } => control_id,
        }
    }

    /// The serde tag of this entry's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DriftEntry::StatusChanged { .. } => "status_changed",
            DriftEntry::NewlyTracked { .. } => "newly_tracked",
            DriftEntry::NoLongerTracked { .. } => "no_longer_tracked",
        }
    }
}

/// Point-in-time, immutable map of control statuses plus the drift delta
/// relative to the immediately preceding snapshot.
///
/// Control maps are `BTreeMap` so serialization order is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSnapshot {
    /// Run that committed this snapshot.
    pub run_id: RunId,
    /// Monotonically increasing revision, assigned at commit (first is 1).
    pub revision: u64,
    /// When the aggregation happened.
    pub taken_at: DateTime<Utc>,
    /// Scope of the run that produced this snapshot.
    pub scope: RunScope,
    /// Current status of every tracked control.
    pub statuses: BTreeMap<ControlId, ControlStatus>,
    /// Delta against the immediately preceding snapshot.
    pub drift: Vec<DriftEntry>,
}

impl AggregatedSnapshot {
    /// Number of tracked controls with the given status.
    pub fn count_with(&self, status: KsiStatus) -> usize {
        self.statuses
            .values()
            .filter(|s| s.status == status)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

/// Status of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Committed,
    Aborted,
    Cancelled,
}

/// Record of a validation run's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRun {
    pub run_id: RunId,
    pub scope: RunScope,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// ValidationLedger — append-only validation history
// ---------------------------------------------------------------------------

/// Validation history ledger.
///
/// Guarantees:
/// - Per-control history entries are ordered by monotonic `seq` and never
///   rewritten.
/// - Snapshot revisions are assigned in commit order with no gaps; a commit
///   that does not carry `latest revision + 1` fails with
///   `StoreError::RevisionConflict`.
/// - Only a `Running` run may commit, abort or cancel; the transition is
///   terminal.
/// - A commit is atomic: either the results, the history entries and the
///   snapshot are all visible, or none are.
#[async_trait]
pub trait ValidationLedger: Send + Sync {
    /// Open a new run in the `Running` state.
    async fn begin_run(&self, scope: RunScope) -> StoreResult<RunId>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StoreResult<ValidationRun>;

    /// Commit a run: append `results` to the per-control histories, store
    /// the snapshot, and mark the run `Committed`.
    ///
    /// `snapshot.revision` must equal the latest committed revision plus one
    /// (or 1 for the first commit).
    async fn commit_run(
        &self,
        run_id: &RunId,
        results: &[CheckResult],
        snapshot: AggregatedSnapshot,
    ) -> StoreResult<()>;

    /// Mark a run `Aborted` (structural failure). Nothing is appended.
    async fn abort_run(&self, run_id: &RunId) -> StoreResult<()>;

    /// Mark a run `Cancelled`. Nothing is appended.
    async fn cancel_run(&self, run_id: &RunId) -> StoreResult<()>;

    /// Full validation record for a control, ordered by `seq`.
    /// Empty if the control has never been evaluated.
    async fn history(&self, control_id: &ControlId) -> StoreResult<Vec<RecordedResult>>;

    /// The most recently committed snapshot, if any.
    async fn latest_snapshot(&self) -> StoreResult<Option<AggregatedSnapshot>>;

    /// A specific committed snapshot.
    /// Returns `StoreError::SnapshotNotFound` if absent.
    async fn snapshot_at(&self, revision: u64) -> StoreResult<AggregatedSnapshot>;

    /// List all runs, oldest first.
    async fn list_runs(&self) -> StoreResult<Vec<ValidationRun>>;
}
