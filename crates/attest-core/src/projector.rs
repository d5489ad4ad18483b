//! Deterministic projection of aggregated state into compliance artifacts.
//!
//! `project` is a pure function of the snapshot and the model: it reads no
//! clock (all timestamps come from the snapshot) and iterates only ordered
//! maps, so identical inputs yield byte-identical serialized output. That
//! property is load-bearing: the documents are signed and diffed downstream.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use attest_store::{
    AggregatedSnapshot, ControlId, DriftEntry, EvidenceId, KsiStatus, RunId,
};

use crate::model::{ImplementationStatus, SystemModel};

/// Schema version stamped into every projected document.
pub const ARTIFACT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The snapshot references a control the model no longer declares.
    /// The projector never invents placeholder data.
    #[error("inconsistent state: control '{control_id}' is in the snapshot but not the model")]
    InconsistentState { control_id: String },
}

// ---------------------------------------------------------------------------
// Document shapes
// ---------------------------------------------------------------------------

/// One control as rendered in the system security plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanControl {
    pub control_id: ControlId,
    pub description: String,
    pub declared_status: ImplementationStatus,
    pub evidence: Vec<EvidenceId>,
}

/// The system security plan: every declared control with its description,
/// declared status and evidence references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSecurityPlan {
    pub schema_version: String,
    pub system_id: String,
    pub revision: u64,
    pub generated_at: DateTime<Utc>,
    pub controls: Vec<PlanControl>,
}

/// One control's validated status within the validation-status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub control_id: ControlId,
    pub status: KsiStatus,
    pub diagnostics: Vec<String>,
}

/// The validation-status document: per-control validated statuses plus the
/// drift the producing run detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatusDoc {
    pub schema_version: String,
    pub system_id: String,
    pub revision: u64,
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    pub statuses: Vec<StatusEntry>,
    pub drift: Vec<DriftEntry>,
}

/// One non-passing control in the findings document, with the declared
/// posture alongside the validated one for remediation triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingEntry {
    pub control_id: ControlId,
    pub status: KsiStatus,
    pub declared_status: ImplementationStatus,
    pub description: String,
    pub diagnostics: Vec<String>,
}

/// The findings/remediation document: the non-passing subset of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingsDoc {
    pub schema_version: String,
    pub system_id: String,
    pub revision: u64,
    pub generated_at: DateTime<Utc>,
    pub findings: Vec<FindingEntry>,
}

/// The fixed set of projected documents, keyed by system id and revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub system_id: String,
    pub revision: u64,
    pub plan: SystemSecurityPlan,
    pub status: ValidationStatusDoc,
    pub findings: FindingsDoc,
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Render the snapshot and model into the compliance artifact set.
///
/// Fails with [`ProjectionError::InconsistentState`] if the snapshot tracks
/// a control the model does not declare.
pub fn project(
    snapshot: &AggregatedSnapshot,
    model: &SystemModel,
) -> Result<ArtifactSet, ProjectionError> {
    // Every tracked control must exist in the model before anything renders.
    for control_id in snapshot.statuses.keys() {
        if !model.contains(control_id) {
            return Err(ProjectionError::InconsistentState {
                control_id: control_id.as_str().to_string(),
            });
        }
    }

    let system_id = model.system_id().to_string();
    let generated_at = snapshot.taken_at;

    let plan = SystemSecurityPlan {
        schema_version: ARTIFACT_SCHEMA_VERSION.to_string(),
        system_id: system_id.clone(),
        revision: snapshot.revision,
        generated_at,
        controls: model
            .controls()
            .map(|control| PlanControl {
                control_id: control.id.clone(),
                description: control.description.clone(),
                declared_status: control.status,
                evidence: control.evidence.clone(),
            })
            .collect(),
    };

    let status = ValidationStatusDoc {
        schema_version: ARTIFACT_SCHEMA_VERSION.to_string(),
        system_id: system_id.clone(),
        revision: snapshot.revision,
        run_id: snapshot.run_id.clone(),
        generated_at,
        statuses: snapshot
            .statuses
            .iter()
            .map(|(control_id, entry)| StatusEntry {
                control_id: control_id.clone(),
                status: entry.status,
                diagnostics: entry.diagnostics.clone(),
            })
            .collect(),
        drift: snapshot.drift.clone(),
    };

    let findings = FindingsDoc {
        schema_version: ARTIFACT_SCHEMA_VERSION.to_string(),
        system_id: system_id.clone(),
        revision: snapshot.revision,
        generated_at,
        findings: snapshot
            .statuses
            .iter()
            .filter(|(_, entry)| entry.status != KsiStatus::Pass)
            .map(|(control_id, entry)| {
                // Presence was verified above.
                let control = model.get(control_id).expect("control checked present");
                FindingEntry {
                    control_id: control_id.clone(),
                    status: entry.status,
                    declared_status: control.status,
                    description: control.description.clone(),
                    diagnostics: entry.diagnostics.clone(),
                }
            })
            .collect(),
    };

    Ok(ArtifactSet {
        system_id,
        revision: snapshot.revision,
        plan,
        status,
        findings,
    })
}

/// Persist the artifact set as pretty JSON under
/// `<dir>/<system_id>/rev-<revision>/<kind>.json`.
///
/// Returns the revision directory the documents were written to.
pub fn write_artifact_set(
    dir: &Path,
    artifacts: &ArtifactSet,
) -> anyhow::Result<std::path::PathBuf> {
    let rev_dir = dir
        .join(&artifacts.system_id)
        .join(format!("rev-{}", artifacts.revision));
    std::fs::create_dir_all(&rev_dir)
        .with_context(|| format!("create artifact dir {:?}", rev_dir))?;

    write_doc(&rev_dir, "system-security-plan", &artifacts.plan)?;
    write_doc(&rev_dir, "validation-status", &artifacts.status)?;
    write_doc(&rev_dir, "findings", &artifacts.findings)?;

    Ok(rev_dir)
}

fn write_doc<T: Serialize>(dir: &Path, kind: &str, doc: &T) -> anyhow::Result<()> {
    let path = dir.join(format!("{kind}.json"));
    let content = serde_json::to_string_pretty(doc).with_context(|| format!("serialize {kind}"))?;
    std::fs::write(&path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
