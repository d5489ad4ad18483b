//! Built-in KSI checks.
//!
//! Three first-party checks power the default validation run:
//!
//! - `declared-implementation` — maps the declared implementation status of a
//!   control onto the KSI lattice
//! - `evidence-linked` — at least one evidence item must support the control
//! - `evidence-fresh` — the newest supporting evidence must be younger than
//!   the freshness threshold
//!
//! Custom checks register alongside these; nothing in the engine treats them
//! specially.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use attest_store::{ControlId, Evidence, KsiStatus};

use crate::model::{Control, ImplementationStatus};
use crate::registry::{Check, CheckOutcome};

/// Maps the control's declared status onto the lattice: `satisfied` and
/// `inherited` pass, `partial` and `planned` are partial, `not-implemented`
/// fails. This is the single mapping point between the declared vocabulary
/// and the validated one.
pub struct DeclaredImplementationCheck {
    controls: Vec<ControlId>,
}

impl DeclaredImplementationCheck {
    pub fn new(controls: Vec<ControlId>) -> Self {
        Self { controls }
    }
}

#[async_trait]
impl Check for DeclaredImplementationCheck {
    fn id(&self) -> &str {
        "declared-implementation"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn control_ids(&self) -> Vec<ControlId> {
        self.controls.clone()
    }

    async fn validate(
        &self,
        control: &Control,
        _evidence: &[Evidence],
    ) -> anyhow::Result<CheckOutcome> {
        let outcome = match control.status {
            ImplementationStatus::Satisfied | ImplementationStatus::Inherited => {
                CheckOutcome::new(KsiStatus::Pass)
            }
            ImplementationStatus::Partial | ImplementationStatus::Planned => {
                CheckOutcome::new(KsiStatus::Partial)
                    .with_message(format!("declared status is '{}'", control.status.as_str()))
            }
            ImplementationStatus::NotImplemented => CheckOutcome::new(KsiStatus::Fail)
                .with_message("control is declared not-implemented"),
        };
        Ok(outcome)
    }
}

/// Fails any control with no supporting evidence. A control cannot validate
/// as implemented on declaration alone.
pub struct EvidenceLinkedCheck {
    controls: Vec<ControlId>,
}

impl EvidenceLinkedCheck {
    pub fn new(controls: Vec<ControlId>) -> Self {
        Self { controls }
    }
}

#[async_trait]
impl Check for EvidenceLinkedCheck {
    fn id(&self) -> &str {
        "evidence-linked"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn control_ids(&self) -> Vec<ControlId> {
        self.controls.clone()
    }

    async fn validate(
        &self,
        control: &Control,
        evidence: &[Evidence],
    ) -> anyhow::Result<CheckOutcome> {
        match evidence.first() {
            Some(newest) => {
                Ok(CheckOutcome::new(KsiStatus::Pass).with_evidence(newest.id.clone()))
            }
            None => Ok(CheckOutcome::new(KsiStatus::Fail).with_message(format!(
                "no evidence supports control '{}'",
                control.id
            ))),
        }
    }
}

/// Degrades controls whose newest supporting evidence is older than the
/// freshness threshold. Missing evidence fails outright.
pub struct EvidenceFreshCheck {
    controls: Vec<ControlId>,
    freshness: Duration,
}

impl EvidenceFreshCheck {
    pub fn new(controls: Vec<ControlId>, freshness: Duration) -> Self {
        Self {
            controls,
            freshness,
        }
    }
}

#[async_trait]
impl Check for EvidenceFreshCheck {
    fn id(&self) -> &str {
        "evidence-fresh"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn control_ids(&self) -> Vec<ControlId> {
        self.controls.clone()
    }

    async fn validate(
        &self,
        control: &Control,
        evidence: &[Evidence],
    ) -> anyhow::Result<CheckOutcome> {
        // `evidence` is newest-first by store contract.
        let Some(newest) = evidence.first() else {
            return Ok(CheckOutcome::new(KsiStatus::Fail).with_message(format!(
                "no evidence supports control '{}'",
                control.id
            )));
        };
        let age = Utc::now() - newest.collected_at;
        if age > self.freshness {
            Ok(CheckOutcome::new(KsiStatus::Partial)
                .with_evidence(newest.id.clone())
                .with_message(format!(
                    "newest evidence is {} days old (threshold {} days)",
                    age.num_days(),
                    self.freshness.num_days()
                )))
        } else {
            Ok(CheckOutcome::new(KsiStatus::Pass).with_evidence(newest.id.clone()))
        }
    }
}

/// The built-in check set targeting the given controls, in the order the
/// CLI registers them.
pub fn builtin_checks(controls: Vec<ControlId>, freshness: Duration) -> Vec<Arc<dyn Check>> {
    vec![
        Arc::new(DeclaredImplementationCheck::new(controls.clone())),
        Arc::new(EvidenceLinkedCheck::new(controls.clone())),
        Arc::new(EvidenceFreshCheck::new(controls, freshness)),
    ]
}
