//! KSI check registry.
//!
//! Checks are registered once at startup and resolved into a fixed,
//! iterable list; there is no runtime discovery. The registry preserves
//! registration order, which the executor uses to sequence checks that
//! share a control.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use attest_store::{ControlId, Evidence, EvidenceId, KsiStatus};

use crate::model::Control;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("check id '{check_id}' is already registered")]
    DuplicateCheck { check_id: String },
}

// ---------------------------------------------------------------------------
// Check trait
// ---------------------------------------------------------------------------

/// What a check observed for one control.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub status: KsiStatus,
    pub message: Option<String>,
    /// Evidence the determination was based on, if any.
    pub evidence: Option<EvidenceId>,
}

impl CheckOutcome {
    pub fn new(status: KsiStatus) -> Self {
        Self {
            status,
            message: None,
            evidence: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_evidence(mut self, evidence: EvidenceId) -> Self {
        self.evidence = Some(evidence);
        self
    }
}

/// A Key Security Indicator: a named, versioned rule that evaluates a
/// control's evidence into a status.
///
/// Guarantees expected of implementations:
/// - Stateless across invocations; the outcome is a pure function of the
///   control snapshot and the evidence list.
/// - Never mutates the model or the store (both are read-only during a run).
/// - An `Err` return is contained by the executor and recorded as `unknown`;
///   it never aborts the run.
#[async_trait]
pub trait Check: Send + Sync {
    /// Unique id within the registry.
    fn id(&self) -> &str;

    /// Version of the check implementation, recorded with every result.
    fn version(&self) -> &str;

    /// Controls this check evaluates.
    fn control_ids(&self) -> Vec<ControlId>;

    /// Evaluate one control. `evidence` is the evidence linked to that
    /// control, newest first.
    async fn validate(
        &self,
        control: &Control,
        evidence: &[Evidence],
    ) -> anyhow::Result<CheckOutcome>;
}

// ---------------------------------------------------------------------------
// FnCheck
// ---------------------------------------------------------------------------

/// Adapter that lifts a plain function into a [`Check`], so simple KSIs
/// need no trait impl.
pub struct FnCheck<F> {
    id: String,
    version: String,
    controls: Vec<ControlId>,
    func: F,
}

impl<F> FnCheck<F>
where
    F: Fn(&Control, &[Evidence]) -> anyhow::Result<CheckOutcome> + Send + Sync,
{
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        controls: Vec<ControlId>,
        func: F,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            controls,
            func,
        }
    }
}

#[async_trait]
impl<F> Check for FnCheck<F>
where
    F: Fn(&Control, &[Evidence]) -> anyhow::Result<CheckOutcome> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn control_ids(&self) -> Vec<ControlId> {
        self.controls.clone()
    }

    async fn validate(
        &self,
        control: &Control,
        evidence: &[Evidence],
    ) -> anyhow::Result<CheckOutcome> {
        (self.func)(control, evidence)
    }
}

// ---------------------------------------------------------------------------
// CheckRegistry
// ---------------------------------------------------------------------------

/// Fixed list of registered checks in registration order.
#[derive(Default)]
pub struct CheckRegistry {
    checks: Vec<Arc<dyn Check>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check. Ids must be unique.
    pub fn register(&mut self, check: Arc<dyn Check>) -> Result<(), RegistryError> {
        if self.checks.iter().any(|c| c.id() == check.id()) {
            return Err(RegistryError::DuplicateCheck {
                check_id: check.id().to_string(),
            });
        }
        self.checks.push(check);
        Ok(())
    }

    /// All checks in registration order.
    pub fn checks(&self) -> &[Arc<dyn Check>] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImplementationStatus;

    fn pass_check(id: &str, control: &str) -> Arc<dyn Check> {
        Arc::new(FnCheck::new(
            id,
            "1.0.0",
            vec![ControlId::from(control)],
            |_control, _evidence| Ok(CheckOutcome::new(KsiStatus::Pass)),
        ))
    }

    fn sample_control(id: &str) -> Control {
        Control {
            id: ControlId::from(id),
            description: "sample".to_string(),
            status: ImplementationStatus::Satisfied,
            evidence: vec![],
        }
    }

    #[test]
    fn register_rejects_duplicate_ids() {
        let mut registry = CheckRegistry::new();
        registry.register(pass_check("ksi-1", "ac-2")).unwrap();

        let err = registry.register(pass_check("ksi-1", "sc-7")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCheck { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut registry = CheckRegistry::new();
        for id in ["first", "second", "third"] {
            registry.register(pass_check(id, "ac-2")).unwrap();
        }
        let ids: Vec<&str> = registry.checks().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn fn_check_invokes_closure() {
        let check = FnCheck::new(
            "no-evidence-fails",
            "2.1.0",
            vec![ControlId::from("ac-2")],
            |_control, evidence| {
                if evidence.is_empty() {
                    Ok(CheckOutcome::new(KsiStatus::Fail).with_message("no evidence linked"))
                } else {
                    Ok(CheckOutcome::new(KsiStatus::Pass))
                }
            },
        );

        assert_eq!(check.id(), "no-evidence-fails");
        assert_eq!(check.version(), "2.1.0");

        let outcome = check.validate(&sample_control("ac-2"), &[]).await.unwrap();
        assert_eq!(outcome.status, KsiStatus::Fail);
        assert_eq!(outcome.message.as_deref(), Some("no evidence linked"));
    }
}
