//! System model: the declared security controls of the target system.
//!
//! The model is loaded once from a declarative JSON control list and is
//! read-only to the rest of the core; only `update_status` and
//! `insert_control` mutate it, and callers serialize those through a single
//! writer path. Checks never mutate controls.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use attest_store::{ControlId, EvidenceId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ModelError {
    /// Duplicate control ids in a model are a fatal configuration error.
    #[error("duplicate control id '{control_id}' in system model")]
    DuplicateControl { control_id: String },

    #[error("unknown control '{control_id}'")]
    UnknownControl { control_id: String },

    #[error("invalid identifier '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("malformed system model: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::Malformed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Controls
// ---------------------------------------------------------------------------

/// Declared implementation status of a control, as stated by the system
/// owner. Distinct from the validated `KsiStatus`: this is what the owner
/// claims, not what the checks observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImplementationStatus {
    NotImplemented,
    Planned,
    Partial,
    Satisfied,
    Inherited,
}

impl ImplementationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImplementationStatus::NotImplemented => "not-implemented",
            ImplementationStatus::Planned => "planned",
            ImplementationStatus::Partial => "partial",
            ImplementationStatus::Satisfied => "satisfied",
            ImplementationStatus::Inherited => "inherited",
        }
    }
}

/// A discrete security requirement the system declares a position on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub id: ControlId,
    pub description: String,
    pub status: ImplementationStatus,
    /// Evidence references declared in the model, oldest first.
    #[serde(default)]
    pub evidence: Vec<EvidenceId>,
}

// ---------------------------------------------------------------------------
// SystemModel
// ---------------------------------------------------------------------------

/// On-disk shape of a system model file.
#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    system_id: String,
    controls: Vec<Control>,
}

/// In-memory representation of the target system: its identifier and the
/// controls it declares, keyed by id in a `BTreeMap` for stable iteration.
#[derive(Debug, Clone)]
pub struct SystemModel {
    system_id: String,
    controls: BTreeMap<ControlId, Control>,
}

impl SystemModel {
    /// Create an empty model for `system_id`.
    pub fn new(system_id: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            controls: BTreeMap::new(),
        }
    }

    /// Parse a declarative control list from JSON.
    ///
    /// Duplicate control ids and malformed identifiers are fatal.
    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let file: ModelFile = serde_json::from_str(raw)?;
        validate_id(&file.system_id)?;
        let mut model = SystemModel::new(file.system_id);
        for control in file.controls {
            model.insert_control(control)?;
        }
        Ok(model)
    }

    /// Load a model from a JSON file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Add a control. Fails on duplicate or malformed ids.
    pub fn insert_control(&mut self, control: Control) -> Result<(), ModelError> {
        validate_id(control.id.as_str())?;
        if self.controls.contains_key(&control.id) {
            return Err(ModelError::DuplicateControl {
                control_id: control.id.as_str().to_string(),
            });
        }
        self.controls.insert(control.id.clone(), control);
        Ok(())
    }

    /// Change the declared implementation status of an existing control.
    pub fn update_status(
        &mut self,
        control_id: &ControlId,
        status: ImplementationStatus,
    ) -> Result<(), ModelError> {
        let control =
            self.controls
                .get_mut(control_id)
                .ok_or_else(|| ModelError::UnknownControl {
                    control_id: control_id.as_str().to_string(),
                })?;
        control.status = status;
        Ok(())
    }

    /// Append an evidence reference to an existing control's declared list.
    /// Already-linked references are not duplicated.
    pub fn link_evidence(
        &mut self,
        control_id: &ControlId,
        evidence_id: EvidenceId,
    ) -> Result<(), ModelError> {
        let control =
            self.controls
                .get_mut(control_id)
                .ok_or_else(|| ModelError::UnknownControl {
                    control_id: control_id.as_str().to_string(),
                })?;
        if !control.evidence.contains(&evidence_id) {
            control.evidence.push(evidence_id);
        }
        Ok(())
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn get(&self, control_id: &ControlId) -> Option<&Control> {
        self.controls.get(control_id)
    }

    pub fn contains(&self, control_id: &ControlId) -> bool {
        self.controls.contains_key(control_id)
    }

    /// All controls in id order.
    pub fn controls(&self) -> impl Iterator<Item = &Control> {
        self.controls.values()
    }

    pub fn control_ids(&self) -> Vec<ControlId> {
        self.controls.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

/// Identifiers end up in file paths and log fields, so the charset is
/// restricted: ASCII lowercase alphanumeric first character, then
/// alphanumerics plus `-`, `_` and `.`.
fn validate_id(id: &str) -> Result<(), ModelError> {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return Err(ModelError::InvalidId {
            id: id.to_string(),
            reason: "must not be empty".to_string(),
        });
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(ModelError::InvalidId {
            id: id.to_string(),
            reason: "must start with a lowercase letter or digit".to_string(),
        });
    }
    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && !matches!(c, '-' | '_' | '.') {
            return Err(ModelError::InvalidId {
                id: id.to_string(),
                reason: format!("character '{c}' is not allowed"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "system_id": "acme-payments",
        "controls": [
            {"id": "ac-2", "description": "Account management", "status": "satisfied"},
            {"id": "sc-7", "description": "Boundary protection", "status": "partial", "evidence": []}
        ]
    }"#;

    #[test]
    fn from_json_loads_controls() {
        let model = SystemModel::from_json(SAMPLE).unwrap();
        assert_eq!(model.system_id(), "acme-payments");
        assert_eq!(model.len(), 2);

        let ac2 = model.get(&ControlId::from("ac-2")).unwrap();
        assert_eq!(ac2.status, ImplementationStatus::Satisfied);
        assert!(ac2.evidence.is_empty());
    }

    #[test]
    fn duplicate_control_id_is_fatal() {
        let raw = r#"{
            "system_id": "dup",
            "controls": [
                {"id": "ac-2", "description": "a", "status": "planned"},
                {"id": "ac-2", "description": "b", "status": "satisfied"}
            ]
        }"#;
        let err = SystemModel::from_json(raw).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateControl { .. }));
    }

    #[test]
    fn malformed_json_is_fatal() {
        let err = SystemModel::from_json("{not json").unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        for bad in ["", "AC-2", "ac 2", "../etc", "-leading"] {
            assert!(
                validate_id(bad).is_err(),
                "expected '{bad}' to be rejected"
            );
        }
        for good in ["ac-2", "sc-7.1", "control_name", "3pao"] {
            assert!(validate_id(good).is_ok(), "expected '{good}' to pass");
        }
    }

    #[test]
    fn update_status_mutates_declared_status_only() {
        let mut model = SystemModel::from_json(SAMPLE).unwrap();
        model
            .update_status(&ControlId::from("sc-7"), ImplementationStatus::Satisfied)
            .unwrap();
        assert_eq!(
            model.get(&ControlId::from("sc-7")).unwrap().status,
            ImplementationStatus::Satisfied
        );

        let err = model
            .update_status(&ControlId::from("zz-99"), ImplementationStatus::Planned)
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownControl { .. }));
    }

    #[test]
    fn link_evidence_appends_without_duplicating() {
        let mut model = SystemModel::from_json(SAMPLE).unwrap();
        let id = EvidenceId::new(attest_store::ContentDigest::from_bytes(b"scan"));

        model.link_evidence(&ControlId::from("ac-2"), id.clone()).unwrap();
        model.link_evidence(&ControlId::from("ac-2"), id.clone()).unwrap();
        assert_eq!(model.get(&ControlId::from("ac-2")).unwrap().evidence, vec![id.clone()]);

        let err = model
            .link_evidence(&ControlId::from("zz-99"), id)
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownControl { .. }));
    }

    #[test]
    fn implementation_status_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ImplementationStatus::NotImplemented).unwrap(),
            "\"not-implemented\""
        );
        let parsed: ImplementationStatus = serde_json::from_str("\"inherited\"").unwrap();
        assert_eq!(parsed, ImplementationStatus::Inherited);
    }

    #[test]
    fn controls_iterate_in_id_order() {
        let mut model = SystemModel::new("ordered");
        for id in ["sc-7", "ac-2", "ia-5"] {
            model
                .insert_control(Control {
                    id: ControlId::from(id),
                    description: String::new(),
                    status: ImplementationStatus::Planned,
                    evidence: vec![],
                })
                .unwrap();
        }
        let ids: Vec<&str> = model.controls().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["ac-2", "ia-5", "sc-7"]);
    }
}
