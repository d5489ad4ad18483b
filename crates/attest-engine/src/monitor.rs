//! Continuous-monitoring feed.
//!
//! External collectors push timestamped findings on an interval. Each
//! finding becomes synthetic evidence (the serialized finding is the
//! payload, so identical findings deduplicate by content) plus a forced
//! re-run of the checks for the affected control.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use attest_store::{AggregatedSnapshot, ControlId, EvidenceId, KsiStatus, NewEvidence, StoreError};

use crate::error::RunError;
use crate::pipeline::ValidationPipeline;

/// A finding pushed by an external collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub control_id: ControlId,
    /// The collector's own determination, recorded in the evidence payload.
    pub status: KsiStatus,
    pub evidence_uri: String,
    pub observed_at: DateTime<Utc>,
    pub detail: String,
}

/// Entry point for the continuous-monitoring interface.
pub struct MonitorFeed {
    pipeline: Arc<ValidationPipeline>,
}

impl MonitorFeed {
    pub fn new(pipeline: Arc<ValidationPipeline>) -> Self {
        Self { pipeline }
    }

    /// Ingest a finding as evidence and re-validate the affected control.
    /// Returns the stored evidence id and the committed snapshot.
    pub async fn push_finding(
        &self,
        finding: Finding,
    ) -> Result<(EvidenceId, AggregatedSnapshot), RunError> {
        let payload = serde_json::to_vec_pretty(&finding).map_err(StoreError::from)?;
        let evidence_id = self
            .pipeline
            .ingest(NewEvidence {
                content: payload,
                source_uri: finding.evidence_uri.clone(),
                description: format!("monitor finding: {}", finding.detail),
                collected_at: finding.observed_at,
                supports: BTreeSet::from([finding.control_id.clone()]),
            })
            .await?;

        let snapshot = self
            .pipeline
            .run_validation(attest_store::RunScope::Controls {
                control_ids: vec![finding.control_id],
            })
            .await?;

        Ok((evidence_id, snapshot))
    }
}
