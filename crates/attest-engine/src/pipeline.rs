//! Validation pipeline facade.
//!
//! Ties the model, store, ledger, registry and notifier together behind
//! the run-level lock: validation runs take the lock shared, mutation
//! (evidence ingestion, declared-status updates) takes it exclusive. A run
//! therefore always sees a frozen model and store (snapshot isolation),
//! while any number of runs may evaluate concurrently.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::RwLock;

use attest_core::obs::{
    emit_evidence_ingested, emit_run_cancelled, emit_run_committed, emit_run_finalize_error,
    emit_run_started, RunSpan,
};
use attest_core::projector::{project, ArtifactSet};
use attest_core::registry::CheckRegistry;
use attest_core::{ImplementationStatus, ModelError, SystemModel};
use attest_store::{
    AggregatedSnapshot, ControlId, EvidenceId, EvidenceStore, NewEvidence, RecordedResult, RunId,
    RunScope, ValidationLedger,
};

use crate::aggregator::Aggregator;
use crate::config::EngineConfig;
use crate::error::RunError;
use crate::executor::{CancelFlag, Executor};
use crate::notify::DriftNotifier;

pub struct ValidationPipeline {
    model: RwLock<SystemModel>,
    store: Arc<dyn EvidenceStore>,
    ledger: Arc<dyn ValidationLedger>,
    executor: Executor,
    aggregator: Aggregator,
    config: EngineConfig,
}

impl ValidationPipeline {
    pub fn new(
        model: SystemModel,
        store: Arc<dyn EvidenceStore>,
        ledger: Arc<dyn ValidationLedger>,
        registry: Arc<CheckRegistry>,
        notifier: Arc<dyn DriftNotifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            model: RwLock::new(model),
            store: Arc::clone(&store),
            ledger: Arc::clone(&ledger),
            executor: Executor::new(Arc::clone(&store), registry, config.clone()),
            aggregator: Aggregator::new(store, ledger, notifier, config.clone()),
            config,
        }
    }

    /// Run a validation and commit its snapshot.
    pub async fn run_validation(&self, scope: RunScope) -> Result<AggregatedSnapshot, RunError> {
        self.run_validation_with_cancel(scope, CancelFlag::new())
            .await
    }

    /// Run a validation with an external cancellation handle. Cancelling
    /// before the aggregation commit discards the run's partial results.
    pub async fn run_validation_with_cancel(
        &self,
        scope: RunScope,
        cancel: CancelFlag,
    ) -> Result<AggregatedSnapshot, RunError> {
        let start = Instant::now();

        // Held shared for the whole run: mutation waits, runs proceed.
        let model = self.model.read().await;

        let run_id = self
            .config
            .retry
            .run(|| self.ledger.begin_run(scope.clone()))
            .await?;
        let _span = RunSpan::enter(&run_id.0);
        emit_run_started(&run_id.0, scope.label(), model.len());

        let result = self
            .execute_and_commit(&model, &run_id, scope, &cancel)
            .await;

        match &result {
            Ok(snapshot) => {
                emit_run_committed(
                    &run_id.0,
                    snapshot.revision,
                    snapshot.drift.len(),
                    start.elapsed().as_millis() as u64,
                );
            }
            Err(RunError::Cancelled) => {
                emit_run_cancelled(&run_id.0);
                if let Err(err) = self.ledger.cancel_run(&run_id).await {
                    emit_run_finalize_error(&run_id.0, &err);
                }
            }
            Err(err) => {
                emit_run_finalize_error(&run_id.0, err);
                if let Err(err) = self.ledger.abort_run(&run_id).await {
                    emit_run_finalize_error(&run_id.0, &err);
                }
            }
        }

        result
    }

    async fn execute_and_commit(
        &self,
        model: &SystemModel,
        run_id: &RunId,
        scope: RunScope,
        cancel: &CancelFlag,
    ) -> Result<AggregatedSnapshot, RunError> {
        let report = self.executor.run(model, &scope, cancel).await?;
        self.aggregator.commit(run_id, scope, report, cancel).await
    }

    /// Store an evidence record and link it to the controls it supports.
    ///
    /// Every supported control must exist in the model. Takes the run lock
    /// exclusively so no in-flight run observes the new evidence.
    pub async fn ingest(&self, new: NewEvidence) -> Result<EvidenceId, RunError> {
        let mut model = self.model.write().await;
        for control_id in &new.supports {
            if !model.contains(control_id) {
                return Err(RunError::Model(ModelError::UnknownControl {
                    control_id: control_id.as_str().to_string(),
                }));
            }
        }

        let supports = new.supports.clone();
        let id = self.config.retry.run(|| self.store.put(new.clone())).await?;
        for control_id in &supports {
            model.link_evidence(control_id, id.clone())?;
            emit_evidence_ingested(id.short(), control_id.as_str());
        }
        Ok(id)
    }

    /// Convenience ingestion path: one payload supporting one control,
    /// collected now.
    pub async fn ingest_evidence(
        &self,
        content: Vec<u8>,
        control_id: ControlId,
        description: impl Into<String>,
        source_uri: impl Into<String>,
    ) -> Result<EvidenceId, RunError> {
        self.ingest(NewEvidence {
            content,
            source_uri: source_uri.into(),
            description: description.into(),
            collected_at: Utc::now(),
            supports: std::collections::BTreeSet::from([control_id]),
        })
        .await
    }

    /// Change a control's declared implementation status.
    pub async fn update_declared_status(
        &self,
        control_id: &ControlId,
        status: ImplementationStatus,
    ) -> Result<(), RunError> {
        let mut model = self.model.write().await;
        model.update_status(control_id, status)?;
        Ok(())
    }

    /// Project the latest committed snapshot into the artifact set.
    pub async fn project_latest(&self) -> Result<ArtifactSet, RunError> {
        let snapshot = self
            .config
            .retry
            .run(|| self.ledger.latest_snapshot())
            .await?
            .ok_or(RunError::NoSnapshot)?;
        let model = self.model.read().await;
        Ok(project(&snapshot, &model)?)
    }

    /// Project a specific committed revision.
    pub async fn project_at(&self, revision: u64) -> Result<ArtifactSet, RunError> {
        let snapshot = self
            .config
            .retry
            .run(|| self.ledger.snapshot_at(revision))
            .await?;
        let model = self.model.read().await;
        Ok(project(&snapshot, &model)?)
    }

    /// The append-only validation record for a control.
    pub async fn history(&self, control_id: &ControlId) -> Result<Vec<RecordedResult>, RunError> {
        Ok(self
            .config
            .retry
            .run(|| self.ledger.history(control_id))
            .await?)
    }

    /// The latest committed snapshot, if any.
    pub async fn latest_snapshot(&self) -> Result<Option<AggregatedSnapshot>, RunError> {
        Ok(self
            .config
            .retry
            .run(|| self.ledger.latest_snapshot())
            .await?)
    }

    /// A specific committed snapshot.
    pub async fn snapshot_at(&self, revision: u64) -> Result<AggregatedSnapshot, RunError> {
        Ok(self
            .config
            .retry
            .run(|| self.ledger.snapshot_at(revision))
            .await?)
    }

    /// A frozen copy of the current model.
    pub async fn model(&self) -> SystemModel {
        self.model.read().await.clone()
    }
}
