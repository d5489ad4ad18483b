//! End-to-end validation workflow tests against the in-memory backends.
//!
//! These drive the full pipeline: evidence ingestion, check execution,
//! aggregation with drift and staleness handling, history append, drift
//! notification, and artifact projection.

use std::sync::Arc;

use chrono::{Duration, Utc};

use attest_core::registry::{Check, CheckOutcome, CheckRegistry, FnCheck};
use attest_core::{builtin_checks, Control, ImplementationStatus, SystemModel};
use attest_engine::{
    CancelFlag, EngineConfig, Finding, MemoryNotifier, MonitorFeed, RunError, ValidationPipeline,
};
use attest_store::{
    ControlId, DriftEntry, EvidenceStore, KsiStatus, MemoryEvidenceStore, MemoryValidationLedger,
    NewEvidence, RunScope, RunStatus, ValidationLedger,
};

fn model_with(controls: &[(&str, ImplementationStatus)]) -> SystemModel {
    let mut model = SystemModel::new("acme-payments");
    for (id, status) in controls {
        model
            .insert_control(Control {
                id: ControlId::from(*id),
                description: format!("control {id}"),
                status: *status,
                evidence: vec![],
            })
            .unwrap();
    }
    model
}

fn pass_check(id: &str, control: &str) -> Arc<dyn Check> {
    Arc::new(FnCheck::new(
        id,
        "1.0.0",
        vec![ControlId::from(control)],
        |_control, evidence| {
            if evidence.is_empty() {
                Ok(CheckOutcome::new(KsiStatus::Fail).with_message("no evidence linked"))
            } else {
                Ok(CheckOutcome::new(KsiStatus::Pass).with_evidence(evidence[0].id.clone()))
            }
        },
    ))
}

struct Harness {
    pipeline: Arc<ValidationPipeline>,
    ledger: Arc<MemoryValidationLedger>,
    notifier: Arc<MemoryNotifier>,
}

fn harness(model: SystemModel, checks: Vec<Arc<dyn Check>>, config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryEvidenceStore::new());
    let ledger = Arc::new(MemoryValidationLedger::new());
    let notifier = Arc::new(MemoryNotifier::new());

    let mut registry = CheckRegistry::new();
    for check in checks {
        registry.register(check).unwrap();
    }

    let pipeline = Arc::new(ValidationPipeline::new(
        model,
        store,
        Arc::clone(&ledger) as Arc<dyn ValidationLedger>,
        Arc::new(registry),
        Arc::clone(&notifier) as _,
        config,
    ));

    Harness {
        pipeline,
        ledger,
        notifier,
    }
}

async fn ingest_dated(
    pipeline: &ValidationPipeline,
    content: &[u8],
    control: &str,
    age_days: i64,
) {
    pipeline
        .ingest(NewEvidence {
            content: content.to_vec(),
            source_uri: format!("scanner://test/{control}"),
            description: "test evidence".to_string(),
            collected_at: Utc::now() - Duration::days(age_days),
            supports: std::collections::BTreeSet::from([ControlId::from(control)]),
        })
        .await
        .unwrap();
}

// ===========================================================================
// Core scenarios
// ===========================================================================

/// Control `ac-2` with fresh evidence and a passing check: first run tracks
/// it as `true` with `NewlyTracked` drift, a second identical run commits a
/// new revision with zero drift.
#[tokio::test]
async fn fresh_evidence_passing_check_and_drift_settles() {
    let h = harness(
        model_with(&[("ac-2", ImplementationStatus::Satisfied)]),
        vec![pass_check("ac2-check", "ac-2")],
        EngineConfig::default(),
    );
    ingest_dated(&h.pipeline, b"audit log export", "ac-2", 0).await;

    let first = h.pipeline.run_validation(RunScope::Full).await.unwrap();
    assert_eq!(first.revision, 1);
    assert_eq!(
        first.statuses[&ControlId::from("ac-2")].status,
        KsiStatus::Pass
    );
    assert_eq!(first.drift.len(), 1);
    assert!(matches!(first.drift[0], DriftEntry::NewlyTracked { .. }));

    let second = h.pipeline.run_validation(RunScope::Full).await.unwrap();
    assert_eq!(second.revision, 2);
    assert!(second.drift.is_empty(), "identical re-run must be drift-free");

    // History is append-only: two entries for ac-2, in sequence.
    let history = h.pipeline.history(&ControlId::from("ac-2")).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].seq, 1);
    assert_eq!(history[1].seq, 2);

    // One notification for the NewlyTracked entry, none for the second run.
    assert_eq!(h.notifier.received().len(), 1);
}

/// Control `sc-7` with evidence 400 days old (threshold 365) and a check
/// reporting `true`: the staleness override forces `partial` and leaves a
/// diagnostic.
#[tokio::test]
async fn stale_evidence_overrides_passing_check() {
    let h = harness(
        model_with(&[("sc-7", ImplementationStatus::Satisfied)]),
        vec![pass_check("sc7-check", "sc-7")],
        EngineConfig::default().with_evidence_freshness(Duration::days(365)),
    );
    ingest_dated(&h.pipeline, b"old firewall export", "sc-7", 400).await;

    let snapshot = h.pipeline.run_validation(RunScope::Full).await.unwrap();
    let entry = &snapshot.statuses[&ControlId::from("sc-7")];
    assert_eq!(entry.status, KsiStatus::Partial);
    assert!(
        entry.diagnostics.iter().any(|d| d.contains("stale")),
        "expected a staleness diagnostic, got {:?}",
        entry.diagnostics
    );
}

/// A control with no evidence never validates as `true` through a check
/// that requires evidence.
#[tokio::test]
async fn no_evidence_never_passes() {
    let h = harness(
        model_with(&[("ac-2", ImplementationStatus::Satisfied)]),
        builtin_checks(vec![ControlId::from("ac-2")], Duration::days(365)),
        EngineConfig::default(),
    );

    let snapshot = h.pipeline.run_validation(RunScope::Full).await.unwrap();
    assert_eq!(
        snapshot.statuses[&ControlId::from("ac-2")].status,
        KsiStatus::Fail
    );
}

/// The lattice holds through the pipeline: a failing check dominates a
/// passing one on the same control.
#[tokio::test]
async fn fail_dominates_on_shared_control() {
    let fail_check: Arc<dyn Check> = Arc::new(FnCheck::new(
        "port-scan",
        "1.0.0",
        vec![ControlId::from("sc-7")],
        |_control, _evidence| {
            Ok(CheckOutcome::new(KsiStatus::Fail).with_message("port 8080 open"))
        },
    ));
    let h = harness(
        model_with(&[("sc-7", ImplementationStatus::Satisfied)]),
        vec![pass_check("sc7-check", "sc-7"), fail_check],
        EngineConfig::default(),
    );
    ingest_dated(&h.pipeline, b"ruleset", "sc-7", 0).await;

    let snapshot = h.pipeline.run_validation(RunScope::Full).await.unwrap();
    let entry = &snapshot.statuses[&ControlId::from("sc-7")];
    assert_eq!(entry.status, KsiStatus::Fail);
    assert!(entry.diagnostics.iter().any(|d| d.contains("port 8080")));
}

// ===========================================================================
// Drift notification and declared-status changes
// ===========================================================================

#[tokio::test]
async fn status_change_emits_one_notification_per_entry() {
    let h = harness(
        model_with(&[
            ("ac-2", ImplementationStatus::Satisfied),
            ("sc-7", ImplementationStatus::Satisfied),
        ]),
        builtin_checks(
            vec![ControlId::from("ac-2"), ControlId::from("sc-7")],
            Duration::days(365),
        ),
        EngineConfig::default(),
    );
    ingest_dated(&h.pipeline, b"ac2 evidence", "ac-2", 0).await;
    ingest_dated(&h.pipeline, b"sc7 evidence", "sc-7", 0).await;

    h.pipeline.run_validation(RunScope::Full).await.unwrap();
    assert_eq!(h.notifier.received().len(), 2, "two NewlyTracked entries");

    // Flip a declared status: the declared-implementation check degrades
    // and the next run reports StatusChanged for that control only.
    h.pipeline
        .update_declared_status(&ControlId::from("sc-7"), ImplementationStatus::NotImplemented)
        .await
        .unwrap();
    let snapshot = h.pipeline.run_validation(RunScope::Full).await.unwrap();

    assert_eq!(snapshot.drift.len(), 1);
    assert!(matches!(
        &snapshot.drift[0],
        DriftEntry::StatusChanged {
            control_id,
            from: KsiStatus::Pass,
            to: KsiStatus::Fail,
        } if control_id == &ControlId::from("sc-7")
    ));
    assert_eq!(h.notifier.received().len(), 3);
}

// ===========================================================================
// Cancellation
// ===========================================================================

#[tokio::test]
async fn cancelled_run_commits_nothing() {
    let h = harness(
        model_with(&[("ac-2", ImplementationStatus::Satisfied)]),
        vec![pass_check("ac2-check", "ac-2")],
        EngineConfig::default(),
    );
    ingest_dated(&h.pipeline, b"evidence", "ac-2", 0).await;

    let cancel = CancelFlag::new();
    cancel.cancel();
    let err = h
        .pipeline
        .run_validation_with_cancel(RunScope::Full, cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Cancelled));

    // Nothing reached history; the run record is marked Cancelled.
    assert!(h.pipeline.latest_snapshot().await.unwrap().is_none());
    assert!(h
        .pipeline
        .history(&ControlId::from("ac-2"))
        .await
        .unwrap()
        .is_empty());
    let runs = h.ledger.list_runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Cancelled);
}

// ===========================================================================
// Commit serialization
// ===========================================================================

/// Two runs racing on one pipeline both commit: the commit lock assigns
/// consecutive revisions and neither run fails with a revision conflict.
#[tokio::test]
async fn concurrent_runs_commit_consecutive_revisions() {
    let h = harness(
        model_with(&[("ac-2", ImplementationStatus::Satisfied)]),
        vec![pass_check("ac2-check", "ac-2")],
        EngineConfig::default(),
    );
    ingest_dated(&h.pipeline, b"audit log export", "ac-2", 0).await;

    let (a, b) = tokio::join!(
        h.pipeline.run_validation(RunScope::Full),
        h.pipeline.run_validation(RunScope::Full),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut revisions = [a.revision, b.revision];
    revisions.sort_unstable();
    assert_eq!(revisions, [1, 2]);

    // The first committer sees an empty ledger and tracks the control; the
    // second computes drift against the first's snapshot and finds none.
    let (first, second) = if a.revision == 1 { (&a, &b) } else { (&b, &a) };
    assert_eq!(first.drift.len(), 1);
    assert!(matches!(first.drift[0], DriftEntry::NewlyTracked { .. }));
    assert!(second.drift.is_empty());

    let history = h.pipeline.history(&ControlId::from("ac-2")).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].seq, 1);
    assert_eq!(history[1].seq, 2);
    let latest = h.pipeline.latest_snapshot().await.unwrap().unwrap();
    assert_eq!(latest.revision, 2);
}

/// An ingest racing an in-flight run is serialized by the model lock: the
/// run commits cleanly and the new evidence is linked once both complete.
#[tokio::test]
async fn ingest_during_run_is_serialized_by_the_model_lock() {
    let h = harness(
        model_with(&[("ac-2", ImplementationStatus::Satisfied)]),
        vec![pass_check("ac2-check", "ac-2")],
        EngineConfig::default(),
    );
    ingest_dated(&h.pipeline, b"first export", "ac-2", 0).await;

    let (snapshot, evidence_id) = tokio::join!(
        h.pipeline.run_validation(RunScope::Full),
        h.pipeline.ingest_evidence(
            b"second export".to_vec(),
            ControlId::from("ac-2"),
            "late arrival",
            "upload://race",
        ),
    );
    let snapshot = snapshot.unwrap();
    let evidence_id = evidence_id.unwrap();

    assert_eq!(
        snapshot.statuses[&ControlId::from("ac-2")].status,
        KsiStatus::Pass
    );

    let model = h.pipeline.model().await;
    let evidence = &model.get(&ControlId::from("ac-2")).unwrap().evidence;
    assert_eq!(evidence.len(), 2);
    assert!(evidence.contains(&evidence_id));
}

// ===========================================================================
// Projection round-trip
// ===========================================================================

/// Projecting the committed snapshot and parsing the validation-status
/// document recovers exactly the combined (control, status) pairs.
#[tokio::test]
async fn projection_round_trips_statuses() {
    let fail_check: Arc<dyn Check> = Arc::new(FnCheck::new(
        "ia5-check",
        "1.0.0",
        vec![ControlId::from("ia-5")],
        |_control, _evidence| Ok(CheckOutcome::new(KsiStatus::Fail).with_message("weak policy")),
    ));
    let h = harness(
        model_with(&[
            ("ac-2", ImplementationStatus::Satisfied),
            ("ia-5", ImplementationStatus::Partial),
        ]),
        vec![pass_check("ac2-check", "ac-2"), fail_check],
        EngineConfig::default(),
    );
    ingest_dated(&h.pipeline, b"ac2 evidence", "ac-2", 0).await;

    let snapshot = h.pipeline.run_validation(RunScope::Full).await.unwrap();
    let artifacts = h.pipeline.project_latest().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let rev_dir = attest_core::write_artifact_set(dir.path(), &artifacts).unwrap();
    let raw = std::fs::read(rev_dir.join("validation-status.json")).unwrap();
    let parsed: attest_core::ValidationStatusDoc = serde_json::from_slice(&raw).unwrap();

    assert_eq!(parsed.revision, snapshot.revision);
    let recovered: Vec<(ControlId, KsiStatus)> = parsed
        .statuses
        .iter()
        .map(|entry| (entry.control_id.clone(), entry.status))
        .collect();
    let expected: Vec<(ControlId, KsiStatus)> = snapshot
        .statuses
        .iter()
        .map(|(id, entry)| (id.clone(), entry.status))
        .collect();
    assert_eq!(recovered, expected);

    // The findings document carries only the non-passing control.
    assert_eq!(artifacts.findings.findings.len(), 1);
    assert_eq!(
        artifacts.findings.findings[0].control_id,
        ControlId::from("ia-5")
    );
}

// ===========================================================================
// Continuous-monitoring feed
// ===========================================================================

#[tokio::test]
async fn monitor_finding_becomes_evidence_and_scoped_rerun() {
    let h = harness(
        model_with(&[
            ("ac-2", ImplementationStatus::Satisfied),
            ("sc-7", ImplementationStatus::Satisfied),
        ]),
        vec![pass_check("ac2-check", "ac-2"), pass_check("sc7-check", "sc-7")],
        EngineConfig::default(),
    );
    ingest_dated(&h.pipeline, b"ac2 evidence", "ac-2", 0).await;

    // Full run first: ac-2 passes, sc-7 fails for lack of evidence.
    let first = h.pipeline.run_validation(RunScope::Full).await.unwrap();
    assert_eq!(
        first.statuses[&ControlId::from("sc-7")].status,
        KsiStatus::Fail
    );

    let feed = MonitorFeed::new(Arc::clone(&h.pipeline));
    let (evidence_id, snapshot) = feed
        .push_finding(Finding {
            control_id: ControlId::from("sc-7"),
            status: KsiStatus::Pass,
            evidence_uri: "collector://boundary/scan-42".to_string(),
            observed_at: Utc::now(),
            detail: "boundary scan clean".to_string(),
        })
        .await
        .unwrap();

    // The finding landed as evidence and flipped sc-7 on a scoped re-run.
    let model = h.pipeline.model().await;
    assert!(model
        .get(&ControlId::from("sc-7"))
        .unwrap()
        .evidence
        .contains(&evidence_id));
    assert_eq!(snapshot.revision, 2);
    assert_eq!(
        snapshot.statuses[&ControlId::from("sc-7")].status,
        KsiStatus::Pass
    );
    // The untouched control carries forward rather than dropping out.
    assert_eq!(
        snapshot.statuses[&ControlId::from("ac-2")].status,
        KsiStatus::Pass
    );
    assert!(snapshot
        .drift
        .iter()
        .all(|d| d.control_id() == &ControlId::from("sc-7")));
}

#[tokio::test]
async fn ingest_rejects_unknown_control() {
    let h = harness(
        model_with(&[("ac-2", ImplementationStatus::Satisfied)]),
        vec![pass_check("ac2-check", "ac-2")],
        EngineConfig::default(),
    );

    let err = h
        .pipeline
        .ingest_evidence(
            b"payload".to_vec(),
            ControlId::from("zz-99"),
            "orphan evidence",
            "upload://manual",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Model(_)));
}

// ===========================================================================
// Full-run untracking
// ===========================================================================

/// A full run's tracked set is exactly what it evaluated: a check removed
/// from the registry surfaces as NoLongerTracked, never a silent drop.
#[tokio::test]
async fn full_run_surfaces_no_longer_tracked() {
    let model = model_with(&[
        ("ac-2", ImplementationStatus::Satisfied),
        ("sc-7", ImplementationStatus::Satisfied),
    ]);

    // Seed history with both controls through a wide harness, then rebuild
    // the pipeline against the same ledger with only one check registered.
    let store = Arc::new(MemoryEvidenceStore::new());
    let ledger = Arc::new(MemoryValidationLedger::new());
    let notifier = Arc::new(MemoryNotifier::new());

    let mut wide = CheckRegistry::new();
    wide.register(pass_check("ac2-check", "ac-2")).unwrap();
    wide.register(pass_check("sc7-check", "sc-7")).unwrap();
    let pipeline = ValidationPipeline::new(
        model.clone(),
        Arc::clone(&store) as Arc<dyn EvidenceStore>,
        Arc::clone(&ledger) as Arc<dyn ValidationLedger>,
        Arc::new(wide),
        Arc::clone(&notifier) as _,
        EngineConfig::default(),
    );
    ingest_dated(&pipeline, b"ac2 evidence", "ac-2", 0).await;
    ingest_dated(&pipeline, b"sc7 evidence", "sc-7", 0).await;
    pipeline.run_validation(RunScope::Full).await.unwrap();

    let mut narrow = CheckRegistry::new();
    narrow.register(pass_check("ac2-check", "ac-2")).unwrap();
    let pipeline = ValidationPipeline::new(
        model,
        Arc::clone(&store) as Arc<dyn EvidenceStore>,
        Arc::clone(&ledger) as Arc<dyn ValidationLedger>,
        Arc::new(narrow),
        notifier as _,
        EngineConfig::default(),
    );
    // Checks read evidence from the shared store by control id, so the
    // rebuilt pipeline sees it without re-ingesting.
    let snapshot = pipeline.run_validation(RunScope::Full).await.unwrap();

    assert!(!snapshot.statuses.contains_key(&ControlId::from("sc-7")));
    assert!(snapshot.drift.iter().any(|d| matches!(
        d,
        DriftEntry::NoLongerTracked { control_id, .. } if control_id == &ControlId::from("sc-7")
    )));
}
