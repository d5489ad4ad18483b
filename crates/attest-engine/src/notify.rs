//! Drift notification seam.
//!
//! The aggregator emits one event per drift entry to a `DriftNotifier`
//! collaborator. Delivery is at-least-once with bounded retry; consumers
//! must be idempotent on (control_id, from, to, run_id).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use attest_store::{DriftEntry, RunId};

/// One drift entry as delivered to the alerting collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEvent {
    pub run_id: RunId,
    pub revision: u64,
    pub entry: DriftEntry,
}

/// External alerting collaborator.
#[async_trait]
pub trait DriftNotifier: Send + Sync {
    async fn notify(&self, event: &DriftEvent) -> anyhow::Result<()>;
}

/// Notifier that emits each drift event as a structured warning log line.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DriftNotifier for LogNotifier {
    async fn notify(&self, event: &DriftEvent) -> anyhow::Result<()> {
        warn!(
            event = "drift.alert",
            run_id = %event.run_id,
            revision = event.revision,
            kind = %event.entry.kind(),
            control_id = %event.entry.control_id(),
        );
        Ok(())
    }
}

/// Notifier that captures events in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: std::sync::Mutex<Vec<DriftEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far, in delivery order.
    pub fn received(&self) -> Vec<DriftEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriftNotifier for MemoryNotifier {
    async fn notify(&self, event: &DriftEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
