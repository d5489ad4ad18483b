//! Evidence records and the `EvidenceStore` trait.
//!
//! Evidence is content-addressed: the identifier of a record *is* the
//! SHA-256 digest of its payload, so identical payloads deduplicate and a
//! record can never silently change underneath its references.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;
use crate::error::StoreResult;
use crate::validation::ControlId;

/// Identifier of a stored evidence record (a newtype over its content digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceId(ContentDigest);

impl EvidenceId {
    /// Wrap a content digest as an evidence identifier.
    pub fn new(digest: ContentDigest) -> Self {
        EvidenceId(digest)
    }

    /// The underlying content digest.
    pub fn digest(&self) -> &ContentDigest {
        &self.0
    }

    /// Short form (first 12 hex chars), for log lines and tables.
    pub fn short(&self) -> &str {
        self.0.short()
    }
}

impl std::fmt::Display for EvidenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input for storing a new evidence record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvidence {
    /// Raw evidence payload (scan output, config dump, attestation, ...).
    pub content: Vec<u8>,
    /// Where the payload came from (collector URI, file path, API endpoint).
    pub source_uri: String,
    /// Human-readable description of what the payload demonstrates.
    pub description: String,
    /// When the payload was collected, not when it was stored.
    pub collected_at: DateTime<Utc>,
    /// Controls this evidence supports.
    pub supports: BTreeSet<ControlId>,
}

/// A stored evidence record.
///
/// Immutable once stored. The payload bytes are retrieved separately via
/// [`EvidenceStore::content`]; this envelope carries the metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Content-derived identifier.
    pub id: EvidenceId,
    /// Where the payload came from.
    pub source_uri: String,
    /// What the payload demonstrates.
    pub description: String,
    /// Collection timestamp.
    pub collected_at: DateTime<Utc>,
    /// Controls this evidence supports.
    pub supports: BTreeSet<ControlId>,
}

impl Evidence {
    /// Build the record stored for a [`NewEvidence`] input.
    pub fn from_new(new: &NewEvidence) -> Self {
        Evidence {
            id: EvidenceId::new(ContentDigest::from_bytes(&new.content)),
            source_uri: new.source_uri.clone(),
            description: new.description.clone(),
            collected_at: new.collected_at,
            supports: new.supports.clone(),
        }
    }
}

/// Content-addressed evidence store.
///
/// Guarantees:
/// - `put` is idempotent by content: storing the same payload twice returns
///   the same ID and leaves the original record untouched.
/// - A record is either fully stored (payload and metadata) or absent;
///   readers never observe a half-written record.
/// - `linked_to` returns records newest-first by collection timestamp.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Store evidence and return its content-derived ID.
    ///
    /// If a record with the same content digest already exists, the existing
    /// ID is returned and the stored record is left unchanged.
    async fn put(&self, new: NewEvidence) -> StoreResult<EvidenceId>;

    /// Retrieve an evidence record by ID.
    /// Returns `StoreError::EvidenceNotFound` if absent.
    async fn get(&self, id: &EvidenceId) -> StoreResult<Evidence>;

    /// Retrieve the raw payload bytes for an evidence record.
    async fn content(&self, id: &EvidenceId) -> StoreResult<Vec<u8>>;

    /// Check whether an evidence record exists.
    async fn contains(&self, id: &EvidenceId) -> StoreResult<bool>;

    /// All evidence supporting the given control, newest collection first.
    async fn linked_to(&self, control_id: &ControlId) -> StoreResult<Vec<Evidence>>;
}
