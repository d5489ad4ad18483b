//! Filesystem-backed evidence store with git-style 2-char sharding.
//!
//! Layout:
//! - `<root>/objects/<first 2 hex chars>/<remaining hex chars>` — raw content
//! - `<root>/meta/<first 2 hex chars>/<remaining hex chars>.json` — metadata
//!
//! The content blob is written first; the metadata rename is the commit
//! point. A blob without metadata is invisible and harmless.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{write_atomic, write_atomic_noclobber};
use crate::error::{StoreError, StoreResult};
use crate::evidence::{Evidence, EvidenceId, EvidenceStore, NewEvidence};
use crate::validation::ControlId;

pub struct FsEvidenceStore {
    objects_dir: PathBuf,
    meta_dir: PathBuf,
}

impl FsEvidenceStore {
    /// Create a store rooted at `root`. Creates the layout if needed.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let objects_dir = root.as_ref().join("objects");
        let meta_dir = root.as_ref().join("meta");
        fs::create_dir_all(&objects_dir)?;
        fs::create_dir_all(&meta_dir)?;
        Ok(Self {
            objects_dir,
            meta_dir,
        })
    }

    fn blob_path(&self, id: &EvidenceId) -> PathBuf {
        let hex = id.digest().as_str();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    fn meta_path(&self, id: &EvidenceId) -> PathBuf {
        let hex = id.digest().as_str();
        self.meta_dir.join(&hex[..2]).join(format!("{}.json", &hex[2..]))
    }

    fn read_meta(&self, path: &Path, id: &EvidenceId) -> StoreResult<Evidence> {
        let raw = fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::EvidenceNotFound {
                    digest: id.digest().as_str().to_string(),
                }
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl EvidenceStore for FsEvidenceStore {
    async fn put(&self, new: NewEvidence) -> StoreResult<EvidenceId> {
        let evidence = Evidence::from_new(&new);
        let id = evidence.id.clone();

        let meta_path = self.meta_path(&id);
        // Records are immutable: re-ingesting identical content is a no-op.
        if meta_path.exists() {
            return Ok(id);
        }

        let blob_path = self.blob_path(&id);
        fs::create_dir_all(blob_path.parent().expect("store paths always have a parent"))?;
        if !blob_path.exists() {
            write_atomic(&blob_path, &new.content)?;
        }

        fs::create_dir_all(meta_path.parent().expect("store paths always have a parent"))?;
        let raw = serde_json::to_vec_pretty(&evidence)?;
        // A concurrent put of the same content wins harmlessly: both sides
        // wrote identical metadata.
        write_atomic_noclobber(&meta_path, &raw)?;
        Ok(id)
    }

    async fn get(&self, id: &EvidenceId) -> StoreResult<Evidence> {
        self.read_meta(&self.meta_path(id), id)
    }

    async fn content(&self, id: &EvidenceId) -> StoreResult<Vec<u8>> {
        let path = self.blob_path(id);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::EvidenceNotFound {
                    digest: id.digest().as_str().to_string(),
                }
            } else {
                StoreError::Io(e)
            }
        })
    }

    async fn contains(&self, id: &EvidenceId) -> StoreResult<bool> {
        Ok(self.meta_path(id).exists())
    }

    async fn linked_to(&self, control_id: &ControlId) -> StoreResult<Vec<Evidence>> {
        let mut linked = Vec::new();
        for shard in fs::read_dir(&self.meta_dir)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let raw = fs::read(entry.path())?;
                let evidence: Evidence = serde_json::from_slice(&raw)?;
                if evidence.supports.contains(control_id) {
                    linked.push(evidence);
                }
            }
        }
        linked.sort_by(|a, b| {
            b.collected_at
                .cmp(&a.collected_at)
                .then_with(|| a.id.digest().cmp(b.id.digest()))
        });
        Ok(linked)
    }
}
