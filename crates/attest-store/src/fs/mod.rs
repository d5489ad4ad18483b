//! Filesystem-backed stores.
//!
//! All writes go through a temp file in the destination directory followed
//! by a rename, so a crash mid-write never leaves a partial record behind.

mod evidence;
mod ledger;

pub use evidence::FsEvidenceStore;
pub use ledger::FsValidationLedger;

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult};

/// Atomic write: write to a temp file in the target's directory, then rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = path.parent().expect("store paths always have a parent");
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Like `write_atomic`, but refuses to replace an existing file.
///
/// Returns `Ok(false)` if `path` already existed, `Ok(true)` if the rename
/// created it.
fn write_atomic_noclobber(path: &Path, bytes: &[u8]) -> StoreResult<bool> {
    let dir = path.parent().expect("store paths always have a parent");
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(StoreError::Io(e.error)),
    }
}
