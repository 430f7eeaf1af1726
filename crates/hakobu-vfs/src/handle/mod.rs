//! File and folder facades.
//!
//! A handle is a path plus the registry that resolves it. The backend is
//! looked up on first use and cached for the handle's lifetime; handles
//! compare and hash by path alone.
//!
//! Mutating operations return `VfsResult<bool>`: `Ok(false)` for the
//! refusals a filesystem routinely produces (missing target, occupied
//! target, non-empty folder, cross-backend rename) and `Err` for anything
//! else.

mod file;
mod folder;

pub use file::FileHandle;
pub use folder::FolderHandle;

use std::sync::{Arc, OnceLock};

use crate::capability::Capability;
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::registry::BackendRegistry;

/// Resolve (once) the capability backing `path`.
fn capability<'a>(
    cell: &'a OnceLock<Capability>,
    registry: &BackendRegistry,
    path: &VfsPath,
) -> VfsResult<&'a Capability> {
    if let Some(cap) = cell.get() {
        return Ok(cap);
    }
    let ops = registry.resolve(path)?;
    Ok(cell.get_or_init(|| Capability::new(ops, path.clone())))
}

/// Translate a mutation result into the handle-level success flag.
fn outcome(op: &'static str, path: &VfsPath, result: VfsResult<()>) -> VfsResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_refusal() => {
            tracing::debug!(op, %path, error = %e, "operation refused");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Rename within a single backend; crossing backends is a refusal.
async fn rename_within(from: &Capability, to: &Capability) -> VfsResult<()> {
    if !Arc::ptr_eq(from.ops(), to.ops()) {
        return Err(VfsError::CrossDevice {
            from: from.path().to_string(),
            to: to.path().to_string(),
        });
    }
    from.rename(to.path()).await
}

/// Treat a vanished entry as already handled.
fn ignore_missing(result: VfsResult<()>) -> VfsResult<()> {
    match result {
        Err(VfsError::NotFound(_)) => Ok(()),
        other => other,
    }
}
