//! Temporary folders with explicit cleanup.
//!
//! A [`TempFolder`] is removed by [`TempFolder::close`]; nothing happens on
//! process exit. Setting `HAKOBU_KEEP_TEMP=1` (or `true`) keeps temporary
//! folders around for inspection.

use uuid::Uuid;

use crate::error::VfsResult;
use crate::handle::FolderHandle;

/// Environment flag that disables temporary-folder cleanup.
pub const KEEP_TEMP_ENV: &str = "HAKOBU_KEEP_TEMP";

/// True if [`KEEP_TEMP_ENV`] is set to `1` or `true`.
pub fn keep_temp_from_env() -> bool {
    std::env::var(KEEP_TEMP_ENV).is_ok_and(|v| flag_enabled(&v))
}

fn flag_enabled(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true")
}

/// A uniquely named folder that is deleted on [`close`](Self::close).
#[derive(Debug)]
pub struct TempFolder {
    folder: FolderHandle,
    keep: bool,
    closed: bool,
}

impl TempFolder {
    /// Create `<prefix>.<uuid>` under `parent`.
    pub async fn create(parent: &FolderHandle, prefix: &str) -> VfsResult<Self> {
        let folder = parent.folder(&format!("{}.{}", prefix, Uuid::new_v4().simple()));
        folder.mkdirs().await?;
        tracing::debug!(path = %folder, "created temp folder");
        Ok(Self {
            folder,
            keep: keep_temp_from_env(),
            closed: false,
        })
    }

    /// Override the environment setting.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn folder(&self) -> &FolderHandle {
        &self.folder
    }

    /// Delete the folder and its contents, unless kept.
    ///
    /// Returns whether anything was deleted.
    pub async fn close(mut self) -> VfsResult<bool> {
        self.closed = true;
        if self.keep {
            tracing::info!(path = %self.folder, "keeping temp folder");
            return Ok(false);
        }
        self.folder.delete_all().await
    }
}

impl Drop for TempFolder {
    fn drop(&mut self) {
        if !self.closed && !self.keep {
            tracing::warn!(path = %self.folder, "temp folder dropped without close, leaving it in place");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BackendRegistry;
    use std::sync::Arc;

    #[test]
    fn test_flag_values() {
        assert!(flag_enabled("1"));
        assert!(flag_enabled("TRUE"));
        assert!(flag_enabled(" true\n"));
        assert!(!flag_enabled("0"));
        assert!(!flag_enabled("yes"));
        assert!(!flag_enabled(""));
    }

    #[tokio::test]
    async fn test_close_removes_tree() {
        let registry = Arc::new(BackendRegistry::with_defaults());
        let tmp = TempFolder::create(&registry.folder("mem:/tmp"), "job")
            .await
            .unwrap()
            .keep(false);
        let folder = tmp.folder().clone();
        assert!(folder.name().unwrap().starts_with("job."));
        folder.file("a/b.txt").write_all(b"x").await.unwrap();

        assert!(tmp.close().await.unwrap());
        assert!(!folder.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_keep_leaves_tree() {
        let registry = Arc::new(BackendRegistry::with_defaults());
        let tmp = TempFolder::create(&registry.folder("mem:/tmp"), "job")
            .await
            .unwrap()
            .keep(true);
        let folder = tmp.folder().clone();

        assert!(!tmp.close().await.unwrap());
        assert!(folder.exists().await.unwrap());
    }
}
