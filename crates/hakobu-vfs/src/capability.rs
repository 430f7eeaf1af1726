//! A backend bound to one path.

use std::sync::Arc;
use std::time::SystemTime;

use crate::error::VfsResult;
use crate::ops::{ReadStream, VfsOps, WriteStream};
use crate::path::VfsPath;
use crate::types::{DirEntry, FileAttr, SetAttr, StatFs};

/// A resolved backend together with the path it serves.
///
/// Handles create one on first access and keep it for their lifetime, so
/// backend resolution happens at most once per handle.
#[derive(Clone)]
pub struct Capability {
    ops: Arc<dyn VfsOps>,
    path: VfsPath,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("backend", &self.ops.name())
            .field("path", &self.path)
            .finish()
    }
}

impl Capability {
    pub fn new(ops: Arc<dyn VfsOps>, path: VfsPath) -> Self {
        Self { ops, path }
    }

    pub fn path(&self) -> &VfsPath {
        &self.path
    }

    pub fn ops(&self) -> &Arc<dyn VfsOps> {
        &self.ops
    }

    pub fn backend_name(&self) -> &str {
        self.ops.name()
    }

    pub async fn exists(&self) -> bool {
        self.ops.exists(&self.path).await
    }

    /// Attributes with symlinks followed.
    pub async fn attr(&self) -> VfsResult<FileAttr> {
        self.ops.stat(&self.path).await
    }

    pub async fn is_file(&self) -> bool {
        self.attr().await.map(|a| a.is_file()).unwrap_or(false)
    }

    pub async fn is_folder(&self) -> bool {
        self.attr().await.map(|a| a.is_dir()).unwrap_or(false)
    }

    pub async fn open_read(&self) -> VfsResult<ReadStream> {
        self.ops.open_read(&self.path).await
    }

    pub async fn open_write(&self) -> VfsResult<WriteStream> {
        self.ops.open_write(&self.path).await
    }

    pub async fn size(&self) -> VfsResult<u64> {
        Ok(self.attr().await?.size)
    }

    pub async fn last_modified(&self) -> VfsResult<SystemTime> {
        Ok(self.attr().await?.mtime)
    }

    /// Creation time, where the backend records one.
    pub async fn created(&self) -> VfsResult<Option<SystemTime>> {
        Ok(self.attr().await?.ctime)
    }

    /// Remove the file, or the folder if it is empty.
    pub async fn delete(&self) -> VfsResult<()> {
        let attr = self.ops.getattr(&self.path).await?;
        if attr.is_dir() {
            self.ops.rmdir(&self.path).await
        } else {
            self.ops.unlink(&self.path).await
        }
    }

    /// Rename within this backend. The caller checks backend identity.
    pub async fn rename(&self, target: &VfsPath) -> VfsResult<()> {
        self.ops.rename(&self.path, target).await
    }

    pub async fn mkdirs(&self) -> VfsResult<()> {
        self.ops.mkdir(&self.path).await
    }

    pub async fn list_children(&self) -> VfsResult<Vec<DirEntry>> {
        self.ops.readdir(&self.path).await
    }

    pub async fn set_last_modified(&self, mtime: SystemTime) -> VfsResult<()> {
        self.ops
            .setattr(&self.path, SetAttr::new().with_mtime(mtime))
            .await
            .map(|_| ())
    }

    pub async fn identity(&self) -> VfsResult<Option<String>> {
        self.ops.identity(&self.path).await
    }

    pub async fn statfs(&self) -> VfsResult<StatFs> {
        self.ops.statfs(&self.path).await
    }

    pub async fn free_space(&self) -> VfsResult<u64> {
        Ok(self.statfs().await?.free_space())
    }

    pub async fn usable_space(&self) -> VfsResult<u64> {
        Ok(self.statfs().await?.usable_space())
    }

    pub async fn total_space(&self) -> VfsResult<u64> {
        Ok(self.statfs().await?.total_space())
    }
}
