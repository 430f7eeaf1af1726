use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use super::{capability, outcome, rename_within, FolderHandle};
use crate::capability::Capability;
use crate::copy::{self, CopyMode, NoProgress};
use crate::error::{VfsError, VfsResult};
use crate::ops::{ReadStream, VfsOps, WriteStream};
use crate::path::VfsPath;
use crate::registry::BackendRegistry;
use crate::types::FileAttr;

/// A file on some backend.
#[derive(Clone)]
pub struct FileHandle {
    path: VfsPath,
    registry: Arc<BackendRegistry>,
    capability: OnceLock<Capability>,
}

impl FileHandle {
    pub fn new(registry: Arc<BackendRegistry>, path: impl Into<VfsPath>) -> Self {
        let path = registry.absolute(&path.into()).as_file();
        Self {
            path,
            registry,
            capability: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &VfsPath {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.path.name()
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension()
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// The folder holding this file.
    pub fn parent(&self) -> Option<FolderHandle> {
        self.path
            .parent()
            .map(|p| FolderHandle::new(Arc::clone(&self.registry), p))
    }

    /// The backend capability for this path, resolved on first call.
    ///
    /// Fails with [`VfsError::UnresolvedBackend`] when no backend accepts
    /// the path.
    pub fn capability(&self) -> VfsResult<&Capability> {
        capability(&self.capability, &self.registry, &self.path)
    }

    pub fn backend(&self) -> VfsResult<Arc<dyn VfsOps>> {
        Ok(Arc::clone(self.capability()?.ops()))
    }

    /// Host path backing this file, when the backend is a local disk.
    pub fn local_path(&self) -> VfsResult<Option<PathBuf>> {
        Ok(self.capability()?.ops().local_path(&self.path))
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn exists(&self) -> VfsResult<bool> {
        Ok(self.capability()?.exists().await)
    }

    pub async fn is_file(&self) -> VfsResult<bool> {
        Ok(self.capability()?.is_file().await)
    }

    pub async fn attr(&self) -> VfsResult<FileAttr> {
        self.capability()?.attr().await
    }

    pub async fn size(&self) -> VfsResult<u64> {
        self.capability()?.size().await
    }

    pub async fn last_modified(&self) -> VfsResult<SystemTime> {
        self.capability()?.last_modified().await
    }

    pub async fn created(&self) -> VfsResult<Option<SystemTime>> {
        self.capability()?.created().await
    }

    /// Resolved identity (symlinks followed), if the backend reports one.
    pub async fn identity(&self) -> VfsResult<Option<String>> {
        self.capability()?.identity().await
    }

    // ========================================================================
    // Content
    // ========================================================================

    pub async fn open_read(&self) -> VfsResult<ReadStream> {
        self.capability()?.open_read().await
    }

    /// Create or truncate the file for writing. Readers may observe
    /// partial content; use [`FileHandle::copy_to`] for atomic replacement.
    pub async fn open_write(&self) -> VfsResult<WriteStream> {
        self.capability()?.open_write().await
    }

    pub async fn read_all(&self) -> VfsResult<Vec<u8>> {
        self.capability()?.ops().read_all(&self.path).await
    }

    pub async fn read_to_string(&self) -> VfsResult<String> {
        let bytes = self.read_all().await?;
        String::from_utf8(bytes).map_err(|e| {
            VfsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Replace the file contents in place. Not atomic.
    pub async fn write_all(&self, data: &[u8]) -> VfsResult<()> {
        self.capability()?.ops().write_all(&self.path, data).await
    }

    /// Safe-copy this file to `dest`.
    pub async fn copy_to(&self, dest: &FileHandle, mode: CopyMode) -> VfsResult<()> {
        copy::safe_copy(self, dest, mode, &NoProgress).await
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub async fn delete(&self) -> VfsResult<bool> {
        let result = self.capability()?.delete().await;
        outcome("delete", &self.path, result)
    }

    /// Rename onto `target`, replacing an existing file there.
    ///
    /// Returns `Ok(false)` when `target` lives on another backend.
    pub async fn rename(&self, target: &FileHandle) -> VfsResult<bool> {
        let result = rename_within(self.capability()?, target.capability()?).await;
        outcome("rename", &self.path, result)
    }

    pub async fn set_last_modified(&self, mtime: SystemTime) -> VfsResult<bool> {
        let result = self.capability()?.set_last_modified(mtime).await;
        outcome("set_last_modified", &self.path, result)
    }
}

impl PartialEq for FileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FileHandle {}

impl Hash for FileHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileHandle").field(&self.path.to_string()).finish()
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.path, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;

    fn registry() -> Arc<BackendRegistry> {
        Arc::new(BackendRegistry::with_defaults())
    }

    #[tokio::test]
    async fn test_equality_by_path() {
        let registry = registry();
        let a = registry.file("mem:/a/./b.txt");
        let b = registry.file("mem:/a/b.txt");
        assert_eq!(a, b);

        // Resolving one side does not change identity
        a.exists().await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_read_write() {
        let registry = registry();
        let file = registry.file("mem:/notes/today.txt");
        assert!(!file.exists().await.unwrap());

        file.write_all(b"hello").await.unwrap();
        assert!(file.exists().await.unwrap());
        assert!(file.is_file().await.unwrap());
        assert_eq!(file.size().await.unwrap(), 5);
        assert_eq!(file.read_to_string().await.unwrap(), "hello");
        assert!(file.local_path().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unresolved_fails_fast() {
        let registry = Arc::new(BackendRegistry::new());
        registry.register(MemoryBackend::new());
        let file = registry.file("s3://bucket/key");
        assert!(matches!(
            file.exists().await,
            Err(VfsError::UnresolvedBackend(_))
        ));
        assert!(matches!(file.delete().await, Err(VfsError::UnresolvedBackend(_))));
    }

    #[tokio::test]
    async fn test_mutations_report_refusals() {
        let registry = registry();
        let file = registry.file("mem:/missing.txt");
        assert!(!file.delete().await.unwrap());

        let src = registry.file("mem:/a.txt");
        src.write_all(b"a").await.unwrap();
        let dst = registry.file("mem:/b.txt");
        assert!(src.rename(&dst).await.unwrap());
        assert!(!src.exists().await.unwrap());
        assert_eq!(dst.read_all().await.unwrap(), b"a");
        assert!(dst.delete().await.unwrap());
    }

    #[tokio::test]
    async fn test_cross_backend_rename_is_refused() {
        let registry = Arc::new(BackendRegistry::new());
        registry.register(MemoryBackend::new());
        registry.register(MemoryBackend::with_scheme("scratch"));

        let src = registry.file("mem:/a.txt");
        src.write_all(b"a").await.unwrap();
        let dst = registry.file("scratch:/a.txt");
        assert!(!src.rename(&dst).await.unwrap());
        assert!(src.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_set_last_modified() {
        let registry = registry();
        let file = registry.file("mem:/old.bin");
        file.write_all(b"x").await.unwrap();
        let then = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        assert!(file.set_last_modified(then).await.unwrap());
        assert_eq!(file.last_modified().await.unwrap(), then);
    }
}
