//! Backend capability trait.
//!
//! A backend is anything that can serve [`VfsPath`]s: existence, byte
//! streams, metadata, rename, delete and volume statistics. Backends receive
//! the full normalized path (scheme included) and strip whatever prefix they
//! own themselves.

use async_trait::async_trait;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{DirEntry, FileAttr, SetAttr, StatFs};

/// Byte stream returned by [`VfsOps::open_read`].
pub type ReadStream = Pin<Box<dyn AsyncRead + Send>>;

/// Byte stream returned by [`VfsOps::open_write`].
pub type WriteStream = Pin<Box<dyn AsyncWrite + Send>>;

/// Core backend operations.
///
/// Mutations report failures as [`VfsError`]; the handle layer decides which
/// of those are ordinary refusals and which are real errors.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Identity
    // ========================================================================

    /// Short backend name for logs and listings.
    fn name(&self) -> &str;

    /// Returns true if this backend serves `path`.
    ///
    /// The registry asks providers in registration order; the first one
    /// that accepts wins.
    fn accepts(&self, path: &VfsPath) -> bool;

    /// Returns true if this backend rejects all mutations.
    fn read_only(&self) -> bool;

    // ========================================================================
    // Reading
    // ========================================================================

    /// Attributes of the entry itself (symlinks are not followed).
    async fn getattr(&self, path: &VfsPath) -> VfsResult<FileAttr>;

    /// Attributes with symlinks followed.
    async fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        self.getattr(path).await
    }

    /// Direct children of a folder, sorted by name.
    async fn readdir(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>>;

    /// Open a file for streaming reads.
    async fn open_read(&self, path: &VfsPath) -> VfsResult<ReadStream>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Create or truncate a file and open it for streaming writes.
    ///
    /// Missing parent folders are created.
    async fn open_write(&self, path: &VfsPath) -> VfsResult<WriteStream>;

    /// Create a folder and any missing ancestors. Existing folders are fine.
    async fn mkdir(&self, path: &VfsPath) -> VfsResult<()>;

    /// Remove a file.
    async fn unlink(&self, path: &VfsPath) -> VfsResult<()>;

    /// Remove an empty folder.
    async fn rmdir(&self, path: &VfsPath) -> VfsResult<()>;

    /// Rename a file or folder within this backend.
    ///
    /// An existing file at `to` is replaced.
    async fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()>;

    /// Set file attributes.
    async fn setattr(&self, path: &VfsPath, attr: SetAttr) -> VfsResult<FileAttr>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Statistics for the volume holding `path`.
    async fn statfs(&self, path: &VfsPath) -> VfsResult<StatFs>;

    /// Resolved identity of `path` (symlinks followed), if the backend can
    /// report one. Recursive walks use it to break symlink cycles.
    async fn identity(&self, _path: &VfsPath) -> VfsResult<Option<String>> {
        Ok(None)
    }

    /// Host filesystem path backing `path`, for backends that have one.
    ///
    /// This is the local-disk extension point: callers that want to hand a
    /// real path to another tool check for `Some` explicitly.
    fn local_path(&self, _path: &VfsPath) -> Option<PathBuf> {
        None
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &VfsPath) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &VfsPath) -> VfsResult<Vec<u8>> {
        let mut stream = self.open_read(path).await?;
        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(|e| VfsError::from_io(e, path.to_string()))?;
        Ok(buf)
    }

    /// Replace entire file contents. Not atomic; see [`crate::safe_copy`].
    async fn write_all(&self, path: &VfsPath, data: &[u8]) -> VfsResult<()> {
        let mut stream = self.open_write(path).await?;
        stream
            .write_all(data)
            .await
            .map_err(|e| VfsError::from_io(e, path.to_string()))?;
        stream
            .shutdown()
            .await
            .map_err(|e| VfsError::from_io(e, path.to_string()))?;
        Ok(())
    }
}
