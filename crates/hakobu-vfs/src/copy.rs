//! Copies that never expose a partially written destination.
//!
//! A file copy streams into a hidden temporary next to the destination and
//! publishes it with a rename. A staged folder copy builds the whole tree in
//! a hidden sibling folder and publishes it with one rename.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{VfsError, VfsResult};
use crate::handle::{FileHandle, FolderHandle};
use crate::matcher::Matcher;
use crate::ops::ReadStream;

/// Copy buffer size.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// What to do when the destination already holds data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyMode {
    /// Replace the destination.
    #[default]
    Overwrite,
    /// Fail with [`VfsError::DestinationExists`] if the destination is non-empty.
    DoNotOverwrite,
}

/// Receives `(copied, total)` byte counts as a copy advances.
pub trait CopyProgress: Send + Sync {
    fn on_progress(&self, copied: u64, total: u64);
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl CopyProgress for NoProgress {
    fn on_progress(&self, _copied: u64, _total: u64) {}
}

impl<F> CopyProgress for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, copied: u64, total: u64) {
        self(copied, total)
    }
}

/// Something that can be copied into the VFS.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Name used when the caller does not supply one.
    fn name(&self) -> Option<&str>;

    async fn open(&self) -> VfsResult<ReadStream>;

    /// Total byte count, used for progress.
    async fn size(&self) -> VfsResult<u64>;

    async fn last_modified(&self) -> VfsResult<Option<SystemTime>> {
        Ok(None)
    }
}

#[async_trait]
impl Resource for FileHandle {
    fn name(&self) -> Option<&str> {
        FileHandle::name(self)
    }

    async fn open(&self) -> VfsResult<ReadStream> {
        self.open_read().await
    }

    async fn size(&self) -> VfsResult<u64> {
        FileHandle::size(self).await
    }

    async fn last_modified(&self) -> VfsResult<Option<SystemTime>> {
        FileHandle::last_modified(self).await.map(Some)
    }
}

/// An in-memory resource.
#[derive(Debug, Clone)]
pub struct BytesResource {
    name: String,
    data: Arc<[u8]>,
}

impl BytesResource {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: Arc::from(data.into()),
        }
    }
}

#[async_trait]
impl Resource for BytesResource {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    async fn open(&self) -> VfsResult<ReadStream> {
        Ok(Box::pin(std::io::Cursor::new(Arc::clone(&self.data))))
    }

    async fn size(&self) -> VfsResult<u64> {
        Ok(self.data.len() as u64)
    }
}

/// Copy `source` to `dest` without ever exposing a partial destination.
///
/// The bytes go to `.<name>.<uuid>.part` in the destination's folder first.
/// Only after the whole stream has been written is the destination removed
/// and the temporary renamed onto it. On failure the temporary is removed
/// (best effort) and the destination is left as it was.
pub async fn safe_copy<R>(
    source: &R,
    dest: &FileHandle,
    mode: CopyMode,
    progress: &dyn CopyProgress,
) -> VfsResult<()>
where
    R: Resource + ?Sized,
{
    let (folder, name) = match (dest.parent(), dest.name()) {
        (Some(folder), Some(name)) => (folder, name),
        _ => return Err(VfsError::invalid_path(dest.path().to_string())),
    };

    if mode == CopyMode::DoNotOverwrite && file_populated(dest).await? {
        return Err(VfsError::destination_exists(dest.path().to_string()));
    }
    folder.mkdirs().await?;

    let temp = folder.file(&format!(".{}.{}.part", name, Uuid::new_v4().simple()));
    let copied = match stream_into(source, &temp, progress).await {
        Ok(copied) => copied,
        Err(e) => {
            discard(&temp).await;
            return Err(VfsError::partial_copy(dest.path().to_string(), e));
        }
    };

    let published = match dest.delete().await {
        Ok(_) => temp.rename(dest).await,
        Err(e) => Err(e),
    };
    match published {
        Ok(true) => {}
        Ok(false) => {
            discard(&temp).await;
            return Err(VfsError::partial_copy(
                dest.path().to_string(),
                VfsError::other(format!("could not rename {} into place", temp)),
            ));
        }
        Err(e) => {
            discard(&temp).await;
            return Err(VfsError::partial_copy(dest.path().to_string(), e));
        }
    }

    tracing::debug!(dest = %dest, bytes = copied, "safe copy complete");
    Ok(())
}

/// Copy every nested file of `src` accepted by `matcher` to the same
/// relative path under `dst`, one safe copy per file, preserving each
/// file's modification time.
///
/// Returns the destination handles in copy order.
pub async fn copy_folder(
    src: &FolderHandle,
    dst: &FolderHandle,
    matcher: &Matcher,
    mode: CopyMode,
    progress: &dyn CopyProgress,
) -> VfsResult<Vec<FileHandle>> {
    let mut copied = Vec::new();
    for file in src.nested_files(matcher).await? {
        let Some(relative) = file.path().relative_to(src.path()) else {
            continue;
        };
        let target = FileHandle::new(Arc::clone(dst.registry()), dst.path().resolve(&relative));
        safe_copy(&file, &target, mode, progress).await?;
        if !target.set_last_modified(file.last_modified().await?).await? {
            tracing::warn!(path = %target, "could not preserve modification time");
        }
        copied.push(target);
    }
    tracing::debug!(src = %src, dst = %dst, files = copied.len(), "folder copy complete");
    Ok(copied)
}

/// Like [`copy_folder`], but an observer never sees a partially populated
/// destination: the tree is built in a hidden `.<name>.<uuid>.staging`
/// sibling and renamed onto `dst` in one step.
pub async fn safe_copy_folder(
    src: &FolderHandle,
    dst: &FolderHandle,
    matcher: &Matcher,
    mode: CopyMode,
    progress: &dyn CopyProgress,
) -> VfsResult<Vec<FileHandle>> {
    let (parent, name) = match (dst.parent(), dst.name()) {
        (Some(parent), Some(name)) => (parent, name),
        _ => return Err(VfsError::invalid_path(dst.path().to_string())),
    };

    if mode == CopyMode::DoNotOverwrite && dst.exists().await? && !dst.is_empty().await? {
        return Err(VfsError::destination_exists(dst.path().to_string()));
    }

    let staging = parent.folder(&format!(".{}.{}.staging", name, Uuid::new_v4().simple()));
    staging.mkdirs().await?;

    let staged = match copy_folder(src, &staging, matcher, CopyMode::Overwrite, progress).await {
        Ok(staged) => staged,
        Err(e) => {
            discard_tree(&staging).await;
            return Err(VfsError::partial_copy(dst.path().to_string(), e));
        }
    };

    let published = match dst.delete_all().await {
        Ok(_) => staging.rename(dst).await,
        Err(e) => Err(e),
    };
    match published {
        Ok(true) => {}
        Ok(false) => {
            discard_tree(&staging).await;
            return Err(VfsError::partial_copy(
                dst.path().to_string(),
                VfsError::other(format!("could not rename {} into place", staging)),
            ));
        }
        Err(e) => {
            discard_tree(&staging).await;
            return Err(VfsError::partial_copy(dst.path().to_string(), e));
        }
    }

    // Re-anchor the staged handles at their published location
    let published = staged
        .iter()
        .filter_map(|f| f.path().relative_to(staging.path()))
        .map(|rel| FileHandle::new(Arc::clone(dst.registry()), dst.path().resolve(&rel)))
        .collect();
    tracing::debug!(src = %src, dst = %dst, "staged folder copy published");
    Ok(published)
}

/// True if `file` exists and holds data. An existing non-empty folder counts too.
async fn file_populated(file: &FileHandle) -> VfsResult<bool> {
    let attr = match file.attr().await {
        Ok(attr) => attr,
        Err(VfsError::NotFound(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    if attr.is_dir() {
        let folder = FolderHandle::new(Arc::clone(file.registry()), file.path().clone());
        return Ok(!folder.is_empty().await?);
    }
    Ok(attr.size > 0)
}

async fn stream_into<R>(source: &R, temp: &FileHandle, progress: &dyn CopyProgress) -> VfsResult<u64>
where
    R: Resource + ?Sized,
{
    let total = source.size().await?;
    let mut reader = source.open().await?;
    let mut writer = temp.open_write().await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;

    progress.on_progress(0, total);
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
        progress.on_progress(copied, total);
    }
    writer.shutdown().await?;
    Ok(copied)
}

async fn discard(temp: &FileHandle) {
    if let Err(e) = temp.delete().await {
        tracing::warn!(path = %temp, error = %e, "failed to remove temporary file");
    }
}

async fn discard_tree(staging: &FolderHandle) {
    if let Err(e) = staging.delete_all().await {
        tracing::warn!(path = %staging, error = %e, "failed to remove staging folder");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::registry::BackendRegistry;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn registry() -> Arc<BackendRegistry> {
        Arc::new(BackendRegistry::with_defaults())
    }

    #[tokio::test]
    async fn test_copy_bytes_with_progress() {
        let registry = registry();
        let dest = registry.file("mem:/out/big.bin");
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let seen = Mutex::new(Vec::new());
        let progress = |copied: u64, total: u64| seen.lock().push((copied, total));

        safe_copy(&BytesResource::new("big.bin", data.clone()), &dest, CopyMode::Overwrite, &progress)
            .await
            .unwrap();

        assert_eq!(dest.read_all().await.unwrap(), data);
        let seen = seen.lock();
        assert_eq!(seen.first(), Some(&(0, data.len() as u64)));
        assert_eq!(seen.last(), Some(&(data.len() as u64, data.len() as u64)));

        // No temporaries left behind
        let names: Vec<_> = dest.parent().unwrap().children().await.unwrap();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_do_not_overwrite() {
        let registry = registry();
        let dest = registry.file("mem:/x.txt");
        dest.write_all(b"original").await.unwrap();

        let err = safe_copy(
            &BytesResource::new("x.txt", "replacement"),
            &dest,
            CopyMode::DoNotOverwrite,
            &NoProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VfsError::DestinationExists(_)));
        assert_eq!(dest.read_all().await.unwrap(), b"original");

        // An empty destination is not protected
        let empty = registry.file("mem:/empty.txt");
        empty.write_all(b"").await.unwrap();
        safe_copy(&BytesResource::new("e", "data"), &empty, CopyMode::DoNotOverwrite, &NoProgress)
            .await
            .unwrap();
        assert_eq!(empty.read_all().await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_destination() {
        let registry = Arc::new(BackendRegistry::new());
        registry.register(MemoryBackend::with_capacity(16));
        let dest = registry.file("mem:/d.bin");
        dest.write_all(b"keep").await.unwrap();

        let err = safe_copy(&BytesResource::new("d.bin", vec![1u8; 64]), &dest, CopyMode::Overwrite, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::PartialCopy { .. }));
        assert_eq!(dest.read_all().await.unwrap(), b"keep");
        assert_eq!(dest.parent().unwrap().children().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_copy_onto_populated_folder_cleans_up() {
        let registry = registry();
        registry.file("mem:/out/d/inner").write_all(b"inner").await.unwrap();
        let dest = registry.file("mem:/out/d");

        let err = safe_copy(&BytesResource::new("d", "data"), &dest, CopyMode::Overwrite, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::PartialCopy { .. }));

        let names: Vec<_> = registry
            .folder("mem:/out")
            .children()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["d"]);
        assert_eq!(registry.file("mem:/out/d/inner").read_all().await.unwrap(), b"inner");
    }

    #[tokio::test]
    async fn test_staged_copy_onto_file_cleans_up() {
        let registry = registry();
        let src = registry.folder("mem:/src");
        src.file("one").write_all(b"1").await.unwrap();
        let blocker = registry.file("mem:/published/tree");
        blocker.write_all(b"not a folder").await.unwrap();

        let dst = registry.folder("mem:/published/tree");
        let err = safe_copy_folder(&src, &dst, &Matcher::all(), CopyMode::Overwrite, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::PartialCopy { .. }));

        let siblings = registry.folder("mem:/published").children().await.unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].name, "tree");
        assert_eq!(blocker.read_all().await.unwrap(), b"not a folder");
    }

    #[tokio::test]
    async fn test_copy_folder_preserves_mtime() {
        let registry = registry();
        let src = registry.folder("mem:/src");
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400 * 365);
        for name in ["a.bin", "nested/b.bin", "skip.txt"] {
            let f = src.file(name);
            f.write_all(name.as_bytes()).await.unwrap();
            f.set_last_modified(old).await.unwrap();
        }

        let dst = registry.folder("mem:/dst");
        let copied = copy_folder(&src, &dst, &Matcher::extension("bin"), CopyMode::Overwrite, &NoProgress)
            .await
            .unwrap();
        assert_eq!(copied, vec![dst.file("a.bin"), dst.file("nested/b.bin")]);
        assert_eq!(dst.file("nested/b.bin").read_all().await.unwrap(), b"nested/b.bin");
        assert_eq!(dst.file("a.bin").last_modified().await.unwrap(), old);
        assert!(!dst.file("skip.txt").exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_staged_folder_copy() {
        let registry = registry();
        let src = registry.folder("mem:/src");
        src.file("one").write_all(b"1").await.unwrap();
        src.file("two/three").write_all(b"3").await.unwrap();

        let dst = registry.folder("mem:/published/tree");
        dst.file("stale").write_all(b"old").await.unwrap();

        let err = safe_copy_folder(&src, &dst, &Matcher::all(), CopyMode::DoNotOverwrite, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::DestinationExists(_)));

        let published = safe_copy_folder(&src, &dst, &Matcher::all(), CopyMode::Overwrite, &NoProgress)
            .await
            .unwrap();
        assert_eq!(published, vec![dst.file("one"), dst.file("two/three")]);
        assert!(!dst.file("stale").exists().await.unwrap());
        assert_eq!(dst.file("two/three").read_all().await.unwrap(), b"3");

        // Only the published tree remains in the parent
        let siblings = dst.parent().unwrap().children().await.unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].name, "tree");
    }
}
