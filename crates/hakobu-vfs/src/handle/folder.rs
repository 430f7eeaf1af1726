use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use super::{capability, ignore_missing, outcome, rename_within, FileHandle};
use crate::capability::Capability;
use crate::error::{VfsError, VfsResult};
use crate::matcher::Matcher;
use crate::path::VfsPath;
use crate::registry::BackendRegistry;
use crate::types::{DirEntry, FileType, Percent, StatFs};

/// A folder on some backend.
#[derive(Clone)]
pub struct FolderHandle {
    path: VfsPath,
    registry: Arc<BackendRegistry>,
    capability: OnceLock<Capability>,
}

/// Everything found below a folder.
struct Walk {
    files: Vec<FileHandle>,
    folders: Vec<FolderHandle>,
}

impl FolderHandle {
    pub fn new(registry: Arc<BackendRegistry>, path: impl Into<VfsPath>) -> Self {
        let path = registry.absolute(&path.into()).as_folder();
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

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn parent(&self) -> Option<FolderHandle> {
        self.path
            .parent()
            .map(|p| FolderHandle::new(Arc::clone(&self.registry), p))
    }

    /// A file directly inside this folder.
    pub fn file(&self, name: &str) -> FileHandle {
        FileHandle::new(Arc::clone(&self.registry), self.path.join(name))
    }

    /// A folder directly inside this folder.
    pub fn folder(&self, name: &str) -> FolderHandle {
        FolderHandle::new(Arc::clone(&self.registry), self.path.join(name))
    }

    pub fn capability(&self) -> VfsResult<&Capability> {
        capability(&self.capability, &self.registry, &self.path)
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn exists(&self) -> VfsResult<bool> {
        Ok(self.capability()?.exists().await)
    }

    pub async fn is_folder(&self) -> VfsResult<bool> {
        Ok(self.capability()?.is_folder().await)
    }

    pub async fn is_empty(&self) -> VfsResult<bool> {
        Ok(self.capability()?.list_children().await?.is_empty())
    }

    pub async fn statfs(&self) -> VfsResult<StatFs> {
        self.capability()?.statfs().await
    }

    pub async fn free_space(&self) -> VfsResult<u64> {
        self.capability()?.free_space().await
    }

    pub async fn usable_space(&self) -> VfsResult<u64> {
        self.capability()?.usable_space().await
    }

    pub async fn total_space(&self) -> VfsResult<u64> {
        self.capability()?.total_space().await
    }

    /// Share of the volume still available for writing.
    pub async fn usable_fraction(&self) -> VfsResult<Percent> {
        Ok(self.statfs().await?.usable_fraction())
    }

    // ========================================================================
    // Enumeration
    // ========================================================================

    /// Raw directory entries, sorted by name.
    pub async fn children(&self) -> VfsResult<Vec<DirEntry>> {
        self.capability()?.list_children().await
    }

    /// Direct child files accepted by `matcher`.
    pub async fn files(&self, matcher: &Matcher) -> VfsResult<Vec<FileHandle>> {
        let mut files = Vec::new();
        for entry in self.children().await? {
            if self.entry_kind(&entry).await == Some(FileType::File) {
                let file = self.file(&entry.name);
                if matcher.matches(&file) {
                    files.push(file);
                }
            }
        }
        Ok(files)
    }

    /// Direct child folders.
    pub async fn folders(&self) -> VfsResult<Vec<FolderHandle>> {
        let mut folders = Vec::new();
        for entry in self.children().await? {
            if self.entry_kind(&entry).await == Some(FileType::Directory) {
                folders.push(self.folder(&entry.name));
            }
        }
        Ok(folders)
    }

    /// Every file below this folder accepted by `matcher`, depth first.
    ///
    /// Symlinked folders are followed only when the backend reports an
    /// identity for them, and each identity is visited once, so link cycles
    /// terminate. Backends without identity reporting never have their
    /// symlinks followed.
    pub async fn nested_files(&self, matcher: &Matcher) -> VfsResult<Vec<FileHandle>> {
        let walk = self.walk().await?;
        Ok(walk
            .files
            .into_iter()
            .filter(|f| matcher.matches(f))
            .collect())
    }

    /// Every folder below this folder, parents before children.
    pub async fn nested_folders(&self) -> VfsResult<Vec<FolderHandle>> {
        Ok(self.walk().await?.folders)
    }

    /// Combined size of the nested files accepted by `matcher`.
    ///
    /// Files that vanish during the scan count as zero.
    pub async fn total_size(&self, matcher: &Matcher) -> VfsResult<u64> {
        let mut total = 0u64;
        for file in self.nested_files(matcher).await? {
            total += match file.size().await {
                Ok(size) => size,
                Err(VfsError::NotFound(_)) => 0,
                Err(e) => return Err(e),
            };
        }
        Ok(total)
    }

    /// What a directory entry is, following symlinks. `None` for dangling links.
    async fn entry_kind(&self, entry: &DirEntry) -> Option<FileType> {
        match entry.kind {
            FileType::Symlink => {
                let attr = self.file(&entry.name).attr().await.ok()?;
                Some(attr.kind)
            }
            kind => Some(kind),
        }
    }

    async fn walk(&self) -> VfsResult<Walk> {
        let mut walk = Walk {
            files: Vec::new(),
            folders: Vec::new(),
        };
        let mut visited = HashSet::new();
        if let Some(id) = self.capability()?.identity().await? {
            visited.insert(id);
        }

        let mut pending = vec![self.clone()];
        while let Some(folder) = pending.pop() {
            let entries = match folder.children().await {
                Ok(entries) => entries,
                // Removed underneath us
                Err(VfsError::NotFound(_)) if folder != *self => continue,
                Err(e) => return Err(e),
            };

            let mut subfolders = Vec::new();
            for entry in entries {
                match entry.kind {
                    FileType::File => walk.files.push(folder.file(&entry.name)),
                    FileType::Directory => {
                        let child = folder.folder(&entry.name);
                        let identity = child.capability()?.identity().await?;
                        if identity.is_some_and(|id| !visited.insert(id)) {
                            continue;
                        }
                        subfolders.push(child);
                    }
                    FileType::Symlink => {
                        let child = folder.folder(&entry.name);
                        let Ok(attr) = child.capability()?.attr().await else {
                            tracing::trace!(path = %child, "skipping dangling symlink");
                            continue;
                        };
                        if attr.is_file() {
                            walk.files.push(folder.file(&entry.name));
                            continue;
                        }
                        let identity = child.capability()?.identity().await?;
                        match identity {
                            Some(id) => {
                                if visited.insert(id) {
                                    subfolders.push(child);
                                } else {
                                    tracing::debug!(path = %child, "symlink cycle, not descending");
                                }
                            }
                            // No identity means no cycle check
                            None => {}
                        }
                    }
                }
            }

            walk.folders.extend(subfolders.iter().cloned());
            // Reverse so the stack pops in name order
            pending.extend(subfolders.into_iter().rev());
        }
        Ok(walk)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Create this folder and any missing ancestors.
    pub async fn mkdirs(&self) -> VfsResult<bool> {
        let result = self.capability()?.mkdirs().await;
        outcome("mkdirs", &self.path, result)
    }

    /// Remove this folder if it is empty.
    pub async fn delete(&self) -> VfsResult<bool> {
        let result = self.capability()?.delete().await;
        outcome("delete", &self.path, result)
    }

    /// Remove this folder and everything below it.
    ///
    /// Symlinks are removed, never followed. Returns `Ok(false)` if the
    /// folder did not exist.
    pub async fn delete_all(&self) -> VfsResult<bool> {
        let cap = self.capability()?;
        if !cap.exists().await {
            return Ok(false);
        }
        let ops = Arc::clone(cap.ops());

        let mut pending = vec![self.path.clone()];
        let mut folders = Vec::new();
        while let Some(dir) = pending.pop() {
            for entry in ops.readdir(&dir).await? {
                let child = dir.join(&entry.name);
                if entry.kind.is_dir() {
                    pending.push(child.as_folder());
                } else {
                    ignore_missing(ops.unlink(&child).await)?;
                }
            }
            folders.push(dir);
        }

        // Discovery order puts every folder after its ancestors
        for dir in folders.into_iter().rev() {
            ignore_missing(ops.rmdir(&dir).await)?;
        }
        tracing::debug!(path = %self.path, "deleted folder tree");
        Ok(true)
    }

    /// Rename this folder onto `target` within the same backend.
    pub async fn rename(&self, target: &FolderHandle) -> VfsResult<bool> {
        let result = rename_within(self.capability()?, target.capability()?).await;
        outcome("rename", &self.path, result)
    }
}

impl PartialEq for FolderHandle {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FolderHandle {}

impl Hash for FolderHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Debug for FolderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FolderHandle").field(&self.path.to_string()).finish()
    }
}

impl fmt::Display for FolderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.path, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{LocalBackend, MemoryBackend};

    async fn populated() -> FolderHandle {
        let registry = Arc::new(BackendRegistry::with_defaults());
        let root = registry.folder("mem:/data");
        for (name, body) in [
            ("a.bin", "aaaa"),
            ("b.txt", "bb"),
            ("sub/c.bin", "c"),
            ("sub/deeper/d.bin", "dddddd"),
        ] {
            root.file(name).write_all(body.as_bytes()).await.unwrap();
        }
        root
    }

    fn names(files: &[FileHandle]) -> Vec<String> {
        files.iter().map(|f| f.path().to_string()).collect()
    }

    #[tokio::test]
    async fn test_direct_children() {
        let root = populated().await;
        let files = root.files(&Matcher::all()).await.unwrap();
        assert_eq!(names(&files), vec!["mem:/data/a.bin", "mem:/data/b.txt"]);

        let folders = root.folders().await.unwrap();
        assert_eq!(folders, vec![root.folder("sub")]);
    }

    #[tokio::test]
    async fn test_nested_files() {
        let root = populated().await;
        let bins = root.nested_files(&Matcher::extension("bin")).await.unwrap();
        assert_eq!(
            names(&bins),
            vec![
                "mem:/data/a.bin",
                "mem:/data/sub/c.bin",
                "mem:/data/sub/deeper/d.bin"
            ]
        );
        assert_eq!(root.total_size(&Matcher::extension("bin")).await.unwrap(), 11);
        assert_eq!(root.nested_folders().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let root = populated().await;
        assert!(!root.delete().await.unwrap());
        assert!(root.delete_all().await.unwrap());
        assert!(!root.exists().await.unwrap());
        assert!(!root.delete_all().await.unwrap());
    }

    #[tokio::test]
    async fn test_colon_names_walk_and_delete() {
        let registry = Arc::new(BackendRegistry::with_defaults());
        let root = registry.folder("mem:/c");
        root.file("ab:x.txt").write_all(b"x").await.unwrap();
        root.file("v1:sub/C:y.bin").write_all(b"yy").await.unwrap();

        let files = root.nested_files(&Matcher::all()).await.unwrap();
        assert_eq!(names(&files), vec!["mem:/c/ab:x.txt", "mem:/c/v1:sub/C:y.bin"]);
        assert_eq!(root.total_size(&Matcher::all()).await.unwrap(), 3);
        assert_eq!(root.folders().await.unwrap(), vec![root.folder("v1:sub")]);

        assert!(root.delete_all().await.unwrap());
        assert!(!root.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_mkdirs_and_is_empty() {
        let registry = Arc::new(BackendRegistry::with_defaults());
        let folder = registry.folder("mem:/x/y/z");
        assert!(folder.mkdirs().await.unwrap());
        assert!(folder.is_folder().await.unwrap());
        assert!(folder.is_empty().await.unwrap());
        assert!(folder.parent().unwrap().exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_usable_fraction_from_capacity() {
        let registry = Arc::new(BackendRegistry::new());
        registry.register(MemoryBackend::with_capacity(1000));
        let folder = registry.folder("mem:/c");
        folder.file("f").write_all(&[0u8; 250]).await.unwrap();
        assert_eq!(folder.usable_fraction().await.unwrap(), Percent::new(75.0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_cycle_terminates() {
        let dir = tempfile::TempDir::new().unwrap();
        let base = dunce::canonicalize(dir.path()).unwrap();
        std::fs::create_dir_all(base.join("a/b")).unwrap();
        std::fs::write(base.join("a/b/f.txt"), b"f").unwrap();
        std::os::unix::fs::symlink(base.join("a"), base.join("a/b/loop")).unwrap();

        let registry = Arc::new(BackendRegistry::new());
        registry.register(LocalBackend::new(&base));
        let folder = registry.folder(VfsPath::from_local(&base));
        let files = folder.nested_files(&Matcher::all()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name(), Some("f.txt"));
    }
}
