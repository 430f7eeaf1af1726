//! Local filesystem backend.
//!
//! Serves unschemed paths and `file:` paths from the host disk. A backend
//! may be confined to a root folder, in which case it only accepts paths
//! under that root and refuses anything that resolves outside it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

use crate::error::{VfsError, VfsResult};
use crate::ops::{ReadStream, VfsOps, WriteStream};
use crate::path::VfsPath;
use crate::types::{DirEntry, FileAttr, FileType, SetAttr, StatFs};

/// Scheme accepted in addition to unschemed paths.
pub const FILE_SCHEME: &str = "file";

/// Local filesystem backend.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    /// Confinement root. `None` serves the whole host filesystem.
    root: Option<PathBuf>,
    read_only: bool,
}

impl LocalBackend {
    /// Serve the whole host filesystem.
    pub fn host() -> Self {
        Self {
            root: None,
            read_only: false,
        }
    }

    /// Serve only paths under `root`.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root: Some(root),
            read_only: false,
        }
    }

    /// Create a read-only backend confined to `root`.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        let mut backend = Self::new(root);
        backend.read_only = true;
        backend
    }

    /// Set whether this filesystem is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Get the confinement root, if any.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Map a path to the host path it names.
    ///
    /// Relative paths are taken relative to the confinement root (or the
    /// process working directory for the host backend). Confined backends
    /// refuse paths that resolve outside the root.
    fn resolve(&self, path: &VfsPath) -> VfsResult<PathBuf> {
        let normalized = path.normalize();
        let local = normalized.to_local_path();

        let Some(root) = &self.root else {
            return Ok(local);
        };

        let full = if normalized.is_absolute() {
            local
        } else {
            root.join(local)
        };

        // Canonicalize the deepest existing ancestor so symlinks can't escape.
        // The leaf itself is kept as named so a symlink can be inspected and
        // removed rather than followed.
        let (mut existing, mut tail) = match (full.parent(), full.file_name()) {
            (Some(parent), Some(name)) => (parent, vec![name.to_owned()]),
            _ => (full.as_path(), Vec::new()),
        };
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_owned());
                    existing = parent;
                }
                _ => break,
            }
        }
        let mut canonical = dunce::canonicalize(existing).unwrap_or_else(|_| existing.to_path_buf());
        for name in tail.into_iter().rev() {
            canonical.push(name);
        }

        if !canonical.starts_with(root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                root.display()
            )));
        }

        Ok(canonical)
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Convert std::fs::Metadata to FileAttr.
    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        };

        #[cfg(unix)]
        let perm = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let perm = if meta.permissions().readonly() { 0o444 } else { 0o644 };

        FileAttr {
            size: meta.len(),
            kind,
            perm,
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: meta.created().ok(),
        }
    }

    fn io_err(err: std::io::Error, path: &Path) -> VfsError {
        VfsError::from_io(err, path.display().to_string())
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn accepts(&self, path: &VfsPath) -> bool {
        match path.scheme() {
            None => {}
            Some(FILE_SCHEME) => {}
            Some(_) => return false,
        }
        match &self.root {
            None => true,
            Some(root) => {
                !path.is_absolute() || path.normalize().to_local_path().starts_with(root)
            }
        }
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    async fn getattr(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full_path)
            .await
            .map_err(|e| Self::io_err(e, &full_path))?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path)
            .await
            .map_err(|e| Self::io_err(e, &full_path))?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        let full_path = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| Self::io_err(e, &full_path))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Self::io_err(e, &full_path))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| Self::io_err(e, &entry.path()))?;
            let kind = if file_type.is_dir() {
                FileType::Directory
            } else if file_type.is_symlink() {
                FileType::Symlink
            } else {
                FileType::File
            };

            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open_read(&self, path: &VfsPath) -> VfsResult<ReadStream> {
        let full_path = self.resolve(path)?;
        let file = fs::File::open(&full_path)
            .await
            .map_err(|e| Self::io_err(e, &full_path))?;
        Ok(Box::pin(file))
    }

    async fn open_write(&self, path: &VfsPath) -> VfsResult<WriteStream> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_err(e, parent))?;
        }

        let file = fs::File::create(&full_path)
            .await
            .map_err(|e| Self::io_err(e, &full_path))?;
        Ok(Box::pin(file))
    }

    async fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        if full_path.is_file() {
            return Err(VfsError::already_exists(full_path.display().to_string()));
        }
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| Self::io_err(e, &full_path))
    }

    async fn unlink(&self, path: &VfsPath) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        fs::remove_file(&full_path)
            .await
            .map_err(|e| Self::io_err(e, &full_path))
    }

    async fn rmdir(&self, path: &VfsPath) -> VfsResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        fs::remove_dir(&full_path)
            .await
            .map_err(|e| Self::io_err(e, &full_path))
    }

    async fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        self.check_writable()?;
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;

        // Ensure parent of destination exists
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_err(e, parent))?;
        }

        fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::CrossesDevices => VfsError::CrossDevice {
                    from: from_path.display().to_string(),
                    to: to_path.display().to_string(),
                },
                _ => Self::io_err(e, &from_path),
            })
    }

    async fn setattr(&self, path: &VfsPath, attr: SetAttr) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        if let Some(mtime) = attr.mtime {
            let target = full_path.clone();
            tokio::task::spawn_blocking(move || {
                std::fs::File::options()
                    .write(true)
                    .open(&target)
                    .and_then(|f| f.set_modified(mtime))
            })
            .await
            .map_err(|e| VfsError::other(format!("set mtime task failed: {}", e)))?
            .map_err(|e| Self::io_err(e, &full_path))?;
        }

        self.stat(path).await
    }

    async fn statfs(&self, path: &VfsPath) -> VfsResult<StatFs> {
        let full_path = self.resolve(path)?;

        // statvfs needs an existing path; walk up until we find one
        let mut probe = full_path.as_path();
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent,
                None => break,
            }
        }

        #[cfg(unix)]
        {
            use rustix::fs::statvfs;

            let stat = statvfs(probe).map_err(|e| VfsError::Io(e.into()))?;

            Ok(StatFs {
                blocks: stat.f_blocks,
                bfree: stat.f_bfree,
                bavail: stat.f_bavail,
                frsize: stat.f_frsize as u32,
            })
        }

        // No volume query off unix: report an unpressured volume
        #[cfg(not(unix))]
        {
            let _ = probe;
            Ok(StatFs::from_bytes(0, 0))
        }
    }

    async fn identity(&self, path: &VfsPath) -> VfsResult<Option<String>> {
        let full_path = self.resolve(path)?;
        let canonical =
            dunce::canonicalize(&full_path).map_err(|e| Self::io_err(e, &full_path))?;
        Ok(Some(canonical.display().to_string()))
    }

    fn local_path(&self, path: &VfsPath) -> Option<PathBuf> {
        self.resolve(path).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (backend, dir)
    }

    fn p(s: &str) -> VfsPath {
        VfsPath::parse(s)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (backend, _dir) = setup();

        backend.write_all(&p("test.txt"), b"hello world").await.unwrap();

        let data = backend.read_all(&p("test.txt")).await.unwrap();
        assert_eq!(data, b"hello world");
        assert_eq!(backend.getattr(&p("test.txt")).await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_accepts() {
        let (backend, dir) = setup();
        let root = backend.root().unwrap().to_path_buf();

        assert!(backend.accepts(&p("relative/file")));
        assert!(backend.accepts(&VfsPath::from_local(&root.join("x"))));
        assert!(!backend.accepts(&p("/definitely/not/under/root")));
        assert!(!backend.accepts(&p("mem:/x")));
        assert!(LocalBackend::host().accepts(&p("file:/etc/hosts")));
        drop(dir);
    }

    #[tokio::test]
    async fn test_mkdir_and_readdir() {
        let (backend, _dir) = setup();

        backend.mkdir(&p("subdir/nested")).await.unwrap();
        backend.write_all(&p("subdir/file.txt"), b"").await.unwrap();
        backend.write_all(&p("root.txt"), b"").await.unwrap();

        let entries = backend.readdir(&p("subdir")).await.unwrap();
        assert_eq!(
            entries,
            vec![DirEntry::file("file.txt"), DirEntry::directory("nested")]
        );
    }

    #[tokio::test]
    async fn test_mkdir_over_file_is_refused() {
        let (backend, _dir) = setup();
        backend.write_all(&p("taken"), b"x").await.unwrap();
        assert!(matches!(
            backend.mkdir(&p("taken")).await,
            Err(VfsError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_read_only() {
        let (mut backend, _dir) = setup();
        backend.set_read_only(true);

        let result = backend.open_write(&p("test.txt")).await;
        assert!(matches!(result, Err(VfsError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_path_escape_blocked() {
        let (backend, _dir) = setup();

        let result = backend.read_all(&p("../../../etc/passwd")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rename() {
        let (backend, _dir) = setup();

        backend.write_all(&p("old.txt"), b"content").await.unwrap();
        backend.rename(&p("old.txt"), &p("new.txt")).await.unwrap();

        assert!(backend.getattr(&p("old.txt")).await.is_err());
        let data = backend.read_all(&p("new.txt")).await.unwrap();
        assert_eq!(data, b"content");
    }

    #[tokio::test]
    async fn test_setattr_mtime() {
        let (backend, _dir) = setup();
        backend.write_all(&p("f"), b"x").await.unwrap();

        let old = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(86_400 * 365);
        let attr = backend
            .setattr(&p("f"), SetAttr::new().with_mtime(old))
            .await
            .unwrap();
        assert_eq!(attr.mtime, old);
    }

    #[tokio::test]
    async fn test_statfs_reports_space() {
        let (backend, _dir) = setup();
        let stat = backend.statfs(&p("not/yet/created")).await.unwrap();
        assert!(stat.total_space() > 0);
        assert!(stat.usable_space() <= stat.total_space());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_kinds_and_identity() {
        let (backend, dir) = setup();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

        assert!(backend.getattr(&p("link")).await.unwrap().is_symlink());
        assert!(backend.stat(&p("link")).await.unwrap().is_dir());
        assert_eq!(
            backend.identity(&p("link")).await.unwrap(),
            backend.identity(&p("real")).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_local_path_extension() {
        let (backend, _dir) = setup();
        let local = backend.local_path(&p("a/b")).unwrap();
        assert!(local.is_absolute());
        assert!(local.ends_with("a/b"));
    }
}
