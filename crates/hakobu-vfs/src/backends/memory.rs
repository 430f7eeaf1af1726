//! In-memory filesystem backend.
//!
//! Used for scratch space and testing. All data is ephemeral. An optional
//! volume capacity makes free-space reporting (and write failures when the
//! volume fills up) behave like a real disk.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::io::AsyncWrite;

use crate::error::{VfsError, VfsResult};
use crate::ops::{ReadStream, VfsOps, WriteStream};
use crate::path::VfsPath;
use crate::types::{DirEntry, FileAttr, FileType, SetAttr, StatFs};

/// Default scheme served by [`MemoryBackend`].
pub const MEMORY_SCHEME: &str = "mem";

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }

    fn attr_mut(&mut self) -> &mut FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }

    fn kind(&self) -> FileType {
        match self {
            Entry::File { .. } => FileType::File,
            Entry::Directory { .. } => FileType::Directory,
        }
    }
}

#[derive(Debug)]
struct Store {
    /// Keyed by `/`-joined segments; the root folder is `""`.
    entries: RwLock<BTreeMap<String, Entry>>,
    capacity: Option<u64>,
}

impl Store {
    fn used(entries: &BTreeMap<String, Entry>) -> u64 {
        entries
            .values()
            .map(|e| match e {
                Entry::File { data, .. } => data.len() as u64,
                Entry::Directory { .. } => 0,
            })
            .sum()
    }

    /// Append to an open file. Called from [`MemoryWriter`].
    fn append(&self, key: &str, buf: &[u8]) -> io::Result<usize> {
        let mut entries = self.entries.write();
        if let Some(capacity) = self.capacity {
            if Self::used(&entries) + buf.len() as u64 > capacity {
                return Err(io::Error::new(
                    io::ErrorKind::StorageFull,
                    format!("memory volume full writing {}", key),
                ));
            }
        }
        match entries.get_mut(key) {
            Some(Entry::File { data, attr }) => {
                data.extend_from_slice(buf);
                attr.size = data.len() as u64;
                attr.mtime = SystemTime::now();
                Ok(buf.len())
            }
            Some(Entry::Directory { .. }) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                key.to_string(),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} removed while open for writing", key),
            )),
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via an internal `RwLock`. Cloning shares the same store.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    scheme: String,
    store: Arc<Store>,
    read_only: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem serving `mem:` paths.
    pub fn new() -> Self {
        Self::build(MEMORY_SCHEME, None)
    }

    /// Serve a different scheme (e.g. a second, isolated `scratch:` volume).
    pub fn with_scheme(scheme: &str) -> Self {
        Self::build(scheme, None)
    }

    /// Create a volume that holds at most `capacity` bytes of file data.
    pub fn with_capacity(capacity: u64) -> Self {
        Self::build(MEMORY_SCHEME, Some(capacity))
    }

    fn build(scheme: &str, capacity: Option<u64>) -> Self {
        let mut entries = BTreeMap::new();
        // Root directory always exists
        entries.insert(
            String::new(),
            Entry::Directory {
                attr: FileAttr::directory(0o755),
            },
        );
        Self {
            scheme: scheme.to_ascii_lowercase(),
            store: Arc::new(Store {
                entries: RwLock::new(entries),
                capacity,
            }),
            read_only: false,
        }
    }

    /// Set whether this filesystem is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Bytes of file data currently stored.
    pub fn used_bytes(&self) -> u64 {
        Store::used(&self.store.entries.read())
    }

    /// Normalize a path into a store key.
    fn key(path: &VfsPath) -> String {
        path.normalize().key()
    }

    fn parent_key(key: &str) -> Option<&str> {
        if key.is_empty() {
            None
        } else {
            Some(key.rsplit_once('/').map(|(p, _)| p).unwrap_or(""))
        }
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Ensure all ancestors of `key` exist as folders.
    fn ensure_parents(entries: &mut BTreeMap<String, Entry>, key: &str) -> VfsResult<()> {
        let mut current = String::new();
        let Some((parents, _)) = key.rsplit_once('/') else {
            return Ok(());
        };
        for segment in parents.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            match entries.get(&current) {
                Some(Entry::Directory { .. }) => {}
                Some(Entry::File { .. }) => return Err(VfsError::not_a_directory(current)),
                None => {
                    entries.insert(
                        current.clone(),
                        Entry::Directory {
                            attr: FileAttr::directory(0o755),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Keys strictly below `key`.
    fn descendants(entries: &BTreeMap<String, Entry>, key: &str) -> Vec<String> {
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{}/", key)
        };
        entries
            .keys()
            .filter(|k| !k.is_empty() && k.starts_with(&prefix) && k.as_str() != key)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn accepts(&self, path: &VfsPath) -> bool {
        path.scheme() == Some(self.scheme.as_str())
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    async fn getattr(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        let key = Self::key(path);
        let entries = self.store.entries.read();
        entries
            .get(&key)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(path.to_string()))
    }

    async fn readdir(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        let key = Self::key(path);
        let entries = self.store.entries.read();

        match entries.get(&key) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(path.to_string())),
            None => return Err(VfsError::not_found(path.to_string())),
        }

        // BTreeMap iteration keeps the result sorted by name
        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(k, _)| !k.is_empty() && Self::parent_key(k) == Some(key.as_str()))
            .map(|(k, e)| {
                let name = k.rsplit('/').next().unwrap_or(k);
                DirEntry::new(name, e.kind())
            })
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn open_read(&self, path: &VfsPath) -> VfsResult<ReadStream> {
        let key = Self::key(path);
        let entries = self.store.entries.read();
        match entries.get(&key) {
            Some(Entry::File { data, .. }) => Ok(Box::pin(Cursor::new(data.clone()))),
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(path.to_string())),
            None => Err(VfsError::not_found(path.to_string())),
        }
    }

    async fn open_write(&self, path: &VfsPath) -> VfsResult<WriteStream> {
        self.check_writable()?;
        let key = Self::key(path);
        if key.is_empty() {
            return Err(VfsError::is_a_directory(path.to_string()));
        }
        {
            let mut entries = self.store.entries.write();
            if let Some(Entry::Directory { .. }) = entries.get(&key) {
                return Err(VfsError::is_a_directory(path.to_string()));
            }
            Self::ensure_parents(&mut entries, &key)?;
            entries.insert(
                key.clone(),
                Entry::File {
                    data: Vec::new(),
                    attr: FileAttr::file(0, 0o644),
                },
            );
        }
        Ok(Box::pin(MemoryWriter {
            store: Arc::clone(&self.store),
            key,
        }))
    }

    async fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        self.check_writable()?;
        let key = Self::key(path);
        let mut entries = self.store.entries.write();
        match entries.get(&key) {
            Some(Entry::Directory { .. }) => return Ok(()),
            Some(Entry::File { .. }) => return Err(VfsError::already_exists(path.to_string())),
            None => {}
        }
        Self::ensure_parents(&mut entries, &key)?;
        entries.insert(
            key,
            Entry::Directory {
                attr: FileAttr::directory(0o755),
            },
        );
        Ok(())
    }

    async fn unlink(&self, path: &VfsPath) -> VfsResult<()> {
        self.check_writable()?;
        let key = Self::key(path);
        let mut entries = self.store.entries.write();
        match entries.get(&key) {
            Some(Entry::File { .. }) => {
                entries.remove(&key);
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(path.to_string())),
            None => Err(VfsError::not_found(path.to_string())),
        }
    }

    async fn rmdir(&self, path: &VfsPath) -> VfsResult<()> {
        self.check_writable()?;
        let key = Self::key(path);
        if key.is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        let mut entries = self.store.entries.write();
        match entries.get(&key) {
            Some(Entry::Directory { .. }) => {
                if !Self::descendants(&entries, &key).is_empty() {
                    return Err(VfsError::directory_not_empty(path.to_string()));
                }
                entries.remove(&key);
                Ok(())
            }
            Some(Entry::File { .. }) => Err(VfsError::not_a_directory(path.to_string())),
            None => Err(VfsError::not_found(path.to_string())),
        }
    }

    async fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        self.check_writable()?;
        let from_key = Self::key(from);
        let to_key = Self::key(to);
        if from_key.is_empty() || to_key.is_empty() {
            return Err(VfsError::invalid_path("cannot rename root"));
        }
        if from_key == to_key {
            return Ok(());
        }
        if to_key.starts_with(&format!("{}/", from_key)) {
            return Err(VfsError::invalid_path(format!(
                "cannot move {} into itself",
                from
            )));
        }

        let mut entries = self.store.entries.write();
        let source = entries
            .get(&from_key)
            .cloned()
            .ok_or_else(|| VfsError::not_found(from.to_string()))?;

        match (&source, entries.get(&to_key)) {
            (Entry::File { .. }, Some(Entry::Directory { .. })) => {
                return Err(VfsError::is_a_directory(to.to_string()));
            }
            (Entry::Directory { .. }, Some(Entry::File { .. })) => {
                return Err(VfsError::not_a_directory(to.to_string()));
            }
            (Entry::Directory { .. }, Some(Entry::Directory { .. })) => {
                if !Self::descendants(&entries, &to_key).is_empty() {
                    return Err(VfsError::directory_not_empty(to.to_string()));
                }
            }
            _ => {}
        }

        Self::ensure_parents(&mut entries, &to_key)?;

        // Move the subtree (no-op for files)
        for old in Self::descendants(&entries, &from_key) {
            if let Some(entry) = entries.remove(&old) {
                let new = format!("{}{}", to_key, &old[from_key.len()..]);
                entries.insert(new, entry);
            }
        }
        entries.remove(&from_key);
        entries.insert(to_key, source);
        Ok(())
    }

    async fn setattr(&self, path: &VfsPath, attr: SetAttr) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let key = Self::key(path);
        let mut entries = self.store.entries.write();
        let entry = entries
            .get_mut(&key)
            .ok_or_else(|| VfsError::not_found(path.to_string()))?;
        let current = entry.attr_mut();
        if let Some(mtime) = attr.mtime {
            current.mtime = mtime;
        }
        Ok(current.clone())
    }

    async fn statfs(&self, _path: &VfsPath) -> VfsResult<StatFs> {
        let used = self.used_bytes();
        Ok(match self.store.capacity {
            Some(capacity) => StatFs::from_bytes(capacity, capacity.saturating_sub(used)),
            None => StatFs::from_bytes(u64::MAX, u64::MAX - used),
        })
    }

    async fn identity(&self, path: &VfsPath) -> VfsResult<Option<String>> {
        // No symlinks, so the normalized key is already unique
        Ok(Some(format!("{}:{}", self.scheme, Self::key(path))))
    }
}

/// Write stream that appends straight into the store.
struct MemoryWriter {
    store: Arc<Store>,
    key: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(self.store.append(&self.key, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
