//! Filename-keyed file cache.
//!
//! A cache is a folder plus a rule: a name is materialized at most once.
//! `add` copies a resource in only when no file of that name exists yet, so
//! the first writer wins. Content is never compared; two different resources
//! that share a name collide and the second `add` returns the first file.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::copy::{self, CopyMode, NoProgress, Resource};
use crate::error::{VfsError, VfsResult};
use crate::events::{tracing_sink, EventSink, VfsEvent};
use crate::handle::{FileHandle, FolderHandle};
use crate::matcher::Matcher;

/// A deduplicating store of files inside one folder.
pub struct FileCache {
    folder: FolderHandle,
    /// Per-name locks; entries are dropped once nobody holds them.
    locks: DashMap<String, Arc<Mutex<()>>>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("folder", &self.folder)
            .field("in_flight", &self.locks.len())
            .finish()
    }
}

impl FileCache {
    pub fn new(folder: FolderHandle) -> Self {
        Self {
            folder,
            locks: DashMap::new(),
            sink: tracing_sink(),
        }
    }

    /// Report cache activity to `sink` instead of the log.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn folder(&self) -> &FolderHandle {
        &self.folder
    }

    /// Add `resource` under its own name.
    pub async fn add<R>(&self, resource: &R, mode: CopyMode) -> VfsResult<FileHandle>
    where
        R: Resource + ?Sized,
    {
        let name = resource
            .name()
            .ok_or_else(|| VfsError::invalid_path("resource has no name"))?
            .to_string();
        self.add_as(resource, &name, mode).await
    }

    /// Add `resource` under `name`.
    ///
    /// If a file called `name` is already cached this is a no-op returning
    /// it. Concurrent calls for the same name run one at a time; different
    /// names proceed in parallel.
    pub async fn add_as<R>(&self, resource: &R, name: &str, mode: CopyMode) -> VfsResult<FileHandle>
    where
        R: Resource + ?Sized,
    {
        check_name(name)?;
        let lock = self.lock_for(name);
        let result = {
            let _guard = lock.lock().await;
            self.materialize(resource, name, mode).await
        };
        drop(lock);
        self.release(name);
        result
    }

    /// The cached file called `name`, if present.
    pub async fn get(&self, name: &str) -> VfsResult<Option<FileHandle>> {
        check_name(name)?;
        let file = self.folder.file(name);
        Ok(file.exists().await?.then_some(file))
    }

    pub async fn contains(&self, name: &str) -> VfsResult<bool> {
        Ok(self.get(name).await?.is_some())
    }

    /// Delete the cached file called `name`. Returns `Ok(false)` if absent.
    pub async fn remove(&self, name: &str) -> VfsResult<bool> {
        check_name(name)?;
        let lock = self.lock_for(name);
        let result = {
            let _guard = lock.lock().await;
            let file = self.folder.file(name);
            let removed = file.delete().await;
            if let Ok(true) = removed {
                self.sink.notify(VfsEvent::CacheRemoved {
                    name: name.to_string(),
                    path: file.path().to_string(),
                });
            }
            removed
        };
        drop(lock);
        self.release(name);
        result
    }

    /// Cached files, excluding in-flight temporaries.
    pub async fn entries(&self) -> VfsResult<Vec<FileHandle>> {
        if !self.folder.exists().await? {
            return Ok(Vec::new());
        }
        self.folder.files(&Matcher::visible()).await
    }

    async fn materialize<R>(&self, resource: &R, name: &str, mode: CopyMode) -> VfsResult<FileHandle>
    where
        R: Resource + ?Sized,
    {
        let target = self.folder.file(name);
        if target.exists().await? {
            self.sink.notify(VfsEvent::CacheHit {
                name: name.to_string(),
                path: target.path().to_string(),
            });
            return Ok(target);
        }

        copy::safe_copy(resource, &target, mode, &NoProgress).await?;
        self.sink.notify(VfsEvent::CacheAdded {
            name: name.to_string(),
            path: target.path().to_string(),
        });
        Ok(target)
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks.entry(name.to_string()).or_default().clone()
    }

    /// Drop the lock entry if no other call is holding or waiting on it.
    fn release(&self, name: &str) {
        self.locks.remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Cache keys are plain file names.
fn check_name(name: &str) -> VfsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(VfsError::invalid_path(format!("not a cache name: {name:?}")));
    }
    Ok(())
}
