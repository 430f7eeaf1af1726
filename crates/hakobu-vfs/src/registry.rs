//! Backend registry with ordered, first-match resolution.
//!
//! Providers are asked in registration order whether they accept a path;
//! the first that does serves it. There is no fallback: a path nobody
//! accepts is a configuration error ([`VfsError::UnresolvedBackend`]).

use parking_lot::RwLock;
use std::sync::Arc;

use crate::backends::{LocalBackend, MemoryBackend};
use crate::error::{VfsError, VfsResult};
use crate::handle::{FileHandle, FolderHandle};
use crate::ops::VfsOps;
use crate::path::VfsPath;

/// Information about a registered backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    /// Backend name as reported by [`VfsOps::name`].
    pub name: String,
    /// Whether this backend is read-only.
    pub read_only: bool,
}

/// Routes paths to registered backends.
///
/// Construct one per application and share it through `Arc`; handles keep
/// a reference to the registry that created them.
pub struct BackendRegistry {
    providers: RwLock<Vec<Arc<dyn VfsOps>>>,
    /// Base for relative paths. `None` leaves relative paths to the backend.
    working_folder: Option<VfsPath>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field(
                "providers",
                &self.providers.read().iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
            )
            .field("working_folder", &self.working_folder)
            .finish()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            working_folder: None,
        }
    }

    /// A registry serving `mem:` paths from a fresh [`MemoryBackend`] and
    /// everything unschemed (or `file:`) from the host disk.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(MemoryBackend::new());
        registry.register(LocalBackend::host());
        registry
    }

    /// Resolve relative paths against `folder` before routing.
    pub fn with_working_folder(mut self, folder: impl Into<VfsPath>) -> Self {
        self.working_folder = Some(folder.into().normalize().as_folder());
        self
    }

    /// Append a backend. Earlier registrations take precedence.
    pub fn register(&self, backend: impl VfsOps + 'static) {
        self.register_arc(Arc::new(backend));
    }

    /// Append a backend that is already wrapped in `Arc`.
    pub fn register_arc(&self, backend: Arc<dyn VfsOps>) {
        tracing::debug!(backend = backend.name(), "registered backend");
        self.providers.write().push(backend);
    }

    /// List registered backends in resolution order.
    pub fn providers(&self) -> Vec<BackendInfo> {
        self.providers
            .read()
            .iter()
            .map(|p| BackendInfo {
                name: p.name().to_string(),
                read_only: p.read_only(),
            })
            .collect()
    }

    /// Normalize `path`, anchoring relative paths at the working folder.
    pub fn absolute(&self, path: &VfsPath) -> VfsPath {
        match &self.working_folder {
            Some(base) if !path.is_absolute() && path.scheme().is_none() && path.root().is_none() => {
                base.resolve(path)
            }
            _ => path.normalize(),
        }
    }

    /// Find the backend serving `path`.
    pub fn resolve(&self, path: &VfsPath) -> VfsResult<Arc<dyn VfsOps>> {
        let path = self.absolute(path);
        self.providers
            .read()
            .iter()
            .find(|p| p.accepts(&path))
            .cloned()
            .ok_or_else(|| VfsError::unresolved_backend(path.to_string()))
    }

    /// A file handle for `path`. Resolution is deferred to first use.
    pub fn file(self: &Arc<Self>, path: impl Into<VfsPath>) -> FileHandle {
        FileHandle::new(Arc::clone(self), path)
    }

    /// A folder handle for `path`. Resolution is deferred to first use.
    pub fn folder(self: &Arc<Self>, path: impl Into<VfsPath>) -> FolderHandle {
        FolderHandle::new(Arc::clone(self), path)
    }
}
