//! Errors raised by backends, handles, copies and the pruner.

use std::io;
use thiserror::Error;

/// Everything that can go wrong below the handle layer.
///
/// Handles translate the refusal variants (see [`VfsError::is_refusal`])
/// into `Ok(false)`; the rest propagate.
#[derive(Debug, Error)]
pub enum VfsError {
    /// No registered backend accepts the path. Configuration error; never retried.
    #[error("no backend accepts path: {0}")]
    UnresolvedBackend(String),

    /// Safe copy refused to replace a populated destination.
    #[error("destination exists: {0}")]
    DestinationExists(String),

    /// I/O failed mid-copy. The destination was left untouched.
    #[error("copy to {path} failed: {source}")]
    PartialCopy {
        path: String,
        #[source]
        source: Box<VfsError>,
    },

    /// A pruner cycle failed. Only ever logged.
    #[error("prune cycle on {folder} failed: {source}")]
    PruneCycle {
        folder: String,
        #[source]
        source: Box<VfsError>,
    },

    /// Nothing at the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Something already occupies the target.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The host refused access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Mutation on a read-only backend.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// A folder operation hit a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A file operation hit a folder.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// `rmdir` on a folder that still has children.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// A confined backend was asked for a path outside its root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// The path cannot name what the operation needs (no file name, bad cache key).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Rename between two backends, or across host devices.
    #[error("cross-device rename: {from} -> {to}")]
    CrossDevice { from: String, to: String },

    /// Host I/O failure with no more specific mapping.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration could not be parsed or is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl VfsError {
    pub fn unresolved_backend(path: impl Into<String>) -> Self {
        Self::UnresolvedBackend(path.into())
    }

    pub fn destination_exists(path: impl Into<String>) -> Self {
        Self::DestinationExists(path.into())
    }

    /// Wrap a mid-copy failure.
    pub fn partial_copy(path: impl Into<String>, source: VfsError) -> Self {
        Self::PartialCopy {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub fn prune_cycle(folder: impl Into<String>, source: VfsError) -> Self {
        Self::PruneCycle {
            folder: folder.into(),
            source: Box::new(source),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Attach the offending path to a bare I/O error.
    ///
    /// `std::io::Error` carries no path; backends call this so callers see
    /// which file failed.
    pub fn from_io(err: io::Error, path: impl Into<String>) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path),
            io::ErrorKind::IsADirectory => Self::IsADirectory(path),
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty(path),
            io::ErrorKind::CrossesDevices => Self::CrossDevice {
                from: path.clone(),
                to: path,
            },
            _ => Self::Io(err),
        }
    }

    /// True for failures a mutating handle operation reports as `Ok(false)`.
    ///
    /// These are the filesystem refusals callers are expected to handle
    /// (target missing, target occupied, folder not empty, cross-device).
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::AlreadyExists(_)
                | Self::DirectoryNotEmpty(_)
                | Self::CrossDevice { .. }
        )
    }
}

/// Lets VFS failures flow through `io::Result` APIs such as `AsyncRead`.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::DestinationExists(msg) => {
                io::Error::new(io::ErrorKind::AlreadyExists, msg)
            }
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::ReadOnly => {
                io::Error::new(io::ErrorKind::PermissionDenied, "filesystem is read-only")
            }
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::PathEscapesRoot(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::InvalidConfig(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            VfsError::UnresolvedBackend(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::CrossDevice { .. } => {
                io::Error::new(io::ErrorKind::CrossesDevices, e.to_string())
            }
            VfsError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;
