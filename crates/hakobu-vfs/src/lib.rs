//! # hakobu-vfs
//!
//! A virtual filesystem facade over pluggable storage backends.
//!
//! - [`VfsPath`] - Schemed hierarchical path values
//! - [`VfsOps`] - Capability trait every backend implements
//! - [`BackendRegistry`] - Routes paths to the first backend that accepts them
//! - [`FileHandle`] / [`FolderHandle`] - File and folder facades
//! - [`safe_copy`] / [`safe_copy_folder`] - Copies that are never seen half-written
//! - [`FileCache`] - Filename-keyed, first-writer-wins store
//! - [`FolderPruner`] - Background eviction by age, capacity and free space
//!
//! ## Design Decisions
//!
//! - **No global registry**: applications build a [`BackendRegistry`] and
//!   share it through `Arc`; handles keep a reference to it.
//! - **Refusals are values**: `delete`, `rename` and `mkdirs` return
//!   `Ok(false)` for routine filesystem refusals and `Err` for real failures.
//! - **Rename publishes**: a copy becomes visible only through a rename
//!   within one backend.
//! - **Explicit lifecycles**: pruners and temp folders are started and
//!   stopped by their owner, never by exit hooks.

pub mod backends;
mod cache;
mod capability;
mod config;
mod copy;
mod error;
pub mod events;
mod handle;
mod matcher;
mod ops;
mod path;
mod pruner;
mod registry;
mod temp;
mod types;

pub use backends::{FILE_SCHEME, LocalBackend, MEMORY_SCHEME, MemoryBackend};
pub use cache::FileCache;
pub use capability::Capability;
pub use config::{DEFAULT_FREQUENCY_SECS, DEFAULT_MINIMUM_USABLE_PERCENT, PrunerConfig};
pub use copy::{
    BytesResource, CHUNK_SIZE, CopyMode, CopyProgress, NoProgress, Resource, copy_folder,
    safe_copy, safe_copy_folder,
};
pub use error::{VfsError, VfsResult};
pub use events::{EventBus, EventSink, TracingSink, VfsEvent};
pub use handle::{FileHandle, FolderHandle};
pub use matcher::Matcher;
pub use ops::{ReadStream, VfsOps, WriteStream};
pub use path::VfsPath;
pub use pruner::{AlwaysRemove, FolderPruner, PruneReport, PrunerState, RemovalPolicy};
pub use registry::{BackendInfo, BackendRegistry};
pub use temp::{KEEP_TEMP_ENV, TempFolder, keep_temp_from_env};
pub use types::{DirEntry, FileAttr, FileType, Percent, SetAttr, StatFs};
