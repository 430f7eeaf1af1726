//! Storage providers for the registry.
//!
//! - [`LocalBackend`]: unschemed and `file:` paths on the host disk
//! - [`MemoryBackend`]: `mem:` paths held in process, optionally size-capped

mod local;
mod memory;

pub use local::{FILE_SCHEME, LocalBackend};
pub use memory::{MEMORY_SCHEME, MemoryBackend};
