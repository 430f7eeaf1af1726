//! Value types shared by backends and handles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// What a path names on its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
    /// Only reported by backends with links; see [`VfsOps::getattr`](crate::VfsOps::getattr).
    Symlink,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Metadata for one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttr {
    /// Byte length; zero for folders.
    pub size: u64,
    pub kind: FileType,
    /// Unix mode bits, best effort on other platforms.
    pub perm: u32,
    /// Last modification. The pruner orders and ages files by this.
    pub mtime: SystemTime,
    /// Creation time, when the backend records one.
    pub ctime: Option<SystemTime>,
}

impl FileAttr {
    fn stamped(kind: FileType, size: u64, perm: u32) -> Self {
        let now = SystemTime::now();
        Self {
            size,
            kind,
            perm,
            mtime: now,
            ctime: Some(now),
        }
    }

    /// A freshly created file.
    pub fn file(size: u64, perm: u32) -> Self {
        Self::stamped(FileType::File, size, perm)
    }

    /// A freshly created folder.
    pub fn directory(perm: u32) -> Self {
        Self::stamped(FileType::Directory, 0, perm)
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// One child of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Bare name, no folder prefix.
    pub name: String,
    /// Kind of the entry itself; links are not followed.
    pub kind: FileType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

/// Attribute changes for [`VfsOps::setattr`](crate::VfsOps::setattr).
///
/// Only the modification time is settable; copies use it to carry the
/// source's age over to the destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetAttr {
    pub mtime: Option<SystemTime>,
}

impl SetAttr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }
}

/// Space on the volume holding a path, in `statvfs` terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatFs {
    pub blocks: u64,
    /// Free including the root reserve.
    pub bfree: u64,
    /// Free to unprivileged writers. Pruning decisions use this.
    pub bavail: u64,
    /// Unit of the three counts above.
    pub frsize: u32,
}

impl StatFs {
    /// Build stats for a volume measured in bytes (block size 1).
    pub fn from_bytes(total: u64, free: u64) -> Self {
        Self {
            blocks: total,
            bfree: free,
            bavail: free,
            frsize: 1,
        }
    }

    pub fn total_space(&self) -> u64 {
        self.blocks.saturating_mul(self.frsize as u64)
    }

    pub fn free_space(&self) -> u64 {
        self.bfree.saturating_mul(self.frsize as u64)
    }

    /// Bytes available to unprivileged writers.
    pub fn usable_space(&self) -> u64 {
        self.bavail.saturating_mul(self.frsize as u64)
    }

    /// Usable space as a fraction of the total. An empty volume reports 100%.
    pub fn usable_fraction(&self) -> Percent {
        if self.blocks == 0 {
            return Percent::FULL;
        }
        Percent::new(self.bavail as f64 * 100.0 / self.blocks as f64)
    }
}

/// A percentage in `0.0..=100.0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percent(f64);

impl Percent {
    pub const ZERO: Percent = Percent(0.0);
    pub const FULL: Percent = Percent(100.0);

    /// Clamp `value` into `0..=100`. NaN becomes zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 100.0))
    }

    /// Build from a `0.0..=1.0` ratio.
    pub fn from_ratio(ratio: f64) -> Self {
        Self::new(ratio * 100.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert!(FileType::Symlink.is_symlink());
    }

    #[test]
    fn test_file_attr_constructors() {
        let file = FileAttr::file(1024, 0o644);
        assert!(file.is_file());
        assert_eq!(file.size, 1024);
        assert_eq!(file.perm, 0o644);

        let dir = FileAttr::directory(0o755);
        assert!(dir.is_dir());
        assert_eq!(dir.size, 0);
    }

    #[test]
    fn test_statfs_space() {
        let stat = StatFs {
            blocks: 100,
            bfree: 30,
            bavail: 20,
            frsize: 4096,
        };
        assert_eq!(stat.total_space(), 409_600);
        assert_eq!(stat.free_space(), 122_880);
        assert_eq!(stat.usable_space(), 81_920);
        assert_eq!(stat.usable_fraction(), Percent::new(20.0));
    }

    #[test]
    fn test_statfs_empty_volume_is_not_pressured() {
        assert_eq!(StatFs::from_bytes(0, 0).usable_fraction(), Percent::FULL);
    }

    #[test]
    fn test_percent_clamps() {
        assert_eq!(Percent::new(140.0), Percent::FULL);
        assert_eq!(Percent::new(-3.0), Percent::ZERO);
        assert_eq!(Percent::new(f64::NAN), Percent::ZERO);
        assert_eq!(Percent::new(15.0).to_string(), "15.0%");
    }
}
