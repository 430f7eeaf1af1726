//! File predicates for listings, copies and pruning.

use regex::Regex;
use std::fmt;
use std::sync::Arc;

use crate::error::{VfsError, VfsResult};
use crate::handle::FileHandle;

type Predicate = Arc<dyn Fn(&FileHandle) -> bool + Send + Sync>;

/// A cloneable, thread-safe file predicate.
///
/// Matchers see only the handle (path and name); they never touch the backend.
#[derive(Clone)]
pub struct Matcher {
    predicate: Predicate,
    description: String,
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Matcher").field(&self.description).finish()
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::all()
    }
}

impl Matcher {
    /// Matches every file.
    pub fn all() -> Self {
        Self::predicate("all", |_| true)
    }

    /// Matches files whose extension equals `ext` (case-insensitive, no dot).
    pub fn extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::predicate(format!("*.{ext}"), move |file| {
            file.extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(&ext))
        })
    }

    /// Matches files whose name matches `pattern`.
    pub fn name_regex(pattern: &str) -> VfsResult<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| VfsError::other(format!("invalid name pattern {pattern:?}: {e}")))?;
        Ok(Self::predicate(format!("/{pattern}/"), move |file| {
            file.name().is_some_and(|n| re.is_match(n))
        }))
    }

    /// Matches files whose name does not start with a dot.
    ///
    /// Excludes in-flight `.part` temporaries left by safe copies.
    pub fn visible() -> Self {
        Self::predicate("visible", |file| {
            file.name().is_some_and(|n| !n.starts_with('.'))
        })
    }

    pub fn predicate(
        description: impl Into<String>,
        f: impl Fn(&FileHandle) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: Arc::new(f),
            description: description.into(),
        }
    }

    /// Both `self` and `other` must match.
    pub fn and(self, other: Matcher) -> Self {
        let description = format!("{} && {}", self.description, other.description);
        let (a, b) = (self.predicate, other.predicate);
        Self {
            predicate: Arc::new(move |file: &FileHandle| a(file) && b(file)),
            description,
        }
    }

    pub fn matches(&self, file: &FileHandle) -> bool {
        (self.predicate)(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BackendRegistry;

    #[test]
    fn test_matchers() {
        let registry = Arc::new(BackendRegistry::with_defaults());
        let bin = registry.file("mem:/c/data.BIN");
        let hidden = registry.file("mem:/c/.data.bin.1234.part");
        let txt = registry.file("mem:/c/notes.txt");

        let by_ext = Matcher::extension(".bin");
        assert!(by_ext.matches(&bin));
        assert!(!by_ext.matches(&txt));

        let visible_bins = Matcher::visible().and(Matcher::extension("bin"));
        assert!(visible_bins.matches(&bin));
        assert!(!visible_bins.matches(&hidden));

        let re = Matcher::name_regex(r"^notes\.").unwrap();
        assert!(re.matches(&txt));
        assert!(!re.matches(&bin));
        assert!(Matcher::name_regex("(").is_err());

        assert!(Matcher::default().matches(&hidden));
        assert_eq!(visible_bins.to_string(), "visible && *.bin");
    }
}
