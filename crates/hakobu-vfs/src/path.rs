//! Schemed hierarchical path values.
//!
//! Grammar: `[scheme:][//authority/]segment(/segment)*[/]`
//!
//! A [`VfsPath`] is immutable; every transformation returns a new value.
//! Single-letter prefixes (`C:`) are treated as a drive root, not a scheme,
//! so Windows-style local paths parse the way a user would expect.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// An immutable, schemed, hierarchical path.
///
/// Equality and hashing are structural. Use [`VfsPath::normalize`] before
/// comparing paths that may contain `.` or `..` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VfsPath {
    scheme: Option<String>,
    authority: Option<String>,
    root: Option<String>,
    absolute: bool,
    segments: Vec<String>,
    trailing_slash: bool,
}

impl VfsPath {
    /// Parse a path string.
    ///
    /// Parsing never fails: empty input (or a lone `.`) is the relative
    /// current folder. Redundant separators and `.` segments are dropped.
    pub fn parse(input: &str) -> Self {
        let mut rest = input;

        let mut scheme = None;
        if let Some(idx) = rest.find(':') {
            let candidate = &rest[..idx];
            if candidate.len() > 1 && is_scheme(candidate) {
                scheme = Some(candidate.to_ascii_lowercase());
                rest = &rest[idx + 1..];
            }
        }

        let mut authority = None;
        if let Some(after) = rest.strip_prefix("//") {
            let end = after.find('/').unwrap_or(after.len());
            authority = Some(after[..end].to_string());
            rest = &after[end..];
        }

        let mut root = None;
        let bytes = rest.as_bytes();
        if bytes.len() >= 2
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes.len() == 2 || bytes[2] == b'/')
        {
            root = Some(rest[..2].to_ascii_uppercase());
            rest = &rest[2..];
        }

        let absolute = rest.starts_with('/') || authority.is_some();
        let segments: Vec<String> = rest
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_string)
            .collect();
        let trailing_slash = !segments.is_empty() && (rest.ends_with('/') || rest.ends_with("/."));

        Self {
            scheme,
            authority,
            root,
            absolute,
            segments,
            trailing_slash,
        }
    }

    /// Build a path from a host filesystem path.
    pub fn from_local(path: &Path) -> Self {
        let s = path.to_string_lossy();
        if cfg!(windows) {
            Self::parse(&s.replace('\\', "/"))
        } else {
            Self::parse(&s)
        }
    }

    /// The scheme, lowercased, if any.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// The authority (`//host`) component, if any.
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// The root element (drive letter such as `C:`), if any.
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Path segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// True when the path was written with a trailing `/` (an explicit folder reference).
    pub fn has_trailing_slash(&self) -> bool {
        self.trailing_slash
    }

    /// True for the bare root of an absolute path (`/`, `mem:/`, `C:/`).
    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    /// The final segment, if any.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The extension of the final segment, without the dot.
    ///
    /// Dot-files such as `.hidden` have no extension.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name()?;
        let idx = name.rfind('.')?;
        if idx == 0 || idx + 1 == name.len() {
            None
        } else {
            Some(&name[idx + 1..])
        }
    }

    /// Remove `.` segments and resolve `..` against the preceding segment.
    ///
    /// `..` never climbs above the root of an absolute path, and never
    /// crosses the scheme or authority. Leading `..` on a relative path is kept.
    pub fn normalize(&self) -> Self {
        let mut out: Vec<String> = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            match seg.as_str() {
                "." => {}
                ".." => match out.last() {
                    Some(last) if last != ".." => {
                        out.pop();
                    }
                    _ if self.absolute => {}
                    _ => out.push(seg.clone()),
                },
                _ => out.push(seg.clone()),
            }
        }
        Self {
            trailing_slash: self.trailing_slash && !out.is_empty(),
            segments: out,
            ..self.clone()
        }
    }

    /// Append a relative path to this one.
    ///
    /// `child` is split on `/` only and taken literally: a name such as
    /// `v1:model.bin` is one segment, never a scheme or drive. Leading
    /// separators are ignored; use [`VfsPath::resolve`] when an absolute
    /// argument should replace the base.
    pub fn join(&self, child: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            child
                .split('/')
                .filter(|s| !s.is_empty() && *s != ".")
                .map(str::to_string),
        );
        let trailing_slash = segments.len() > self.segments.len()
            && (child.ends_with('/') || child.ends_with("/."));
        Self {
            trailing_slash,
            segments,
            ..self.clone()
        }
    }

    /// Resolve `other` against this path.
    ///
    /// A schemed or rooted `other` replaces the base entirely; an absolute
    /// unschemed `other` keeps the base scheme and authority; a relative
    /// `other` is appended. The result is normalized.
    pub fn resolve(&self, other: &VfsPath) -> Self {
        if other.scheme.is_some() || other.root.is_some() {
            return other.normalize();
        }
        if other.absolute {
            return Self {
                scheme: self.scheme.clone(),
                authority: other.authority.clone().or_else(|| self.authority.clone()),
                root: self.root.clone(),
                ..other.clone()
            }
            .normalize();
        }
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self {
            trailing_slash: other.trailing_slash,
            segments,
            ..self.clone()
        }
        .normalize()
    }

    /// The containing folder, or `None` at a root / empty relative path.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self {
            segments,
            trailing_slash: false,
            ..self.clone()
        })
    }

    /// Replace the final segment.
    pub fn with_name(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        segments.push(name.to_string());
        Self {
            segments,
            ..self.clone()
        }
    }

    /// Same location, marked as an explicit folder reference.
    pub fn as_folder(&self) -> Self {
        Self {
            trailing_slash: !self.segments.is_empty(),
            ..self.clone()
        }
    }

    /// Same location without the trailing-slash marker.
    pub fn as_file(&self) -> Self {
        Self {
            trailing_slash: false,
            ..self.clone()
        }
    }

    /// Segments of `self` below `base`, if `base` is an ancestor (or equal).
    pub fn relative_to(&self, base: &VfsPath) -> Option<Self> {
        if self.scheme != base.scheme
            || self.authority != base.authority
            || self.root != base.root
            || self.absolute != base.absolute
        {
            return None;
        }
        let rest = self.segments.strip_prefix(base.segments.as_slice())?;
        Some(Self {
            scheme: None,
            authority: None,
            root: None,
            absolute: false,
            segments: rest.to_vec(),
            trailing_slash: self.trailing_slash && !rest.is_empty(),
        })
    }

    /// True if `self` is `ancestor` or lies beneath it.
    pub fn starts_with(&self, ancestor: &VfsPath) -> bool {
        self.relative_to(ancestor).is_some()
    }

    /// Render as a host filesystem path (scheme and authority are dropped).
    pub fn to_local_path(&self) -> PathBuf {
        let mut s = String::new();
        if let Some(root) = &self.root {
            s.push_str(root);
        }
        if self.absolute {
            s.push('/');
        }
        s.push_str(&self.segments.join("/"));
        if s.is_empty() {
            s.push('.');
        }
        PathBuf::from(s)
    }

    /// The segments joined by `/` with no scheme, authority or root.
    pub fn key(&self) -> String {
        self.segments.join("/")
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(scheme) = &self.scheme {
            write!(f, "{}:", scheme)?;
            wrote = true;
        }
        if let Some(authority) = &self.authority {
            write!(f, "//{}", authority)?;
            wrote = true;
        }
        if let Some(root) = &self.root {
            f.write_str(root)?;
            wrote = true;
        }
        if self.absolute {
            f.write_str("/")?;
            wrote = true;
        }
        if !self.segments.is_empty() {
            f.write_str(&self.segments.join("/"))?;
            if self.trailing_slash {
                f.write_str("/")?;
            }
            wrote = true;
        }
        if !wrote {
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl FromStr for VfsPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for VfsPath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<&Path> for VfsPath {
    fn from(p: &Path) -> Self {
        Self::from_local(p)
    }
}

impl From<PathBuf> for VfsPath {
    fn from(p: PathBuf) -> Self {
        Self::from_local(&p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_relative() {
        let p = VfsPath::parse("a/b/c.txt");
        assert_eq!(p.scheme(), None);
        assert!(!p.is_absolute());
        assert_eq!(p.segments(), &["a", "b", "c.txt"]);
        assert_eq!(p.name(), Some("c.txt"));
        assert_eq!(p.extension(), Some("txt"));
    }

    #[test]
    fn test_parse_scheme_and_authority() {
        let p = VfsPath::parse("S3://bucket/logs/2024/");
        assert_eq!(p.scheme(), Some("s3"));
        assert_eq!(p.authority(), Some("bucket"));
        assert!(p.is_absolute());
        assert!(p.has_trailing_slash());
        assert_eq!(p.segments(), &["logs", "2024"]);
        assert_eq!(p.to_string(), "s3://bucket/logs/2024/");
    }

    #[test]
    fn test_drive_letter_is_root_not_scheme() {
        let p = VfsPath::parse("c:/Users/amy");
        assert_eq!(p.scheme(), None);
        assert_eq!(p.root(), Some("C:"));
        assert!(p.is_absolute());
        assert_eq!(p.to_string(), "C:/Users/amy");
    }

    #[test]
    fn test_redundant_separators_collapse() {
        let p = VfsPath::parse("/tmp//cache///x");
        assert_eq!(p.segments(), &["tmp", "cache", "x"]);
        assert_eq!(p.to_string(), "/tmp/cache/x");
    }

    #[test]
    fn test_lone_dot_is_current_folder() {
        let p = VfsPath::parse(".");
        assert!(p.segments().is_empty());
        assert!(!p.is_absolute());
        assert_eq!(p.to_string(), ".");
        assert_eq!(VfsPath::parse(""), p);
    }

    #[test]
    fn test_normalize_round_trip() {
        let p = VfsPath::parse("a/./b/../c").normalize();
        assert_eq!(p.to_string(), "a/c");
        assert_eq!(VfsPath::parse(&p.to_string()), p);
    }

    #[test]
    fn test_normalize_keeps_leading_parent_on_relative() {
        let p = VfsPath::parse("../x/../../y").normalize();
        assert_eq!(p.to_string(), "../../y");
    }

    #[test]
    fn test_normalize_never_climbs_above_root() {
        let p = VfsPath::parse("mem:/a/../../b").normalize();
        assert_eq!(p.to_string(), "mem:/b");
        assert_eq!(p.scheme(), Some("mem"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = VfsPath::parse("mem:/cache/");
        assert_eq!(base.resolve(&"x/../y.txt".into()).to_string(), "mem:/cache/y.txt");
        assert_eq!(base.resolve(&"/other".into()).to_string(), "mem:/other");
        assert_eq!(base.resolve(&"file:/etc".into()).to_string(), "file:/etc");
    }

    #[test]
    fn test_join_keeps_colon_names_literal() {
        let base = VfsPath::parse("mem:/c");
        assert_eq!(base.join("ab:x.txt").to_string(), "mem:/c/ab:x.txt");
        assert_eq!(base.join("ab:x.txt").name(), Some("ab:x.txt"));
        assert_eq!(base.join("C:").to_string(), "mem:/c/C:");
        assert_eq!(base.join("http:").segments().len(), 2);
        assert_eq!(base.join("v1:sub/").to_string(), "mem:/c/v1:sub/");
        assert_eq!(base.join("/sub/f").to_string(), "mem:/c/sub/f");
    }

    #[test]
    fn test_parent_and_with_name() {
        let p = VfsPath::parse("/a/b/c");
        assert_eq!(p.parent().unwrap().to_string(), "/a/b");
        assert_eq!(p.with_name("d").to_string(), "/a/b/d");
        assert!(VfsPath::parse("/").parent().is_none());
    }

    #[test]
    fn test_relative_to() {
        let base = VfsPath::parse("/data/src");
        let file = VfsPath::parse("/data/src/x/y.bin");
        assert_eq!(file.relative_to(&base).unwrap().to_string(), "x/y.bin");
        assert!(VfsPath::parse("/elsewhere").relative_to(&base).is_none());
        assert!(VfsPath::parse("mem:/data/src/x").relative_to(&base).is_none());
    }

    #[test]
    fn test_dotfile_has_no_extension() {
        assert_eq!(VfsPath::parse(".hidden").extension(), None);
        assert_eq!(VfsPath::parse("archive.tar.gz").extension(), Some("gz"));
    }

    #[test]
    fn test_to_local_path() {
        assert_eq!(VfsPath::parse("file:/tmp/x").to_local_path(), PathBuf::from("/tmp/x"));
        assert_eq!(VfsPath::parse("rel/dir").to_local_path(), PathBuf::from("rel/dir"));
    }
}
