//! Canonical path model shared by every provider.
//!
//! A [`ProviderPath`] is an ordered list of named segments, each optionally
//! carrying a backend-native identifier, plus a flag saying whether the final
//! segment is a folder. Paths are immutable values: deriving a parent or a
//! child always produces a new path.
//!
//! Equality depends on the [`Addressing`] mode of the backend that produced
//! the path. Name-addressed backends compare the Unicode-normalized name
//! chain; identifier-addressed backends compare the identifier chain once
//! every segment has one, so a path stays equal to itself across renames.

use crate::error::{ErrorKind, Result};
use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static COUNTER_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?<base>.*) \((?<n>\d+)\)$").unwrap());

/// How a backend addresses its objects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Addressing {
    /// Objects are addressed by their name chain (filesystems, object stores).
    #[default]
    Named,
    /// Objects carry stable identifiers that survive renames.
    Identified,
}

/// One segment of a [`ProviderPath`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathPart {
    name: String,
    id: Option<String>,
}

impl PathPart {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), id: None }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

#[derive(PartialEq, Eq, Hash)]
enum Key<'a> {
    Ids(Vec<&'a str>),
    Names(Vec<String>),
}

/// A validated location inside one provider.
///
/// # Examples
///
/// ```
/// use wharf_provider::ProviderPath;
///
/// let file = ProviderPath::parse("/photos/2024/beach.jpg").unwrap();
/// assert!(file.is_file());
/// assert_eq!(file.name(), "beach.jpg");
///
/// let parent = file.parent().unwrap();
/// assert!(parent.is_folder());
/// assert_eq!(parent.to_string(), "/photos/2024/");
///
/// assert!(ProviderPath::parse("/").unwrap().is_root());
/// assert!(ProviderPath::parse("relative/path").is_err());
/// ```
#[derive(Clone, Debug)]
pub struct ProviderPath {
    parts: Vec<PathPart>,
    folder: bool,
    addressing: Addressing,
}

impl ProviderPath {
    /// The root of a backend. Always a folder.
    pub fn root(addressing: Addressing) -> Self {
        Self { parts: Vec::new(), folder: true, addressing }
    }

    /// Parse a raw `/`-delimited path for a name-addressed backend.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_with(raw, Addressing::Named)
    }

    /// Parse a raw `/`-delimited path.
    ///
    /// The path must be absolute. A trailing slash marks folder intent; a path
    /// of exactly `/` is the root. Empty segments, `.`, `..` and null bytes
    /// are rejected rather than resolved.
    pub fn parse_with(raw: &str, addressing: Addressing) -> Result<Self> {
        let Some(rest) = raw.strip_prefix('/') else {
            exn::bail!(ErrorKind::InvalidPath(raw.to_string()));
        };
        if rest.is_empty() {
            return Ok(Self::root(addressing));
        }
        let (rest, folder) = match rest.strip_suffix('/') {
            Some(rest) => (rest, true),
            None => (rest, false),
        };
        let mut parts = Vec::new();
        for segment in rest.split('/') {
            if !Self::is_valid_name(segment) {
                exn::bail!(ErrorKind::InvalidPath(raw.to_string()));
            }
            parts.push(PathPart::new(segment));
        }
        Ok(Self { parts, folder, addressing })
    }

    /// Build a path from already-resolved parts.
    pub fn from_parts(parts: Vec<PathPart>, folder: bool, addressing: Addressing) -> Result<Self> {
        if parts.is_empty() {
            return Ok(Self::root(addressing));
        }
        if let Some(bad) = parts.iter().find(|part| !Self::is_valid_name(&part.name)) {
            exn::bail!(ErrorKind::InvalidPath(bad.name.clone()));
        }
        Ok(Self { parts, folder, addressing })
    }

    fn is_valid_name(name: &str) -> bool {
        !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
    }

    pub fn parts(&self) -> &[PathPart] {
        &self.parts
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn is_folder(&self) -> bool {
        self.folder
    }

    pub fn is_file(&self) -> bool {
        !self.folder
    }

    /// Display name of the final segment; empty for the root.
    pub fn name(&self) -> &str {
        self.parts.last().map(PathPart::name).unwrap_or_default()
    }

    /// Backend identifier of the final segment, if one has been assigned.
    pub fn id(&self) -> Option<&str> {
        self.parts.last().and_then(PathPart::id)
    }

    /// The containing folder, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, parents) = self.parts.split_last()?;
        Some(Self {
            parts: parents.to_vec(),
            folder: true,
            addressing: self.addressing,
        })
    }

    /// Derive a child segment. The child carries no identifier until the
    /// backend assigns one.
    pub fn child(&self, name: &str, folder: bool) -> Result<Self> {
        if !Self::is_valid_name(name) {
            exn::bail!(ErrorKind::InvalidPath(name.to_string()));
        }
        let mut parts = self.parts.clone();
        parts.push(PathPart::new(name));
        Ok(Self { parts, folder, addressing: self.addressing })
    }

    /// Same path with `id` assigned to the final segment.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        let mut path = self.clone();
        if let Some(last) = path.parts.last_mut() {
            last.id = Some(id.into());
        }
        path
    }

    /// Same path with the final segment's identifier removed, so an adapter
    /// must create rather than update.
    pub fn without_id(&self) -> Self {
        let mut path = self.clone();
        if let Some(last) = path.parts.last_mut() {
            last.id = None;
        }
        path
    }

    /// Same location with a different final name. The identifier is dropped.
    pub fn with_name(&self, name: &str) -> Result<Self> {
        match self.parent() {
            Some(parent) => parent.child(name, self.folder),
            None => exn::bail!(ErrorKind::InvalidPath(name.to_string())),
        }
    }

    /// The final name with the counter `n` applied: `report (2).pdf` for
    /// files, `Photos (2)` for folders. An existing counter is replaced.
    pub fn increment_name(&self, n: u32) -> String {
        let name = self.name();
        let (stem, ext) = match self.folder {
            true => (name, ""),
            // Leading dots are part of the stem: `.env` has no extension.
            false => match name.rfind('.') {
                Some(idx) if idx > 0 => name.split_at(idx),
                _ => (name, ""),
            },
        };
        let base = COUNTER_SUFFIX.captures(stem).and_then(|c| c.name("base")).map_or(stem, |m| m.as_str());
        format!("{base} ({n}){ext}")
    }

    /// The full display path, independent of any identifier. Folders end in `/`.
    pub fn materialized_path(&self) -> String {
        let mut out = String::from("/");
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            out.push_str(&part.name);
        }
        if self.folder && !self.parts.is_empty() {
            out.push('/');
        }
        out
    }

    /// [`materialized_path()`](Self::materialized_path) in Unicode NFC form,
    /// for matching entries that a backend may have re-encoded.
    pub fn normalized_path(&self) -> String {
        self.materialized_path().nfc().collect()
    }

    /// Whether `self` lies inside the folder `ancestor` (or is it).
    pub fn is_within(&self, ancestor: &ProviderPath) -> bool {
        if !ancestor.folder || ancestor.parts.len() > self.parts.len() {
            return false;
        }
        ancestor
            .parts
            .iter()
            .zip(&self.parts)
            .all(|(a, b)| a.name.nfc().eq(b.name.nfc()))
    }

    fn key(&self) -> Key<'_> {
        let ids: Option<Vec<&str>> = self.parts.iter().map(PathPart::id).collect();
        match (self.addressing, ids) {
            (Addressing::Identified, Some(ids)) => Key::Ids(ids),
            _ => Key::Names(self.parts.iter().map(|part| part.name.nfc().collect()).collect()),
        }
    }
}

impl PartialEq for ProviderPath {
    fn eq(&self, other: &Self) -> bool {
        self.folder == other.folder && self.key() == other.key()
    }
}

impl Eq for ProviderPath {}

impl Hash for ProviderPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folder.hash(state);
        self.key().hash(state);
    }
}

impl fmt::Display for ProviderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.materialized_path())
    }
}

impl Serialize for ProviderPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.materialized_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;

    #[rstest]
    #[case("/", true, 0)]
    #[case("/a.txt", false, 1)]
    #[case("/a/b/", true, 2)]
    #[case("/a/b/c.tar.gz", false, 3)]
    #[case("/with space/ünïcode", false, 2)]
    fn test_valid_paths(#[case] raw: &str, #[case] folder: bool, #[case] depth: usize) {
        let path = ProviderPath::parse(raw).unwrap();
        assert_eq!(path.is_folder(), folder);
        assert_eq!(path.parts().len(), depth);
        assert_eq!(path.to_string(), raw);
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case("//")]
    #[case("/a//b")]
    #[case("/a/./b")]
    #[case("/a/../b")]
    #[case("/..")]
    #[case("/a\0b")]
    fn test_invalid_paths(#[case] raw: &str) {
        let err = ProviderPath::parse(raw).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_parent_forces_folder() {
        let path = ProviderPath::parse("/a/b/c.txt").unwrap();
        let parent = path.parent().unwrap();
        assert_eq!(parent, ProviderPath::parse("/a/b/").unwrap());
        assert_eq!(parent.parent().unwrap().parent().unwrap(), ProviderPath::root(Addressing::Named));
        assert!(ProviderPath::root(Addressing::Named).parent().is_none());
    }

    #[test]
    fn test_child_has_no_id() {
        let folder = ProviderPath::parse_with("/a/", Addressing::Identified).unwrap().with_id("f1");
        let child = folder.child("b.txt", false).unwrap();
        assert_eq!(child.id(), None);
        assert_eq!(child.parts()[0].id(), Some("f1"));
        assert!(folder.child("..", false).is_err());
        assert!(folder.child("x/y", false).is_err());
    }

    #[test]
    fn test_named_equality_normalizes_unicode() {
        // "é" precomposed vs "e" + combining acute accent.
        let composed = ProviderPath::parse("/caf\u{e9}.txt").unwrap();
        let decomposed = ProviderPath::parse("/cafe\u{301}.txt").unwrap();
        assert_eq!(composed, decomposed);
        let set: HashSet<_> = [composed, decomposed].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_folder_flag_participates_in_equality() {
        assert_ne!(ProviderPath::parse("/a").unwrap(), ProviderPath::parse("/a/").unwrap());
    }

    #[test]
    fn test_identified_equality_survives_rename() {
        let before = ProviderPath::parse_with("/docs/old.txt", Addressing::Identified).unwrap();
        let before = before.parent().unwrap().with_id("d1").child("old.txt", false).unwrap().with_id("f9");
        let after = before.with_name("new.txt").unwrap().with_id("f9");
        assert_eq!(before, after);
        let set: HashSet<_> = [before.clone(), after].into_iter().collect();
        assert_eq!(set.len(), 1);
        // Without identifiers the name chain decides.
        assert_ne!(before.without_id(), before.with_name("new.txt").unwrap());
    }

    #[rstest]
    #[case("/a/b.txt", 1, "b (1).txt")]
    #[case("/a/b (1).txt", 2, "b (2).txt")]
    #[case("/a/archive.tar.gz", 3, "archive.tar (3).gz")]
    #[case("/a/.env", 1, ".env (1)")]
    #[case("/a/Photos.2024/", 1, "Photos.2024 (1)")]
    #[case("/a/noext", 4, "noext (4)")]
    fn test_increment_name(#[case] raw: &str, #[case] n: u32, #[case] expected: &str) {
        assert_eq!(ProviderPath::parse(raw).unwrap().increment_name(n), expected);
    }

    #[test]
    fn test_is_within() {
        let folder = ProviderPath::parse("/a/b/").unwrap();
        assert!(ProviderPath::parse("/a/b/c/d.txt").unwrap().is_within(&folder));
        assert!(folder.is_within(&folder));
        assert!(!ProviderPath::parse("/a/bc/d.txt").unwrap().is_within(&folder));
        assert!(!ProviderPath::parse("/a/b").unwrap().is_within(&ProviderPath::parse("/a/b").unwrap()));
    }
}
