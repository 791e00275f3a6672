//! Canonical metadata records.
//!
//! Adapters build these from whatever their backend returns. Fields the
//! canonical shape has no slot for are kept in `extra` instead of dropped.

use crate::error::{ErrorKind, Result};
use crate::path::ProviderPath;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Revision identifier used by backends without native versioning.
pub const LATEST_REVISION: &str = "latest";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Metadata {
    File(FileMetadata),
    Folder(FolderMetadata),
}

impl Metadata {
    pub fn path(&self) -> &ProviderPath {
        match self {
            Self::File(file) => file.path(),
            Self::Folder(folder) => folder.path(),
        }
    }

    pub fn name(&self) -> &str {
        self.path().name()
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::File(file) => &file.provider,
            Self::Folder(folder) => &folder.provider,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder(_))
    }

    pub fn into_file(self) -> Option<FileMetadata> {
        match self {
            Self::File(file) => Some(file),
            Self::Folder(_) => None,
        }
    }

    pub fn into_folder(self) -> Option<FolderMetadata> {
        match self {
            Self::Folder(folder) => Some(folder),
            Self::File(_) => None,
        }
    }
}

impl From<FileMetadata> for Metadata {
    fn from(file: FileMetadata) -> Self {
        Self::File(file)
    }
}

impl From<FolderMetadata> for Metadata {
    fn from(folder: FolderMetadata) -> Self {
        Self::Folder(folder)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileMetadata {
    /// Name of the provider that produced this record.
    pub provider: String,
    path: ProviderPath,
    pub size: u64,
    /// Content hashes keyed by algorithm name (`sha256`, `md5`, ...).
    pub hashes: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub modified: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created: Option<OffsetDateTime>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    /// Backend-native revision token of the current version.
    pub revision: Option<String>,
    pub extra: Map<String, Value>,
}

impl FileMetadata {
    pub fn new(provider: impl Into<String>, path: ProviderPath, size: u64) -> Result<Self> {
        if path.is_folder() {
            exn::bail!(ErrorKind::InvalidPath(path.to_string()));
        }
        Ok(Self {
            provider: provider.into(),
            path,
            size,
            hashes: BTreeMap::new(),
            modified: None,
            created: None,
            content_type: None,
            etag: None,
            revision: None,
            extra: Map::new(),
        })
    }

    pub fn path(&self) -> &ProviderPath {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    pub fn with_modified(mut self, modified: OffsetDateTime) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_hashes(mut self, hashes: BTreeMap<String, String>) -> Self {
        self.hashes.extend(hashes);
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FolderMetadata {
    pub provider: String,
    path: ProviderPath,
    pub child_count: Option<u64>,
    /// Populated only when a listing was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Metadata>>,
    pub extra: Map<String, Value>,
}

impl FolderMetadata {
    pub fn new(provider: impl Into<String>, path: ProviderPath) -> Result<Self> {
        if path.is_file() {
            exn::bail!(ErrorKind::InvalidPath(path.to_string()));
        }
        Ok(Self {
            provider: provider.into(),
            path,
            child_count: None,
            children: None,
            extra: Map::new(),
        })
    }

    pub fn path(&self) -> &ProviderPath {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    /// Attach a listing; `child_count` follows it.
    pub fn with_children(mut self, children: Vec<Metadata>) -> Self {
        self.child_count = Some(children.len() as u64);
        self.children = Some(children);
        self
    }

    /// Find a listed child by normalized materialized path.
    pub fn child(&self, path: &ProviderPath) -> Option<&Metadata> {
        let wanted = path.normalized_path();
        self.children.as_deref()?.iter().find(|child| child.path().normalized_path() == wanted)
    }
}

/// One historical version of a file.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Revision {
    /// Unique within the file's history.
    pub version: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub modified: Option<OffsetDateTime>,
    pub size: Option<u64>,
    pub hashes: BTreeMap<String, String>,
    pub extra: Map<String, Value>,
}

impl Revision {
    pub fn new(version: impl Into<String>, modified: Option<OffsetDateTime>) -> Self {
        Self {
            version: version.into(),
            modified,
            size: None,
            hashes: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Synthetic revision describing the current content of a file on a
    /// backend without native versioning.
    pub fn latest(file: &FileMetadata) -> Self {
        Self {
            version: LATEST_REVISION.to_string(),
            modified: file.modified,
            size: Some(file.size),
            hashes: file.hashes.clone(),
            extra: file.extra.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> ProviderPath {
        ProviderPath::parse(raw).unwrap()
    }

    #[test]
    fn test_kind_must_match_path() {
        assert!(FileMetadata::new("p", path("/a/"), 0).is_err());
        assert!(FolderMetadata::new("p", path("/a")).is_err());
        assert!(FolderMetadata::new("p", path("/")).is_ok());
    }

    #[test]
    fn test_extra_survives_serialization() {
        let file = FileMetadata::new("p", path("/a/b.txt"), 10)
            .unwrap()
            .with_extra("storage_class", "GLACIER")
            .with_revision("v3");
        let json = serde_json::to_value(Metadata::from(file)).unwrap();
        assert_eq!(json["kind"], "file");
        assert_eq!(json["path"], "/a/b.txt");
        assert_eq!(json["extra"]["storage_class"], "GLACIER");
        assert_eq!(json["revision"], "v3");
    }

    #[test]
    fn test_child_lookup_by_normalized_path() {
        let child = FileMetadata::new("p", path("/a/cafe\u{301}.txt"), 1).unwrap();
        let folder = FolderMetadata::new("p", path("/a/")).unwrap().with_children(vec![child.into()]);
        assert_eq!(folder.child_count, Some(1));
        assert!(folder.child(&path("/a/caf\u{e9}.txt")).is_some());
        assert!(folder.child(&path("/a/other.txt")).is_none());
    }

    #[test]
    fn test_latest_revision_mirrors_file() {
        let file = FileMetadata::new("p", path("/x.txt"), 7).unwrap();
        let revision = Revision::latest(&file);
        assert_eq!(revision.version, LATEST_REVISION);
        assert_eq!(revision.size, Some(7));
    }
}
