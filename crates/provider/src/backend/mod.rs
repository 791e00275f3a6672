//! Provider trait and in-tree implementations.
//!
//! This module defines the [`Provider`] trait, the fixed set of operations
//! every storage backend offers to the rest of the gateway, along with the
//! conflict-policy defaults shared by all of them.

mod filesystem;
#[cfg(feature = "mock")]
mod memory;

pub use self::filesystem::FilesystemBackend;
#[cfg(feature = "mock")]
pub use self::memory::{Failure, MemoryBackend};
use crate::error::{ErrorKind, Result};
use crate::metadata::{FileMetadata, FolderMetadata, Metadata, Revision};
use crate::path::{Addressing, ProviderPath};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;
use wharf_stream::{ByteRange, ByteStream};

/// What to do when a write target already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conflict {
    /// Supersede the existing object.
    #[default]
    Replace,
    /// Write under a new, disambiguated name (`name (1).ext`).
    Keep,
    /// Refuse with [`NamingConflict`](ErrorKind::NamingConflict).
    Warn,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Replace => "replace",
            Self::Keep => "keep",
            Self::Warn => "warn",
        })
    }
}

impl FromStr for Conflict {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "replace" => Ok(Self::Replace),
            "keep" => Ok(Self::Keep),
            "warn" => Ok(Self::Warn),
            other => Err(format!("unknown conflict policy `{other}` (expected replace, keep or warn)")),
        }
    }
}

/// Capability tag of an adapter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Native same-account copy.
    pub intra_copy: bool,
    /// Native same-account move.
    pub intra_move: bool,
    pub ranged_download: bool,
    /// Keeps more than one revision per file.
    pub versioning: bool,
}

/// Which storage a provider instance addresses.
///
/// Two instances share a storage root only when backend, root and account all
/// match. Two accounts on the same backend whose folders happen to share a
/// name are different roots.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ProviderIdentity {
    pub backend: String,
    pub root: String,
    pub account: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    pub range: Option<ByteRange>,
    /// Backend revision identifier; `None` means the current version.
    pub revision: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Required to delete the root folder (which empties the provider).
    pub confirm_root: bool,
}

/// Unified interface for storage backends.
///
/// Every call is a stateless request/response. Operations that touch stored
/// data receive an already-validated [`ProviderPath`], obtained from
/// [`validate_v1_path()`](Self::validate_v1_path) or
/// [`validate_path()`](Self::validate_path), never a raw string.
///
/// # Examples
///
/// ```no_run
/// use wharf_provider::{Conflict, Provider, error::Result};
/// use wharf_stream::ByteStream;
///
/// async fn replace_greeting(provider: &dyn Provider) -> Result<bool> {
///     let path = provider.validate_path("/greeting.txt").await?;
///     let (file, created) = provider.upload(ByteStream::from_bytes("hello"), &path, Conflict::Replace).await?;
///     assert_eq!(file.size, 5);
///     Ok(created)
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name of the configured provider (taken from the configuration key).
    /// Used for logging and metadata only.
    fn name(&self) -> &str;

    fn identity(&self) -> &ProviderIdentity;

    fn capabilities(&self) -> Capabilities;

    fn addressing(&self) -> Addressing {
        Addressing::Named
    }

    /// Resolve a user path that must exist.
    ///
    /// Fails with [`NotFound`](ErrorKind::NotFound) if nothing is there, or
    /// if the object's kind disagrees with the trailing-slash hint. The root
    /// resolves without a backend call.
    async fn validate_v1_path(&self, raw: &str) -> Result<ProviderPath> {
        let path = ProviderPath::parse_with(raw, self.addressing())?;
        if path.is_root() {
            return Ok(path);
        }
        let resolved = self.metadata(&path).await?;
        Ok(resolved.path().clone())
    }

    /// Resolve a user path best-effort. Never fails because the path does not
    /// exist; used before uploads and folder creation.
    async fn validate_path(&self, raw: &str) -> Result<ProviderPath> {
        ProviderPath::parse_with(raw, self.addressing())
    }

    /// File metadata for a file path, folder metadata (without children) for
    /// a folder path. Fails with [`NotFound`](ErrorKind::NotFound) when the
    /// path is absent or of the other kind.
    async fn metadata(&self, path: &ProviderPath) -> Result<Metadata>;

    /// Metadata of every direct child of a folder.
    async fn children(&self, folder: &ProviderPath) -> Result<Vec<Metadata>>;

    /// Folder metadata with its listing attached.
    async fn list(&self, folder: &ProviderPath) -> Result<FolderMetadata> {
        let Some(meta) = self.metadata(folder).await?.into_folder() else {
            exn::bail!(ErrorKind::NotFound(folder.to_string()));
        };
        let children = self.children(folder).await?;
        Ok(meta.with_children(children))
    }

    /// Open a stream over a file's bytes. Downloading a folder fails with
    /// [`Download`](ErrorKind::Download) code 400.
    async fn download(&self, path: &ProviderPath, options: DownloadOptions) -> Result<ByteStream>;

    /// Drain `stream` into the object at `path` under `conflict`.
    ///
    /// Returns the resulting file and `true` if it was newly created, `false`
    /// if an existing object was overwritten.
    async fn upload(&self, stream: ByteStream, path: &ProviderPath, conflict: Conflict) -> Result<(FileMetadata, bool)>;

    /// Remove a file, or a folder and everything below it.
    async fn delete(&self, path: &ProviderPath, options: DeleteOptions) -> Result<()>;

    /// Revisions of a file in adapter order. Callers should prefer
    /// [`list_revisions()`] which guarantees most-recent-first.
    async fn revisions(&self, path: &ProviderPath) -> Result<Vec<Revision>>;

    /// Create a folder. With `precheck` an existing folder fails with
    /// [`FolderNamingConflict`](ErrorKind::FolderNamingConflict); without it
    /// the existing folder is returned.
    async fn create_folder(&self, path: &ProviderPath, precheck: bool) -> Result<FolderMetadata>;

    /// Whether a native copy to `dest` is available for `path`.
    fn can_intra_copy(&self, dest: &dyn Provider, path: &ProviderPath) -> bool {
        let _ = path;
        self.capabilities().intra_copy && self.shares_storage_root(dest)
    }

    fn can_intra_move(&self, dest: &dyn Provider, path: &ProviderPath) -> bool {
        let _ = path;
        self.capabilities().intra_move && self.shares_storage_root(dest)
    }

    /// Backend-native copy. Only called after
    /// [`can_intra_copy()`](Self::can_intra_copy) returned `true`.
    async fn intra_copy(&self, dest: &dyn Provider, src: &ProviderPath, dest_path: &ProviderPath) -> Result<Metadata> {
        let _ = (dest, src, dest_path);
        exn::bail!(ErrorKind::Unsupported("intra_copy"))
    }

    async fn intra_move(&self, dest: &dyn Provider, src: &ProviderPath, dest_path: &ProviderPath) -> Result<Metadata> {
        let _ = (dest, src, dest_path);
        exn::bail!(ErrorKind::Unsupported("intra_move"))
    }

    /// Whether `other` addresses the same underlying storage.
    fn shares_storage_root(&self, other: &dyn Provider) -> bool {
        self.identity() == other.identity()
    }

    async fn exists(&self, path: &ProviderPath) -> Result<bool> {
        match self.metadata(path).await {
            Ok(_) => Ok(true),
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Derive a child of `base` and resolve its identifier where the backend
    /// can.
    async fn revalidate_path(&self, base: &ProviderPath, name: &str, folder: bool) -> Result<ProviderPath> {
        base.child(name, folder)
    }

    /// Apply `conflict` to a write target.
    ///
    /// Returns the path to write to and whether an object already exists
    /// there (and will be overwritten). Under [`Conflict::Keep`] the returned
    /// path carries the smallest unused counter among the parent's children
    /// and no identifier.
    async fn handle_name_conflict(&self, path: &ProviderPath, conflict: Conflict) -> Result<(ProviderPath, bool)> {
        if path.is_root() || !self.exists(path).await? {
            return Ok((path.clone(), false));
        }
        match conflict {
            Conflict::Replace => Ok((path.clone(), true)),
            Conflict::Warn => exn::bail!(ErrorKind::NamingConflict(path.to_string())),
            Conflict::Keep => {
                let Some(parent) = path.parent() else {
                    exn::bail!(ErrorKind::InvalidPath(path.to_string()));
                };
                let taken: HashSet<String> = self
                    .children(&parent)
                    .await?
                    .iter()
                    .map(|child| child.name().nfc().collect())
                    .collect();
                let mut n = 1;
                let name = loop {
                    let candidate = path.increment_name(n);
                    if !taken.contains(&candidate.nfc().collect::<String>()) {
                        break candidate;
                    }
                    n += 1;
                };
                tracing::debug!(provider = self.name(), path = %path, %name, "Keeping existing object");
                Ok((path.with_name(&name)?.without_id(), false))
            },
        }
    }

    /// Compute the final destination of a transfer from `src` into `dest`.
    ///
    /// A folder destination receives the source's name (or `rename`); a file
    /// destination keeps its own name unless renamed. A folder cannot be
    /// written to a file destination.
    async fn handle_naming(
        &self,
        src: &ProviderPath,
        dest: &ProviderPath,
        rename: Option<&str>,
        conflict: Conflict,
    ) -> Result<(ProviderPath, bool)> {
        if src.is_folder() && dest.is_file() {
            exn::bail!(ErrorKind::InvalidPath(format!("cannot write folder {src} to file {dest}")));
        }
        let target = match (dest.is_folder(), rename) {
            (true, rename) => self.revalidate_path(dest, rename.unwrap_or(src.name()), src.is_folder()).await?,
            (false, Some(rename)) => dest.with_name(rename)?,
            (false, None) => dest.clone(),
        };
        self.handle_name_conflict(&target, conflict).await
    }
}

/// Revisions of `path`, most recent first.
///
/// Revisions without a timestamp keep their adapter order after the dated ones.
pub async fn list_revisions(provider: &dyn Provider, path: &ProviderPath) -> Result<Vec<Revision>> {
    if path.is_folder() {
        exn::bail!(ErrorKind::InvalidPath(path.to_string()));
    }
    let mut revisions = provider.revisions(path).await?;
    revisions.sort_by(|a, b| match (a.modified, b.modified) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    Ok(revisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("replace", Conflict::Replace)]
    #[case("keep", Conflict::Keep)]
    #[case("warn", Conflict::Warn)]
    fn test_conflict_parse(#[case] raw: &str, #[case] expected: Conflict) {
        assert_eq!(raw.parse::<Conflict>().unwrap(), expected);
        assert_eq!(expected.to_string(), raw);
    }

    #[test]
    fn test_conflict_default_and_serde() {
        assert_eq!(Conflict::default(), Conflict::Replace);
        assert_eq!(serde_json::to_string(&Conflict::Keep).unwrap(), "\"keep\"");
        assert!("overwrite".parse::<Conflict>().is_err());
    }

    #[test]
    fn test_identity_compares_account() {
        let a = ProviderIdentity {
            backend: "filesystem".into(),
            root: "/srv/shared".into(),
            account: Some("alice".into()),
        };
        let b = ProviderIdentity { account: Some("bob".into()), ..a.clone() };
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
