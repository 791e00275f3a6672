//! In-memory backend for testing.

use crate::backend::{Capabilities, Conflict, DeleteOptions, DownloadOptions, Provider, ProviderIdentity};
use crate::error::{ErrorKind, Result};
use crate::metadata::{FileMetadata, FolderMetadata, Metadata, Revision};
use crate::path::{Addressing, PathPart, ProviderPath};
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use unicode_normalization::UnicodeNormalization;
use wharf_stream::{Algorithm, ByteStream};

static INSTANCES: AtomicU64 = AtomicU64::new(0);

/// Operations that can be made to fail on purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Failure {
    Metadata,
    Download,
    Upload,
    Delete,
}

struct StoredRevision {
    version: String,
    data: Vec<u8>,
    modified: OffsetDateTime,
    sha256: Option<String>,
}

enum EntryKind {
    Folder,
    /// Oldest revision first.
    File(Vec<StoredRevision>),
}

struct Entry {
    id: String,
    name: String,
    kind: EntryKind,
}

impl EntryKind {
    /// Copies carry only the current content, as a fresh history.
    fn latest_copy(&self) -> Self {
        match self {
            Self::Folder => Self::Folder,
            Self::File(revisions) => Self::File(
                revisions
                    .last()
                    .map(|latest| StoredRevision {
                        version: "v1".to_string(),
                        data: latest.data.clone(),
                        modified: latest.modified,
                        sha256: latest.sha256.clone(),
                    })
                    .into_iter()
                    .collect(),
            ),
        }
    }
}

/// Entries keyed by NFC-normalized materialized path without trailing slash
/// (`/a/b`); the root is implicit.
#[derive(Default)]
struct Store {
    entries: BTreeMap<String, Entry>,
    next_id: u64,
    clock: Option<OffsetDateTime>,
}

impl Store {
    fn key(path: &ProviderPath) -> String {
        Self::key_of(path.parts())
    }

    fn key_of(parts: &[PathPart]) -> String {
        parts.iter().map(|part| format!("/{}", part.name().nfc().collect::<String>())).collect()
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("id-{}", self.next_id)
    }

    /// Strictly increasing timestamps, so revision order never ties.
    fn tick(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let next = match self.clock {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }

    fn descendants(&self, key: &str) -> Vec<String> {
        let prefix = format!("{key}/");
        self.entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn children(&self, key: &str) -> Vec<String> {
        let depth = key.matches('/').count() + 1;
        self.descendants(key).into_iter().filter(|k| k.matches('/').count() == depth).collect()
    }

    /// Create every missing ancestor folder of `path`.
    fn ensure_parents(&mut self, path: &ProviderPath) -> std::result::Result<(), String> {
        let parts = path.parts();
        for depth in 1..parts.len() {
            let key = Self::key_of(&parts[..depth]);
            match self.entries.get(&key).map(|entry| &entry.kind) {
                Some(EntryKind::Folder) => {},
                Some(EntryKind::File(_)) => return Err(key),
                None => {
                    let id = self.next_id();
                    let name = parts[depth - 1].name().to_string();
                    self.entries.insert(key, Entry { id, name, kind: EntryKind::Folder });
                },
            }
        }
        Ok(())
    }

    fn remove_tree(&mut self, key: &str) {
        for descendant in self.descendants(key) {
            self.entries.remove(&descendant);
        }
        self.entries.remove(key);
    }
}

/// In-memory storage backend for testing.
///
/// Entries live in a map behind a [`RwLock`] shared by every
/// [`sibling()`](Self::sibling), so siblings share a storage root and can
/// use native copy/move between each other. Each upload to an existing file
/// adds a revision.
///
/// Supports both addressing modes and failure injection.
///
/// # Examples
///
/// ```
/// use wharf_provider::backend::{Failure, MemoryBackend};
/// use wharf_provider::{Conflict, Provider};
/// use wharf_stream::ByteStream;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let backend = MemoryBackend::with_files("mem", [("/works/123.txt", "hello")]);
/// let path = backend.validate_v1_path("/works/123.txt").await.unwrap();
/// assert!(backend.exists(&path).await.unwrap());
///
/// backend.fail(Failure::Upload, "/works/123.txt");
/// let stream = ByteStream::from_bytes("bye");
/// assert!(backend.upload(stream, &path, Conflict::Replace).await.is_err());
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryBackend {
    name: String,
    identity: ProviderIdentity,
    capabilities: Capabilities,
    addressing: Addressing,
    store: Arc<RwLock<Store>>,
    /// Remaining injected failures per (operation, materialized path);
    /// `None` fails forever.
    failures: Arc<Mutex<HashMap<(Failure, String), Option<u32>>>>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        let instance = INSTANCES.fetch_add(1, Ordering::Relaxed);
        Self {
            name: name.into(),
            identity: ProviderIdentity {
                backend: "memory".to_string(),
                root: format!("memory-{instance}"),
                account: None,
            },
            capabilities: Capabilities {
                intra_copy: true,
                intra_move: true,
                ranged_download: true,
                versioning: true,
            },
            addressing: Addressing::Named,
            store: Arc::new(RwLock::new(Store::default())),
            failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a backend pre-populated with files.
    ///
    /// Panics if any path fails to parse or names a folder. If test setup is
    /// wrong, then the test should not pass.
    pub fn with_files(
        name: impl Into<String>,
        files: impl IntoIterator<Item = (impl AsRef<str>, impl Into<Vec<u8>>)>,
    ) -> Self {
        let backend = Self::new(name);
        let mut store = Store::default();
        for (raw, data) in files {
            let raw = raw.as_ref();
            let Ok(path) = ProviderPath::parse(raw) else {
                panic!("MemoryBackend::with_files: invalid path {raw}");
            };
            if path.is_folder() || store.ensure_parents(&path).is_err() {
                panic!("MemoryBackend::with_files: cannot store a file at {raw}");
            }
            let id = store.next_id();
            let modified = store.tick();
            let revision = StoredRevision { version: "v1".to_string(), data: data.into(), modified, sha256: None };
            let entry = Entry {
                id,
                name: path.name().to_string(),
                kind: EntryKind::File(vec![revision]),
            };
            store.entries.insert(Store::key(&path), entry);
        }
        Self { store: Arc::new(RwLock::new(store)), ..backend }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Same storage, seen through a different account.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.identity.account = Some(account.into());
        self
    }

    /// Address entries by identifier instead of by name.
    pub fn identified(mut self) -> Self {
        self.addressing = Addressing::Identified;
        self
    }

    /// Another provider instance over the same storage root.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self { name: name.into(), ..self.clone() }
    }

    /// Make `failure` happen for `path` (a materialized path such as
    /// `/a/b.txt`) on every call.
    pub fn fail(&self, failure: Failure, path: &str) {
        self.failures().insert((failure, path.to_string()), None);
    }

    /// Make `failure` happen for `path` on the next `times` calls only.
    pub fn fail_times(&self, failure: Failure, path: &str, times: u32) {
        self.failures().insert((failure, path.to_string()), Some(times));
    }

    /// Current bytes of the file at `raw`, bypassing failure injection.
    pub async fn contents(&self, raw: &str) -> Option<Vec<u8>> {
        let path = ProviderPath::parse(raw).ok()?;
        let store = self.store.read().await;
        match &store.entries.get(&Store::key(&path))?.kind {
            EntryKind::File(revisions) => revisions.last().map(|revision| revision.data.clone()),
            EntryKind::Folder => None,
        }
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, HashMap<(Failure, String), Option<u32>>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, failure: Failure, path: &ProviderPath) -> Result<()> {
        let mut failures = self.failures();
        let key = (failure, path.materialized_path());
        let fire = match failures.get_mut(&key) {
            None => false,
            Some(None) => true,
            Some(Some(0)) => false,
            Some(Some(remaining)) => {
                *remaining -= 1;
                true
            },
        };
        if !fire {
            return Ok(());
        }
        tracing::debug!(provider = %self.name, %path, ?failure, "Injected failure");
        let code = Some(503);
        exn::bail!(match failure {
            Failure::Metadata => ErrorKind::Metadata { code },
            Failure::Download => ErrorKind::Download { code },
            Failure::Upload => ErrorKind::Upload { code },
            Failure::Delete => ErrorKind::Delete { code },
        })
    }

    fn locate(&self, store: &Store, path: &ProviderPath) -> Option<String> {
        if self.addressing == Addressing::Identified
            && let Some(id) = path.id()
        {
            return store.entries.iter().find(|(_, entry)| entry.id == id).map(|(key, _)| key.clone());
        }
        let key = Store::key(path);
        store.entries.contains_key(&key).then_some(key)
    }

    /// Rebuild the canonical path for a stored key, with identifiers when
    /// identifier-addressed.
    fn path_of(&self, store: &Store, key: &str, folder: bool) -> Result<ProviderPath> {
        let mut parts = Vec::new();
        let mut prefix = String::new();
        for segment in key.split('/').skip(1) {
            prefix.push('/');
            prefix.push_str(segment);
            let Some(entry) = store.entries.get(&prefix) else {
                exn::bail!(ErrorKind::NotFound(prefix));
            };
            let part = PathPart::new(&entry.name);
            parts.push(match self.addressing {
                Addressing::Identified => part.with_id(&entry.id),
                Addressing::Named => part,
            });
        }
        ProviderPath::from_parts(parts, folder, self.addressing)
    }

    /// Best-effort identifier resolution of every existing prefix of `path`.
    fn resolve(&self, store: &Store, path: &ProviderPath) -> Result<ProviderPath> {
        if self.addressing == Addressing::Named {
            return Ok(path.clone());
        }
        let mut parts = Vec::with_capacity(path.parts().len());
        for (depth, part) in path.parts().iter().enumerate() {
            let key = Store::key_of(&path.parts()[..=depth]);
            parts.push(match store.entries.get(&key) {
                Some(entry) => PathPart::new(part.name()).with_id(&entry.id),
                None => PathPart::new(part.name()),
            });
        }
        ProviderPath::from_parts(parts, path.is_folder(), self.addressing)
    }

    fn describe(&self, store: &Store, key: &str) -> Result<Metadata> {
        let Some(entry) = store.entries.get(key) else {
            exn::bail!(ErrorKind::NotFound(key.to_string()));
        };
        match &entry.kind {
            EntryKind::Folder => {
                let mut folder = FolderMetadata::new(&self.name, self.path_of(store, key, true)?)?;
                folder.child_count = Some(store.children(key).len() as u64);
                Ok(folder.into())
            },
            EntryKind::File(revisions) => {
                let Some(latest) = revisions.last() else {
                    exn::bail!(ErrorKind::NotFound(key.to_string()));
                };
                let mut file = FileMetadata::new(&self.name, self.path_of(store, key, false)?, latest.data.len() as u64)?
                    .with_modified(latest.modified)
                    .with_revision(&latest.version)
                    .with_extra("id", entry.id.clone());
                file.etag = Some(format!("{}:{}", entry.id, latest.version));
                if let Some(sha256) = &latest.sha256 {
                    file.hashes.insert(Algorithm::Sha256.to_string(), sha256.clone());
                }
                Ok(file.into())
            },
        }
    }

    fn root_metadata(&self, store: &Store) -> Result<Metadata> {
        let mut folder = FolderMetadata::new(&self.name, ProviderPath::root(self.addressing))?;
        folder.child_count = Some(store.children("").len() as u64);
        Ok(folder.into())
    }

    /// Copy (or move) the subtree at `from` to `to`, replacing whatever is at
    /// `to`. Moves keep identifiers; copies get fresh ones.
    fn transplant(&self, store: &mut Store, from: &str, to: &ProviderPath, keep: bool) -> Result<String> {
        let to_key = Store::key(to);
        if from == to_key || from.starts_with(&format!("{to_key}/")) || to_key.starts_with(&format!("{from}/")) {
            exn::bail!(ErrorKind::OverwriteSelf(to.to_string()));
        }
        if store.ensure_parents(to).is_err() {
            exn::bail!(ErrorKind::NamingConflict(to.to_string()));
        }
        store.remove_tree(&to_key);
        let mut keys = vec![from.to_string()];
        keys.extend(store.descendants(from));
        for key in keys {
            let entry = match keep {
                true => store.entries.remove(&key),
                false => {
                    let copied = store.entries.get(&key).map(|source| (source.name.clone(), source.kind.latest_copy()));
                    copied.map(|(name, kind)| Entry { id: store.next_id(), name, kind })
                },
            };
            let Some(mut entry) = entry else { continue };
            if key == from {
                entry.name = to.name().to_string();
            }
            store.entries.insert(format!("{to_key}{}", &key[from.len()..]), entry);
        }
        Ok(to_key)
    }

    async fn intra_transfer(&self, dest: &dyn Provider, src: &ProviderPath, dest_path: &ProviderPath, keep: bool) -> Result<Metadata> {
        let failed = || match keep {
            true => ErrorKind::IntraMove { failed: vec![src.to_string()], succeeded: vec![] },
            false => ErrorKind::IntraCopy { failed: vec![src.to_string()], succeeded: vec![] },
        };
        if !self.shares_storage_root(dest) {
            exn::bail!(ErrorKind::Unsupported("intra transfer across storage roots"));
        }
        if keep {
            self.check(Failure::Delete, src).or_raise(failed)?;
        }
        self.check(Failure::Upload, dest_path).or_raise(failed)?;
        let mut store = self.store.write().await;
        let Some(from) = self.locate(&store, src) else {
            exn::bail!(ErrorKind::NotFound(src.to_string()));
        };
        let to_key = self.transplant(&mut store, &from, dest_path, keep)?;
        self.describe(&store, &to_key)
    }
}

#[async_trait]
impl Provider for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn addressing(&self) -> Addressing {
        self.addressing
    }

    async fn validate_path(&self, raw: &str) -> Result<ProviderPath> {
        let path = ProviderPath::parse_with(raw, self.addressing)?;
        let store = self.store.read().await;
        self.resolve(&store, &path)
    }

    async fn revalidate_path(&self, base: &ProviderPath, name: &str, folder: bool) -> Result<ProviderPath> {
        let child = base.child(name, folder)?;
        let store = self.store.read().await;
        self.resolve(&store, &child)
    }

    async fn metadata(&self, path: &ProviderPath) -> Result<Metadata> {
        self.check(Failure::Metadata, path)?;
        let store = self.store.read().await;
        if path.is_root() {
            return self.root_metadata(&store);
        }
        let Some(key) = self.locate(&store, path) else {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        };
        let meta = self.describe(&store, &key)?;
        if meta.is_folder() != path.is_folder() {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        }
        Ok(meta)
    }

    async fn children(&self, folder: &ProviderPath) -> Result<Vec<Metadata>> {
        self.check(Failure::Metadata, folder)?;
        let store = self.store.read().await;
        let key = match folder.is_root() {
            true => String::new(),
            false => match self.locate(&store, folder) {
                Some(key) if matches!(store.entries.get(&key).map(|e| &e.kind), Some(EntryKind::Folder)) => key,
                _ => exn::bail!(ErrorKind::NotFound(folder.to_string())),
            },
        };
        store.children(&key).iter().map(|child| self.describe(&store, child)).collect()
    }

    async fn download(&self, path: &ProviderPath, options: DownloadOptions) -> Result<ByteStream> {
        if path.is_folder() {
            exn::bail!(ErrorKind::Download { code: Some(400) });
        }
        self.check(Failure::Download, path)?;
        let store = self.store.read().await;
        let revisions = match self.locate(&store, path).and_then(|key| store.entries.get(&key)).map(|e| &e.kind) {
            Some(EntryKind::File(revisions)) => revisions,
            _ => exn::bail!(ErrorKind::NotFound(path.to_string())),
        };
        let revision = match options.revision.as_deref() {
            None => revisions.last(),
            Some(version) => revisions.iter().find(|revision| revision.version == version),
        };
        let Some(revision) = revision else {
            exn::bail!(ErrorKind::NotFound(format!("{path}@{}", options.revision.unwrap_or_default())));
        };
        let data = match options.range {
            Some(range) if self.capabilities.ranged_download => {
                let (offset, length) = range
                    .resolve(revision.data.len() as u64)
                    .or_raise(|| ErrorKind::Download { code: Some(416) })?;
                // Bounded by data.len(), which is a usize.
                let (offset, length) = (offset as usize, length as usize);
                revision.data[offset..offset + length].to_vec()
            },
            _ => revision.data.clone(),
        };
        Ok(ByteStream::from_bytes(data).with_header("x-revision", &revision.version))
    }

    async fn upload(&self, stream: ByteStream, path: &ProviderPath, conflict: Conflict) -> Result<(FileMetadata, bool)> {
        let mut stream = stream;
        if path.is_folder() {
            stream.release();
            exn::bail!(ErrorKind::InvalidPath(path.to_string()));
        }
        let resolved = match self.check(Failure::Upload, path) {
            Ok(()) => self.handle_name_conflict(path, conflict).await,
            Err(err) => Err(err),
        };
        let (path, existed) = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                stream.release();
                return Err(err);
            },
        };
        let mut stream = stream.hash_with([Algorithm::Sha256]);
        let data = stream.read_all().await.or_raise(|| ErrorKind::upload())?;
        let sha256 = stream.digests().and_then(|digests| digests.get(Algorithm::Sha256)).map(str::to_string);
        let bytes = data.len();

        let mut store = self.store.write().await;
        if store.ensure_parents(&path).is_err() {
            exn::bail!(ErrorKind::Upload { code: Some(409) });
        }
        let modified = store.tick();
        let key = self.locate(&store, &path).unwrap_or_else(|| Store::key(&path));
        match store.entries.get_mut(&key) {
            Some(Entry { kind: EntryKind::File(revisions), .. }) => {
                let version = match self.capabilities.versioning {
                    true => format!("v{}", revisions.len() + 1),
                    false => {
                        revisions.clear();
                        "v1".to_string()
                    },
                };
                revisions.push(StoredRevision { version, data, modified, sha256 });
            },
            Some(Entry { kind: EntryKind::Folder, .. }) => {
                exn::bail!(ErrorKind::Upload { code: Some(409) });
            },
            None => {
                let id = store.next_id();
                let revision = StoredRevision { version: "v1".to_string(), data, modified, sha256 };
                let entry = Entry {
                    id,
                    name: path.name().to_string(),
                    kind: EntryKind::File(vec![revision]),
                };
                store.entries.insert(key.clone(), entry);
            },
        }
        let Some(file) = self.describe(&store, &key)?.into_file() else {
            exn::bail!(ErrorKind::upload());
        };
        tracing::debug!(provider = %self.name, path = %path, bytes, created = !existed, "Uploaded file");
        Ok((file, !existed))
    }

    async fn delete(&self, path: &ProviderPath, options: DeleteOptions) -> Result<()> {
        if path.is_root() && !options.confirm_root {
            exn::bail!(ErrorKind::Delete { code: Some(400) });
        }
        self.check(Failure::Delete, path)?;
        let mut store = self.store.write().await;
        if path.is_root() {
            store.entries.clear();
            return Ok(());
        }
        let Some(key) = self.locate(&store, path) else {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        };
        let is_folder = matches!(store.entries.get(&key).map(|e| &e.kind), Some(EntryKind::Folder));
        if is_folder != path.is_folder() {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        }
        store.remove_tree(&key);
        Ok(())
    }

    async fn revisions(&self, path: &ProviderPath) -> Result<Vec<Revision>> {
        let Some(file) = self.metadata(path).await?.into_file() else {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        };
        if !self.capabilities.versioning {
            return Ok(vec![Revision::latest(&file)]);
        }
        let store = self.store.read().await;
        let revisions = match self.locate(&store, path).and_then(|key| store.entries.get(&key)).map(|e| &e.kind) {
            Some(EntryKind::File(revisions)) => revisions,
            _ => exn::bail!(ErrorKind::NotFound(path.to_string())),
        };
        Ok(revisions
            .iter()
            .map(|stored| {
                let mut revision = Revision::new(&stored.version, Some(stored.modified));
                revision.size = Some(stored.data.len() as u64);
                if let Some(sha256) = &stored.sha256 {
                    revision.hashes.insert(Algorithm::Sha256.to_string(), sha256.clone());
                }
                revision
            })
            .collect())
    }

    async fn create_folder(&self, path: &ProviderPath, precheck: bool) -> Result<FolderMetadata> {
        if path.is_file() {
            exn::bail!(ErrorKind::InvalidPath(path.to_string()));
        }
        let mut store = self.store.write().await;
        if path.is_root() {
            return FolderMetadata::new(&self.name, path.clone());
        }
        if let Some(key) = self.locate(&store, path) {
            let is_folder = matches!(store.entries.get(&key).map(|e| &e.kind), Some(EntryKind::Folder));
            match (is_folder, precheck) {
                (true, true) => exn::bail!(ErrorKind::FolderNamingConflict(path.to_string())),
                (true, false) => {
                    let Some(folder) = self.describe(&store, &key)?.into_folder() else {
                        exn::bail!(ErrorKind::create_folder());
                    };
                    return Ok(folder);
                },
                (false, _) => exn::bail!(ErrorKind::NamingConflict(path.to_string())),
            }
        }
        if store.ensure_parents(path).is_err() {
            exn::bail!(ErrorKind::CreateFolder { code: Some(409) });
        }
        let key = Store::key(path);
        let id = store.next_id();
        store.entries.insert(key.clone(), Entry { id, name: path.name().to_string(), kind: EntryKind::Folder });
        let Some(folder) = self.describe(&store, &key)?.into_folder() else {
            exn::bail!(ErrorKind::create_folder());
        };
        Ok(folder)
    }

    async fn intra_copy(&self, dest: &dyn Provider, src: &ProviderPath, dest_path: &ProviderPath) -> Result<Metadata> {
        self.intra_transfer(dest, src, dest_path, false).await
    }

    async fn intra_move(&self, dest: &dyn Provider, src: &ProviderPath, dest_path: &ProviderPath) -> Result<Metadata> {
        self.intra_transfer(dest, src, dest_path, true).await
    }
}
