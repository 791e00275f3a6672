//! Local filesystem backend.
//!
//! Objects live under a configured root directory and are addressed by name.
//! I/O goes through `tokio::fs`; file handles are bridged to the
//! [`futures::io`] traits that [`ByteStream`] speaks via `tokio-util`'s
//! compat layer.

use crate::backend::{Capabilities, Conflict, DeleteOptions, DownloadOptions, Provider, ProviderIdentity};
use crate::error::{Error, ErrorKind, Result};
use crate::metadata::{FileMetadata, FolderMetadata, LATEST_REVISION, Metadata, Revision};
use crate::path::ProviderPath;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata as FsMetadata, create_dir_all as sync_create_dir};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncSeekExt;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use wharf_stream::{Algorithm, ByteStream};

const BACKEND: &str = "filesystem";

/// Filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use wharf_provider::backend::FilesystemBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = FilesystemBackend::new("archive", "/srv/archive")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct FilesystemBackend {
    name: String,
    root: PathBuf,
    identity: ProviderIdentity,
}

impl FilesystemBackend {
    /// Create a backend rooted at an absolute directory, creating it if needed.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
            }
        } else {
            // Only happens once at construction; not worth an async constructor.
            sync_create_dir(&root).or_raise(|| ErrorKind::create_folder())?;
        }
        let identity = ProviderIdentity {
            backend: BACKEND.to_string(),
            root: root.display().to_string(),
            account: None,
        };
        Ok(Self { name: name.into(), root, identity })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_path(&self, path: &ProviderPath) -> PathBuf {
        path.parts().iter().fold(self.root.clone(), |acc, part| acc.join(part.name()))
    }

    fn io_error(err: io::Error, path: &ProviderPath, kind: ErrorKind) -> Error {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_string()),
            _ => kind,
        };
        exn::Exn::from(err).raise(kind)
    }

    fn file_metadata(&self, path: &ProviderPath, meta: &FsMetadata) -> Result<FileMetadata> {
        let mut file = FileMetadata::new(&self.name, path.clone(), meta.len())?.with_revision(LATEST_REVISION);
        file.modified = meta.modified().ok().map(OffsetDateTime::from);
        file.created = meta.created().ok().map(OffsetDateTime::from);
        Ok(file)
    }

    fn to_metadata(&self, path: &ProviderPath, meta: &FsMetadata) -> Result<Metadata> {
        match path.is_folder() {
            true => Ok(FolderMetadata::new(&self.name, path.clone())?.into()),
            false => Ok(self.file_metadata(path, meta)?.into()),
        }
    }

    /// Copy a directory tree. Walks iteratively; symlinks and other special
    /// files are skipped.
    async fn copy_tree(from: PathBuf, to: PathBuf) -> io::Result<()> {
        let mut stack = vec![(from, to)];
        while let Some((from, to)) = stack.pop() {
            fs::create_dir_all(&to).await?;
            let mut entries = fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                let kind = entry.file_type().await?;
                let target = to.join(entry.file_name());
                if kind.is_dir() {
                    stack.push((entry.path(), target));
                } else if kind.is_file() {
                    fs::copy(entry.path(), target).await?;
                }
            }
        }
        Ok(())
    }

    async fn clear_target(target: &Path) -> io::Result<()> {
        match fs::symlink_metadata(target).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(target).await,
            Ok(_) => fs::remove_file(target).await,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Provider for FilesystemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            intra_copy: true,
            intra_move: true,
            ranged_download: true,
            versioning: false,
        }
    }

    async fn metadata(&self, path: &ProviderPath) -> Result<Metadata> {
        let abs_path = self.absolute_path(path);
        let meta = fs::metadata(&abs_path).await.map_err(|e| Self::io_error(e, path, ErrorKind::metadata()))?;
        if meta.is_dir() != path.is_folder() {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        }
        self.to_metadata(path, &meta)
    }

    async fn children(&self, folder: &ProviderPath) -> Result<Vec<Metadata>> {
        if folder.is_file() {
            exn::bail!(ErrorKind::NotFound(folder.to_string()));
        }
        let abs_path = self.absolute_path(folder);
        let mut entries = fs::read_dir(&abs_path).await.map_err(|e| Self::io_error(e, folder, ErrorKind::metadata()))?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::metadata())? {
            let meta = entry.metadata().await.or_raise(|| ErrorKind::metadata())?;
            if !meta.is_dir() && !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(provider = %self.name, path = %entry.path().display(), "Skipping non UTF-8 entry");
                continue;
            };
            let child = folder.child(&name, meta.is_dir())?;
            children.push(self.to_metadata(&child, &meta)?);
        }
        children.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(children)
    }

    async fn download(&self, path: &ProviderPath, options: DownloadOptions) -> Result<ByteStream> {
        if path.is_folder() {
            exn::bail!(ErrorKind::Download { code: Some(400) });
        }
        if let Some(revision) = options.revision.as_deref()
            && revision != LATEST_REVISION
        {
            exn::bail!(ErrorKind::NotFound(format!("{path}@{revision}")));
        }
        let abs_path = self.absolute_path(path);
        let mut file = fs::File::open(&abs_path).await.map_err(|e| Self::io_error(e, path, ErrorKind::download()))?;
        let total = file.metadata().await.or_raise(|| ErrorKind::download())?.len();
        let Some(range) = options.range else {
            return Ok(ByteStream::new(file.compat(), Some(total)));
        };
        let (offset, length) = range.resolve(total).or_raise(|| ErrorKind::Download { code: Some(416) })?;
        file.seek(SeekFrom::Start(offset)).await.or_raise(|| ErrorKind::download())?;
        tracing::debug!(provider = %self.name, %path, offset, length, "Ranged download");
        Ok(ByteStream::new(file.compat(), Some(total - offset))
            .cutoff(length)
            .with_header("content-range", format!("bytes {offset}-{}/{total}", offset + length - 1)))
    }

    async fn upload(&self, stream: ByteStream, path: &ProviderPath, conflict: Conflict) -> Result<(FileMetadata, bool)> {
        let mut stream = stream;
        if path.is_folder() {
            stream.release();
            exn::bail!(ErrorKind::InvalidPath(path.to_string()));
        }
        let (path, existed) = match self.handle_name_conflict(path, conflict).await {
            Ok(resolved) => resolved,
            Err(err) => {
                stream.release();
                return Err(err);
            },
        };
        let abs_path = self.absolute_path(&path);
        if let Some(parent) = abs_path.parent()
            && let Err(err) = fs::create_dir_all(parent).await
        {
            stream.release();
            return Err(Self::io_error(err, &path, ErrorKind::upload()));
        }
        let file = match fs::File::create(&abs_path).await {
            Ok(file) => file,
            Err(err) => {
                stream.release();
                return Err(Self::io_error(err, &path, ErrorKind::upload()));
            },
        };
        let mut stream = stream.hash_with([Algorithm::Sha256]);
        let mut writer = file.compat_write();
        let written = stream.copy_into(&mut writer).await.or_raise(|| ErrorKind::upload())?;
        let meta = fs::metadata(&abs_path).await.or_raise(|| ErrorKind::upload())?;
        let mut file = self.file_metadata(&path, &meta)?;
        if let Some(digests) = stream.digests() {
            file = file.with_hashes(digests.to_named());
        }
        tracing::debug!(provider = %self.name, path = %path, bytes = written, created = !existed, "Uploaded file");
        Ok((file, !existed))
    }

    async fn delete(&self, path: &ProviderPath, options: DeleteOptions) -> Result<()> {
        if path.is_root() {
            if !options.confirm_root {
                exn::bail!(ErrorKind::Delete { code: Some(400) });
            }
            let mut entries = fs::read_dir(&self.root).await.or_raise(|| ErrorKind::delete())?;
            while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::delete())? {
                Self::clear_target(&entry.path()).await.or_raise(|| ErrorKind::delete())?;
            }
            tracing::info!(provider = %self.name, "Emptied provider root");
            return Ok(());
        }
        // Confirms the object exists with the expected kind.
        self.metadata(path).await?;
        let abs_path = self.absolute_path(path);
        let result = match path.is_folder() {
            true => fs::remove_dir_all(&abs_path).await,
            false => fs::remove_file(&abs_path).await,
        };
        result.map_err(|e| Self::io_error(e, path, ErrorKind::delete()))
    }

    async fn revisions(&self, path: &ProviderPath) -> Result<Vec<Revision>> {
        let Some(file) = self.metadata(path).await?.into_file() else {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        };
        Ok(vec![Revision::latest(&file)])
    }

    async fn create_folder(&self, path: &ProviderPath, precheck: bool) -> Result<FolderMetadata> {
        if path.is_file() {
            exn::bail!(ErrorKind::InvalidPath(path.to_string()));
        }
        let abs_path = self.absolute_path(path);
        match fs::metadata(&abs_path).await {
            Ok(meta) if meta.is_dir() && precheck => exn::bail!(ErrorKind::FolderNamingConflict(path.to_string())),
            Ok(meta) if meta.is_dir() => return FolderMetadata::new(&self.name, path.clone()),
            Ok(_) => exn::bail!(ErrorKind::NamingConflict(path.to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {},
            Err(err) => return Err(Self::io_error(err, path, ErrorKind::create_folder())),
        }
        fs::create_dir_all(&abs_path).await.map_err(|e| Self::io_error(e, path, ErrorKind::create_folder()))?;
        FolderMetadata::new(&self.name, path.clone())
    }

    async fn intra_copy(&self, dest: &dyn Provider, src: &ProviderPath, dest_path: &ProviderPath) -> Result<Metadata> {
        if !self.shares_storage_root(dest) {
            exn::bail!(ErrorKind::Unsupported("intra_copy across storage roots"));
        }
        let from = self.absolute_path(src);
        let to = self.absolute_path(dest_path);
        let result = async {
            Self::clear_target(&to).await?;
            if src.is_folder() {
                return Self::copy_tree(from, to).await;
            }
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(&from, &to).await.map(|_| ())
        }
        .await;
        result.map_err(|e| Self::io_error(e, src, ErrorKind::IntraCopy { failed: vec![src.to_string()], succeeded: vec![] }))?;
        self.metadata(dest_path).await
    }

    async fn intra_move(&self, dest: &dyn Provider, src: &ProviderPath, dest_path: &ProviderPath) -> Result<Metadata> {
        if !self.shares_storage_root(dest) {
            exn::bail!(ErrorKind::Unsupported("intra_move across storage roots"));
        }
        let from = self.absolute_path(src);
        let to = self.absolute_path(dest_path);
        let result = async {
            Self::clear_target(&to).await?;
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&from, &to).await
        }
        .await;
        result.map_err(|e| Self::io_error(e, src, ErrorKind::IntraMove { failed: vec![src.to_string()], succeeded: vec![] }))?;
        self.metadata(dest_path).await
    }
}
