//! A provider wrapper for tests that records listings and downloads, gauges
//! concurrent uploads, and can stall uploads forever.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wharf_provider::backend::MemoryBackend;
use wharf_provider::error::Result;
use wharf_provider::{
    Addressing, Capabilities, Conflict, DeleteOptions, DownloadOptions, FileMetadata, FolderMetadata, Metadata,
    Provider, ProviderIdentity, ProviderPath, Revision,
};
use wharf_stream::ByteStream;

pub(crate) struct Instrumented {
    inner: MemoryBackend,
    upload_delay: Option<Duration>,
    stall_uploads: bool,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<String>>,
}

impl Instrumented {
    pub(crate) fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            upload_delay: None,
            stall_uploads: false,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Hold every upload open for `delay` before writing.
    pub(crate) fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    /// Uploads read one chunk, then never make progress again.
    pub(crate) fn stalling(mut self) -> Self {
        self.stall_uploads = true;
        self
    }

    pub(crate) fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Most uploads ever in flight at once.
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// `children <folder>` once a listing returned, `download <file>` when a
    /// download is requested.
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Provider for Instrumented {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn identity(&self) -> &ProviderIdentity {
        self.inner.identity()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn addressing(&self) -> Addressing {
        self.inner.addressing()
    }

    async fn validate_path(&self, raw: &str) -> Result<ProviderPath> {
        self.inner.validate_path(raw).await
    }

    async fn revalidate_path(&self, base: &ProviderPath, name: &str, folder: bool) -> Result<ProviderPath> {
        self.inner.revalidate_path(base, name, folder).await
    }

    async fn metadata(&self, path: &ProviderPath) -> Result<Metadata> {
        self.inner.metadata(path).await
    }

    async fn children(&self, folder: &ProviderPath) -> Result<Vec<Metadata>> {
        let children = self.inner.children(folder).await?;
        self.record(format!("children {folder}"));
        Ok(children)
    }

    async fn download(&self, path: &ProviderPath, options: DownloadOptions) -> Result<ByteStream> {
        self.record(format!("download {path}"));
        self.inner.download(path, options).await
    }

    async fn upload(&self, stream: ByteStream, path: &ProviderPath, conflict: Conflict) -> Result<(FileMetadata, bool)> {
        let mut stream = stream;
        if self.stall_uploads {
            let mut buf = [0u8; 64];
            let _ = stream.read_chunk(&mut buf).await;
            return std::future::pending().await;
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.inner.upload(stream, path, conflict).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, path: &ProviderPath, options: DeleteOptions) -> Result<()> {
        self.inner.delete(path, options).await
    }

    async fn revisions(&self, path: &ProviderPath) -> Result<Vec<Revision>> {
        self.inner.revisions(path).await
    }

    async fn create_folder(&self, path: &ProviderPath, precheck: bool) -> Result<FolderMetadata> {
        self.inner.create_folder(path, precheck).await
    }
}
