use crate::error::Result;
use crate::{JobPayload, JobReport, Notifier, Outcome, ProviderFactory};
use std::time::Duration;
use tracing::instrument;
use wharf_config::{Config, JobConfig};
use wharf_provider::Provider;
use wharf_provider::error::{ErrorKind, Result as ProviderResult};
use wharf_transfer::{DEFAULT_CONCURRENCY, TransferOptions, Transferred, transfer};

/// Executes job payloads, retrying transient failures and reporting the
/// terminal outcome to a [`Notifier`].
///
/// Nothing is kept between attempts: providers are rebuilt and paths
/// re-validated from the payload every time.
pub struct Worker<F, N> {
    factory: F,
    notifier: N,
    jobs: JobConfig,
    concurrency: usize,
}

impl<F: ProviderFactory, N: Notifier> Worker<F, N> {
    pub fn new(factory: F, notifier: N) -> Self {
        Self { factory, notifier, jobs: JobConfig::default(), concurrency: DEFAULT_CONCURRENCY }
    }

    pub fn from_config(factory: F, notifier: N, config: &Config) -> Self {
        Self::new(factory, notifier).with_jobs(config.jobs).with_concurrency(config.transfer.concurrency)
    }

    pub fn with_jobs(mut self, jobs: JobConfig) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Deserialize a queued task body and run it. A malformed body fails
    /// immediately and is never retried or reported.
    pub async fn handle(&self, body: &str) -> Result<JobReport> {
        let payload = JobPayload::from_json(body)?;
        Ok(self.run(&payload).await)
    }

    /// Run `payload` to completion. Retryable failures are attempted again
    /// up to `max_attempts` in total, waiting `n * retry_backoff_ms` before
    /// retry `n`.
    #[instrument(skip_all, fields(job = %payload.id, operation = %payload.operation))]
    pub async fn run(&self, payload: &JobPayload) -> JobReport {
        let max_attempts = self.jobs.max_attempts.max(1);
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match self.attempt(payload).await {
                Ok(transferred) => break Outcome::Succeeded { created: transferred.created },
                Err(err) if err.is_retryable() && attempts < max_attempts => {
                    let kind: &ErrorKind = &err;
                    let delay = Duration::from_millis(self.jobs.retry_backoff_ms.saturating_mul(u64::from(attempts)));
                    tracing::warn!(attempt = attempts, error = %kind, ?delay, "Attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                },
                Err(err) => {
                    let kind: &ErrorKind = &err;
                    tracing::debug!(attempt = attempts, error = ?err, "Attempt failed");
                    break Outcome::failed(kind);
                },
            }
        };
        let report = JobReport { id: payload.id, operation: payload.operation, attempts, outcome };
        self.notifier.notify(&report).await;
        report
    }

    async fn attempt(&self, payload: &JobPayload) -> ProviderResult<Transferred> {
        let src = self.factory.build("source", &payload.source.provider)?;
        let dest = self.factory.build("destination", &payload.destination.provider)?;
        let src_path = src.validate_v1_path(&payload.source.path).await?;
        let dest_path = dest.validate_path(&payload.destination.path).await?;
        let mut options = TransferOptions::default().with_conflict(payload.conflict).with_concurrency(self.concurrency);
        options.rename = payload.rename.clone();
        transfer(payload.operation, &src, &src_path, &dest, &dest_path, &options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind as JobErrorKind;
    use crate::{DefaultFactory, Endpoint, FailureClass};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use wharf_config::ProviderConfig;
    use wharf_provider::{Conflict, ProviderHandle, ProviderPath};
    use wharf_provider::backend::{Failure, MemoryBackend};
    use wharf_transfer::Operation;

    /// Hands out in-memory backends chosen by the `mock` setting.
    struct Mocks(HashMap<&'static str, MemoryBackend>);

    impl ProviderFactory for Mocks {
        fn build(&self, name: &str, config: &ProviderConfig) -> ProviderResult<ProviderHandle> {
            let key = config.settings.get("mock").map(String::as_str).unwrap_or_default();
            match self.0.get(key) {
                Some(backend) => Ok(Arc::new(backend.clone().with_name(name))),
                None => exn::bail!(ErrorKind::Unsupported("no such mock")),
            }
        }
    }

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<JobReport>>>);

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, report: &JobReport) {
            self.0.lock().unwrap().push(report.clone());
        }
    }

    fn mock(key: &str) -> ProviderConfig {
        ProviderConfig::filesystem("/unused").with_setting("mock", key).with_credential("token", "s3cr3t")
    }

    fn setup() -> (MemoryBackend, MemoryBackend, Worker<Mocks, Recording>, Recording) {
        let src = MemoryBackend::with_files("src", [("/x.txt", "payload")]);
        let dest = MemoryBackend::new("dest");
        let notifier = Recording::default();
        let jobs = JobConfig { max_attempts: 3, retry_backoff_ms: 1 };
        let worker = Worker::new(Mocks(HashMap::from([("src", src.clone()), ("dest", dest.clone())])), notifier.clone())
            .with_jobs(jobs);
        (src, dest, worker, notifier)
    }

    fn payload(operation: Operation, source: &str) -> JobPayload {
        JobPayload::new(operation, Endpoint::new(mock("src"), source), Endpoint::new(mock("dest"), "/"))
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (src, dest, worker, notifier) = setup();
        dest.fail_times(Failure::Upload, "/x.txt", 2);
        let report = worker.run(&payload(Operation::Move, "/x.txt")).await;
        assert_eq!(report.outcome, Outcome::Succeeded { created: true });
        assert_eq!(report.attempts, 3);
        assert_eq!(dest.contents("/x.txt").await.unwrap(), b"payload");
        assert!(src.contents("/x.txt").await.is_none());
        assert_eq!(notifier.0.lock().unwrap().as_slice(), &[report]);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let (src, dest, worker, notifier) = setup();
        dest.fail(Failure::Upload, "/x.txt");
        let report = worker.run(&payload(Operation::Move, "/x.txt")).await;
        assert_eq!(report.attempts, 3);
        assert!(matches!(report.outcome, Outcome::Failed { class: FailureClass::Backend, code: 503, .. }));
        assert_eq!(src.contents("/x.txt").await.unwrap(), b"payload");
        assert_eq!(notifier.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_move_with_undeletable_source_is_not_replayed() {
        let (src, dest, worker, notifier) = setup();
        src.fail_times(Failure::Delete, "/x.txt", 1);
        let payload = payload(Operation::Move, "/x.txt").with_conflict(Conflict::Keep);
        let report = worker.run(&payload).await;
        assert_eq!(report.attempts, 1);
        assert!(matches!(report.outcome, Outcome::Failed { class: FailureClass::Partial, code: 500, .. }));
        let listing = dest.children(&ProviderPath::parse("/").unwrap()).await.unwrap();
        let names: Vec<_> = listing.iter().map(|entry| entry.name()).collect();
        assert_eq!(names, ["x.txt"]);
        assert_eq!(src.contents("/x.txt").await.unwrap(), b"payload");
        assert_eq!(notifier.0.lock().unwrap().as_slice(), &[report]);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (_, _, worker, _) = setup();
        let report = worker.run(&payload(Operation::Copy, "/missing.txt")).await;
        assert_eq!(report.attempts, 1);
        let Outcome::Failed { class, message, .. } = &report.outcome else {
            panic!("expected failure");
        };
        assert_eq!(*class, FailureClass::NotFound);
        assert!(!message.contains("missing"));
        let serialized = serde_json::to_string(&report).unwrap();
        assert!(!serialized.contains("s3cr3t"));
        assert!(!serialized.contains("/missing.txt"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let (_, _, worker, notifier) = setup();
        let err = worker.handle("{not json").await.unwrap_err();
        assert_eq!(*err, JobErrorKind::Payload);
        assert!(!err.is_retryable());
        assert!(notifier.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handle_with_filesystem_providers() {
        let (left, right) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        std::fs::create_dir(left.path().join("docs")).unwrap();
        std::fs::write(left.path().join("docs/a.txt"), "alpha").unwrap();
        let payload = JobPayload::new(
            Operation::Copy,
            Endpoint::new(ProviderConfig::filesystem(left.path()), "/docs/"),
            Endpoint::new(ProviderConfig::filesystem(right.path()), "/"),
        )
        .with_rename("copied");
        let notifier = Recording::default();
        let worker = Worker::from_config(DefaultFactory, notifier.clone(), &Config::default());
        let report = worker.handle(&payload.to_json().unwrap()).await.unwrap();
        assert!(report.outcome.is_success());
        assert_eq!(report.id, payload.id);
        assert_eq!(std::fs::read(right.path().join("copied/a.txt")).unwrap(), b"alpha");
        assert!(left.path().join("docs/a.txt").exists());
    }
}
