use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wharf_config::ProviderConfig;
use wharf_provider::Conflict;
use wharf_transfer::Operation;

/// One side of a transfer: how to build the provider, and the raw path on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub provider: ProviderConfig,
    /// Re-validated against the provider on every attempt.
    pub path: String,
}

impl Endpoint {
    pub fn new(provider: ProviderConfig, path: impl Into<String>) -> Self {
        Self { provider, path: path.into() }
    }
}

/// Everything a worker needs to run a transfer from scratch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub id: Uuid,
    pub operation: Operation,
    pub source: Endpoint,
    pub destination: Endpoint,
    #[serde(default)]
    pub rename: Option<String>,
    #[serde(default)]
    pub conflict: Conflict,
}

impl JobPayload {
    pub fn new(operation: Operation, source: Endpoint, destination: Endpoint) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            source,
            destination,
            rename: None,
            conflict: Conflict::default(),
        }
    }

    pub fn with_rename(mut self, rename: impl Into<String>) -> Self {
        self.rename = Some(rename.into());
        self
    }

    pub fn with_conflict(mut self, conflict: Conflict) -> Self {
        self.conflict = conflict;
        self
    }

    /// Task name the job is submitted under.
    pub fn task_name(&self) -> &'static str {
        match self.operation {
            Operation::Copy => "wharf.copy",
            Operation::Move => "wharf.move",
        }
    }

    /// Stable hash of the (source, destination) pair, for de-duplicating
    /// concurrent jobs in an external queue.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(&(&self.source, &self.destination)).or_raise(|| ErrorKind::Payload)?;
        Ok(blake3::hash(&canonical).to_hex().to_string())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).or_raise(|| ErrorKind::Payload)
    }

    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).or_raise(|| ErrorKind::Payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> JobPayload {
        JobPayload::new(
            Operation::Move,
            Endpoint::new(ProviderConfig::filesystem("/srv/a").with_credential("token", "s3cr3t"), "/x.txt"),
            Endpoint::new(ProviderConfig::filesystem("/srv/b"), "/archive/"),
        )
    }

    #[test]
    fn test_json_is_replayable() {
        let payload = payload().with_rename("y.txt").with_conflict(Conflict::Keep);
        let body = payload.to_json().unwrap();
        assert_eq!(JobPayload::from_json(&body).unwrap(), payload);
    }

    #[test]
    fn test_optional_fields_default() {
        let mut value: serde_json::Value = serde_json::from_str(&payload().to_json().unwrap()).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("rename");
        object.remove("conflict");
        let parsed = JobPayload::from_json(&value.to_string()).unwrap();
        assert_eq!(parsed.conflict, Conflict::Replace);
        assert_eq!(parsed.rename, None);
    }

    #[test]
    fn test_malformed_payload() {
        let err = JobPayload::from_json(r#"{"operation": "teleport"}"#).unwrap_err();
        assert_eq!(*err, ErrorKind::Payload);
    }

    #[test]
    fn test_fingerprint_ignores_job_identity() {
        let (first, second) = (payload(), payload().with_conflict(Conflict::Warn));
        assert_ne!(first.id, second.id);
        assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
        let mut elsewhere = payload();
        elsewhere.destination.path = "/other/".to_string();
        assert_ne!(first.fingerprint().unwrap(), elsewhere.fingerprint().unwrap());
    }

    #[test]
    fn test_task_name() {
        assert_eq!(payload().task_name(), "wharf.move");
        let copy = JobPayload { operation: Operation::Copy, ..payload() };
        assert_eq!(copy.task_name(), "wharf.copy");
    }
}
