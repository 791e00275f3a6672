use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wharf_provider::error::ErrorKind;
use wharf_transfer::Operation;

/// Coarse category of a failed job, safe to show to whoever submitted it.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    #[display("not found")]
    NotFound,
    #[display("conflict")]
    Conflict,
    /// Some of the work is done and some is not: a folder with failed
    /// children, or a move that left its source behind.
    #[display("partial")]
    Partial,
    #[display("backend")]
    Backend,
    #[display("invalid")]
    Invalid,
}

impl FailureClass {
    pub fn of(kind: &ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound(_) => Self::NotFound,
            ErrorKind::FolderNamingConflict(_) | ErrorKind::NamingConflict(_) | ErrorKind::OverwriteSelf(_) => {
                Self::Conflict
            },
            ErrorKind::IntraCopy { .. } | ErrorKind::IntraMove { .. } | ErrorKind::MoveIncomplete(_) => Self::Partial,
            ErrorKind::Metadata { .. }
            | ErrorKind::Download { .. }
            | ErrorKind::Upload { .. }
            | ErrorKind::Delete { .. }
            | ErrorKind::CreateFolder { .. }
            | ErrorKind::Unsupported(_) => Self::Backend,
            ErrorKind::InvalidPath(_) => Self::Invalid,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Succeeded { created: bool },
    Failed { class: FailureClass, code: u16, message: String },
}

impl Outcome {
    /// Describe a failure without any path, configuration or credential.
    pub fn failed(kind: &ErrorKind) -> Self {
        let message = match kind {
            ErrorKind::NotFound(_) => "not found".to_string(),
            ErrorKind::FolderNamingConflict(_) => "folder already exists".to_string(),
            ErrorKind::NamingConflict(_) => "destination already exists".to_string(),
            ErrorKind::InvalidPath(_) => "invalid path".to_string(),
            ErrorKind::OverwriteSelf(_) => "source and destination are the same".to_string(),
            ErrorKind::MoveIncomplete(_) => "destination written but the source could not be deleted".to_string(),
            other => other.to_string(),
        };
        Self::Failed { class: FailureClass::of(kind), code: kind.code(), message }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Terminal result of one job, after all attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: Uuid,
    pub operation: Operation,
    pub attempts: u32,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Receives every terminal [`JobReport`].
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &JobReport);
}

/// Writes reports to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &JobReport) {
        match &report.outcome {
            Outcome::Succeeded { created } => {
                tracing::info!(
                    job = %report.id,
                    operation = %report.operation,
                    attempts = report.attempts,
                    created = *created,
                    "Job succeeded"
                );
            },
            Outcome::Failed { class, code, message } => {
                tracing::warn!(
                    job = %report.id,
                    operation = %report.operation,
                    attempts = report.attempts,
                    %class,
                    code = *code,
                    reason = %message,
                    "Job failed"
                );
            },
        }
    }
}
