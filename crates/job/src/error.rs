use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the job machinery itself. Failures of the transfer a job
/// performs are reported through [`JobReport`](crate::JobReport) instead.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The job body is not a valid payload. Never retried.
    #[display("malformed job payload")]
    Payload,
    /// The task queue refused the submission.
    #[display("task queue rejected submission")]
    Submit,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Submit)
    }
}
