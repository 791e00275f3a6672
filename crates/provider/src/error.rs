//! Provider Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Adapters translate whatever their backend reports into
//! one of these kinds at the [`Provider`](crate::Provider) boundary; nothing
//! backend-specific ever crosses it.

use derive_more::{Display, Error};

/// A provider error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// Operation errors carry the backend's status code when it reported one.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A path that was required to exist does not.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("metadata lookup failed{}", status(code))]
    Metadata { code: Option<u16> },
    #[display("download failed{}", status(code))]
    Download { code: Option<u16> },
    #[display("upload failed{}", status(code))]
    Upload { code: Option<u16> },
    #[display("delete failed{}", status(code))]
    Delete { code: Option<u16> },
    #[display("folder creation failed{}", status(code))]
    CreateFolder { code: Option<u16> },
    /// A folder already exists where one was about to be created.
    #[display("folder already exists: {_0}")]
    FolderNamingConflict(#[error(not(source))] String),
    /// The destination exists and the conflict policy forbids replacing it.
    #[display("destination already exists: {_0}")]
    NamingConflict(#[error(not(source))] String),
    /// Folder copy where some children failed. Children listed in
    /// `succeeded` are at the destination; nothing was rolled back.
    #[display("copy failed for {} of {} children", failed.len(), failed.len() + succeeded.len())]
    IntraCopy { failed: Vec<String>, succeeded: Vec<String> },
    /// Folder move where some children failed. Children listed in
    /// `succeeded` are at the destination and gone from the source.
    #[display("move failed for {} of {} children", failed.len(), failed.len() + succeeded.len())]
    IntraMove { failed: Vec<String>, succeeded: Vec<String> },
    /// The destination of a move was written but the source could not be
    /// deleted. Both copies exist.
    #[display("moved to {_0} but the source could not be deleted")]
    MoveIncomplete(#[error(not(source))] String),
    /// The user-supplied path could not be parsed, or is the wrong kind for
    /// the requested operation.
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// Source and destination are the same object on the same storage root.
    #[display("cannot overwrite {_0} with itself")]
    OverwriteSelf(#[error(not(source))] String),
    /// The backend does not offer this operation.
    #[display("unsupported operation: {_0}")]
    Unsupported(#[error(not(source))] &'static str),
}

fn status(code: &Option<u16>) -> String {
    code.map(|code| format!(" (status {code})")).unwrap_or_default()
}

impl ErrorKind {
    /// HTTP-like status code for the request layer.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Metadata { code }
            | Self::Download { code }
            | Self::Upload { code }
            | Self::Delete { code }
            | Self::CreateFolder { code } => code.unwrap_or(500),
            Self::FolderNamingConflict(_) | Self::NamingConflict(_) | Self::OverwriteSelf(_) => 409,
            Self::IntraCopy { .. } | Self::IntraMove { .. } | Self::MoveIncomplete(_) => 500,
            Self::InvalidPath(_) => 400,
            Self::Unsupported(_) => 501,
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Metadata { code }
            | Self::Download { code }
            | Self::Upload { code }
            | Self::Delete { code }
            | Self::CreateFolder { code } => code.is_none_or(|code| code >= 500 || code == 429),
            _ => false,
        }
    }

    /// Shorthand used by adapters when the backend reported nothing useful.
    pub fn upload() -> Self {
        Self::Upload { code: None }
    }

    pub fn download() -> Self {
        Self::Download { code: None }
    }

    pub fn delete() -> Self {
        Self::Delete { code: None }
    }

    pub fn metadata() -> Self {
        Self::Metadata { code: None }
    }

    pub fn create_folder() -> Self {
        Self::CreateFolder { code: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::upload().to_string(), "upload failed");
        assert_eq!(ErrorKind::Delete { code: Some(400) }.to_string(), "delete failed (status 400)");
        let partial = ErrorKind::IntraMove {
            failed: vec!["/a/x".to_string()],
            succeeded: vec!["/a/y".to_string(), "/a/z".to_string()],
        };
        assert_eq!(partial.to_string(), "move failed for 1 of 3 children");
    }

    #[rstest]
    #[case(ErrorKind::NotFound("/x".into()), 404)]
    #[case(ErrorKind::upload(), 500)]
    #[case(ErrorKind::Download { code: Some(400) }, 400)]
    #[case(ErrorKind::NamingConflict("/x".into()), 409)]
    #[case(ErrorKind::OverwriteSelf("/x".into()), 409)]
    #[case(ErrorKind::InvalidPath("x".into()), 400)]
    fn test_code(#[case] kind: ErrorKind, #[case] expected: u16) {
        assert_eq!(kind.code(), expected);
    }

    #[rstest]
    #[case(ErrorKind::upload(), true)]
    #[case(ErrorKind::Upload { code: Some(503) }, true)]
    #[case(ErrorKind::Upload { code: Some(429) }, true)]
    #[case(ErrorKind::Delete { code: Some(400) }, false)]
    #[case(ErrorKind::MoveIncomplete("/x".into()), false)]
    #[case(ErrorKind::NotFound("/x".into()), false)]
    #[case(ErrorKind::NamingConflict("/x".into()), false)]
    #[case(ErrorKind::IntraCopy { failed: vec![], succeeded: vec![] }, false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
