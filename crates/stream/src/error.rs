//! Stream Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction, same as every other crate in the workspace.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A stream error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for stream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The underlying byte source failed mid-read.
    #[display("stream read failed")]
    Read,
    /// The consumer's sink rejected a write.
    #[display("stream write failed")]
    Write,
    /// The stream was already released; nothing more can be read from it.
    #[display("stream already released")]
    Released,
    /// The stream was cancelled by its owner.
    #[display("stream cancelled")]
    Cancelled,
    /// The source reached end-of-file before delivering its declared size.
    #[display("stream ended after {read} of {expected} bytes")]
    Truncated { read: u64, expected: u64 },
    /// A requested byte range does not overlap the available content.
    #[display("byte range not satisfiable")]
    Unsatisfiable,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Read | Self::Write | Self::Truncated { .. })
    }

    /// Wrap the kind in an [`IoError`] so it can travel through
    /// [`AsyncRead`](futures::io::AsyncRead) implementations.
    pub(crate) fn into_io(self) -> IoError {
        IoError::other(self)
    }

    /// Recover a kind previously wrapped by [`into_io()`](Self::into_io), if any.
    pub(crate) fn from_io(err: &IoError) -> Option<Self> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<ErrorKind>()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::Released.to_string(), "stream already released");
        assert_eq!(ErrorKind::Truncated { read: 3, expected: 10 }.to_string(), "stream ended after 3 of 10 bytes");
    }

    #[test]
    fn error_kind_survives_io_round_trip() {
        let io = ErrorKind::Cancelled.into_io();
        assert_eq!(ErrorKind::from_io(&io), Some(ErrorKind::Cancelled));
        let foreign = IoError::other("connection reset");
        assert_eq!(ErrorKind::from_io(&foreign), None);
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Read.is_retryable());
        assert!(!ErrorKind::Released.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }
}
