use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The configuration file could not be read or parsed.
    #[display("failed to load configuration from {_0}")]
    Load(#[error(not(source))] String),
    #[display("unknown provider: {_0}")]
    UnknownProvider(#[error(not(source))] String),
    /// The configuration parsed but a value is out of range.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
}

impl ErrorKind {
    /// Configuration does not change between attempts.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_messages_are_not_sources() {
        let kind = ErrorKind::Load("wharf.toml".into());
        assert!(kind.source().is_none());
        assert_eq!(kind.to_string(), "failed to load configuration from wharf.toml");
        assert_eq!(ErrorKind::UnknownProvider("s3".into()).to_string(), "unknown provider: s3");
    }
}
