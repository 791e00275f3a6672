use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    /// A location argument is not `<provider>:<path>`.
    #[display("invalid location {_0:?}, expected <provider>:<path>")]
    Location(#[error(not(source))] String),
    /// The provider refused or failed the operation.
    #[display("{_0} failed")]
    Operation(#[error(not(source))] &'static str),
    #[display("could not read {_0}")]
    Read(#[error(not(source))] String),
    #[display("job {_0} failed")]
    Job(#[error(not(source))] String),
}
