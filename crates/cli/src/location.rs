use crate::error::{Error, ErrorKind};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// A `<provider>:<path>` argument. An empty path means the provider root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub provider: String,
    pub path: String,
}

impl Location {
    /// The path with a trailing slash, for commands that only make sense on
    /// folders.
    pub fn folder_path(&self) -> String {
        match self.path.ends_with('/') {
            true => self.path.clone(),
            false => format!("{}/", self.path),
        }
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((provider, path)) = s.split_once(':') else {
            exn::bail!(ErrorKind::Location(s.to_string()));
        };
        if provider.is_empty() || !(path.is_empty() || path.starts_with('/')) {
            exn::bail!(ErrorKind::Location(s.to_string()));
        }
        let path = match path.is_empty() {
            true => "/".to_string(),
            false => path.to_string(),
        };
        Ok(Self { provider: provider.to_string(), path })
    }
}

/// Argument parser for clap, which wants a plain error message.
pub fn parse(raw: &str) -> Result<Location, String> {
    raw.parse().map_err(|err: Error| (*err).to_string())
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", self.provider, self.path)
    }
}
