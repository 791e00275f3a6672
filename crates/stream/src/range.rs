use crate::error::{Error, ErrorKind, Result};
use std::fmt;
use std::str::FromStr;

/// An inclusive byte range, shaped like an HTTP `Range: bytes=start-end` header.
///
/// ```
/// use wharf_stream::ByteRange;
///
/// let range: ByteRange = "bytes=2-5".parse().unwrap();
/// assert_eq!(range.resolve(10).unwrap(), (2, 4));
/// // Open-ended ranges run to the end of the content.
/// assert_eq!(ByteRange::from_start(7).resolve(10).unwrap(), (7, 3));
/// // Ranges starting past the end cannot be satisfied.
/// assert!(ByteRange::from_start(10).resolve(10).is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end: Some(end) }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Clamp the range to content of `total` bytes, returning `(offset, length)`.
    pub fn resolve(&self, total: u64) -> Result<(u64, u64)> {
        if self.start >= total || self.end.is_some_and(|end| end < self.start) {
            exn::bail!(ErrorKind::Unsatisfiable);
        }
        let last = self.end.map_or(total - 1, |end| end.min(total - 1));
        Ok((self.start, last - self.start + 1))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "bytes={}-{end}", self.start),
            None => write!(f, "bytes={}-", self.start),
        }
    }
}

impl FromStr for ByteRange {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let spec = s.trim().strip_prefix("bytes=").unwrap_or(s.trim());
        let Some((start, end)) = spec.split_once('-') else {
            exn::bail!(ErrorKind::Unsatisfiable);
        };
        let start = start.trim().parse::<u64>().map_err(|_| Error::from(ErrorKind::Unsatisfiable))?;
        let end = match end.trim() {
            "" => None,
            end => Some(end.parse::<u64>().map_err(|_| Error::from(ErrorKind::Unsatisfiable))?),
        };
        Ok(Self { start, end })
    }
}
