//! Pull-based byte streams for moving payloads through the gateway.
//!
//! A [`ByteStream`] wraps any [`AsyncRead`] (an inbound request body, a
//! backend response, a file on disk) and exposes one uniform read contract:
//!
//! - a declared size, or "unknown" ([`ByteStream::declared_size`] returns `-1`),
//! - a running count of bytes delivered so far,
//! - optional [`Digests`] computed incrementally and exposed once drained,
//! - opaque headers attached by whichever adapter produced the stream,
//! - idempotent [`release()`](ByteStream::release).
//!
//! Streams compose through [stages](crate::stage) without buffering: the
//! consumer pulls, and every stage forwards exactly one read to the stage
//! beneath it. A consumer that stops reading stops the producer too.

pub mod error;
mod hash;
mod range;
pub mod stage;

pub use crate::hash::{Algorithm, Digests, Hasher};
pub use crate::range::ByteRange;
pub use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind, Result};
use crate::stage::{CancellableReader, CutoffReader};
use exn::ResultExt;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Cursor};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A handle over an in-flight byte sequence.
///
/// Whoever opens a stream owns it until it is handed to its consumer; the
/// consumer drains it or calls [`release()`](Self::release). Dropping the
/// stream also releases the underlying source.
///
/// # Examples
///
/// ```
/// use wharf_stream::{Algorithm, ByteStream};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut stream = ByteStream::from_bytes("hello world").hash_with([Algorithm::Sha256]);
/// assert_eq!(stream.declared_size(), 11);
/// let body = stream.read_all().await.unwrap();
/// assert_eq!(body, b"hello world");
/// assert!(stream.digests().unwrap().get(Algorithm::Sha256).is_some());
/// stream.release();
/// stream.release(); // no-op
/// # }
/// ```
pub struct ByteStream {
    inner: Option<BoxAsyncRead>,
    size: Option<u64>,
    consumed: u64,
    headers: BTreeMap<String, String>,
    hasher: Option<Hasher>,
    digests: Option<Digests>,
    finished: bool,
}

impl ByteStream {
    /// Wrap a reader with a known (`Some`) or unknown (`None`) length.
    pub fn new(reader: impl AsyncRead + Send + 'static, size: Option<u64>) -> Self {
        Self {
            inner: Some(Box::pin(reader)),
            size,
            consumed: 0,
            headers: BTreeMap::new(),
            hasher: None,
            digests: None,
            finished: false,
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self::new(Cursor::new(bytes), Some(size))
    }

    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Size in bytes, if the producer knows it.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Size in bytes, or `-1` when unknown.
    pub fn declared_size(&self) -> i64 {
        self.size.and_then(|size| i64::try_from(size).ok()).unwrap_or(-1)
    }

    /// Bytes delivered to the consumer so far.
    pub fn bytes_read(&self) -> u64 {
        self.consumed
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Compute the given digests over every byte read from now on. Call this
    /// before the first read, otherwise the digests cover only the remainder.
    pub fn hash_with(mut self, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        self.hasher = Some(Hasher::new(algorithms));
        self.digests = None;
        self
    }

    /// Digests of the full payload. Only available once the stream has been
    /// read to the end.
    pub fn digests(&self) -> Option<&Digests> {
        self.digests.as_ref()
    }

    /// `true` once end-of-stream has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Stop yielding bytes after `limit` bytes.
    pub fn cutoff(self, limit: u64) -> Self {
        let size = self.size.map(|size| size.min(limit));
        self.map_reader(|inner| CutoffReader::new(inner, limit), size)
    }

    /// Fail reads as soon as `token` is cancelled.
    pub fn cancellable(self, token: CancellationToken) -> Self {
        let size = self.size;
        self.map_reader(|inner| CancellableReader::new(inner, token), size)
    }

    fn map_reader<R, F>(mut self, f: F, size: Option<u64>) -> Self
    where
        R: AsyncRead + Send + 'static,
        F: FnOnce(BoxAsyncRead) -> R,
    {
        if let Some(inner) = self.inner.take() {
            self.inner = Some(Box::pin(f(inner)));
        }
        self.size = size;
        self
    }

    /// Drop the underlying source. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if self.inner.take().is_some() {
            tracing::trace!(read = self.consumed, finished = self.finished, "Released stream");
        }
    }

    /// Read one chunk into `buf`, returning `0` at end-of-stream.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.read(buf).await.map_err(Self::io_to_error)
    }

    /// Read the rest of the stream into memory, releasing it afterwards
    /// whether or not the read succeeded.
    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size.and_then(|s| usize::try_from(s).ok()).unwrap_or(0));
        let result = self.read_to_end(&mut out).await.map_err(Self::io_to_error);
        self.release();
        result.map(|_| out)
    }

    /// Copy the rest of the stream into `writer` chunk by chunk, then close
    /// the writer. The stream is released on every exit path.
    pub async fn copy_into<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<u64> {
        let result = self.copy_into_inner(writer).await;
        self.release();
        result
    }

    async fn copy_into_inner<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<u64> {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = self.read_chunk(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await.or_raise(|| ErrorKind::Write)?;
            total += n as u64;
        }
        writer.close().await.or_raise(|| ErrorKind::Write)?;
        Ok(total)
    }

    fn io_to_error(err: io::Error) -> Error {
        match ErrorKind::from_io(&err) {
            Some(kind) => Error::from(kind),
            None => exn::Exn::from(err).raise(ErrorKind::Read),
        }
    }

    fn advance(&mut self, chunk: &[u8], requested: usize) -> io::Result<()> {
        if !chunk.is_empty() {
            self.consumed += chunk.len() as u64;
            if let Some(hasher) = self.hasher.as_mut() {
                hasher.update(chunk);
            }
            return Ok(());
        }
        // A zero-length read into a zero-length buffer is not end-of-stream.
        if requested == 0 || self.finished {
            return Ok(());
        }
        self.finished = true;
        if let Some(expected) = self.size
            && self.consumed < expected
        {
            return Err(ErrorKind::Truncated { read: self.consumed, expected }.into_io());
        }
        if let Some(hasher) = self.hasher.take() {
            self.digests = Some(hasher.finalize());
        }
        Ok(())
    }
}

impl AsyncRead for ByteStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Err(ErrorKind::Released.into_io()));
        };
        let n = ready!(inner.as_mut().poll_read(cx, buf))?;
        this.advance(&buf[..n], buf.len())?;
        Poll::Ready(Ok(n))
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("size", &self.size)
            .field("read", &self.consumed)
            .field("headers", &self.headers)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_all_matches_source() {
        let mut stream = ByteStream::from_bytes(b"0123456789".to_vec());
        assert_eq!(stream.read_all().await.unwrap(), b"0123456789");
        assert_eq!(stream.bytes_read(), 10);
        assert!(stream.is_finished());
        assert!(stream.is_released());
    }

    #[tokio::test]
    async fn test_unknown_size() {
        let stream = ByteStream::new(Cursor::new(b"abc".to_vec()), None);
        assert_eq!(stream.declared_size(), -1);
        assert_eq!(stream.size(), None);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let mut stream = ByteStream::from_bytes("data");
        stream.release();
        stream.release();
        assert!(stream.is_released());
        let mut buf = [0u8; 4];
        let err = stream.read_chunk(&mut buf).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Released);
    }

    #[tokio::test]
    async fn test_digests_only_after_drain() {
        let mut stream = ByteStream::from_bytes("abc").hash_with([Algorithm::Crc32, Algorithm::Sha256]);
        let mut buf = [0u8; 2];
        assert_eq!(stream.read_chunk(&mut buf).await.unwrap(), 2);
        assert!(stream.digests().is_none());
        stream.read_all().await.unwrap();
        let digests = stream.digests().unwrap();
        assert_eq!(digests.get(Algorithm::Crc32), Some("352441c2"));
    }

    #[tokio::test]
    async fn test_truncated_source() {
        let mut stream = ByteStream::new(Cursor::new(b"short".to_vec()), Some(10));
        let err = stream.read_all().await.unwrap_err();
        assert_eq!(*err, ErrorKind::Truncated { read: 5, expected: 10 });
        assert!(stream.is_released());
    }

    #[tokio::test]
    async fn test_cutoff_adjusts_size() {
        let mut stream = ByteStream::from_bytes("0123456789").cutoff(3);
        assert_eq!(stream.size(), Some(3));
        assert_eq!(stream.read_all().await.unwrap(), b"012");
    }

    #[tokio::test]
    async fn test_stages_compose() {
        let token = CancellationToken::new();
        let mut stream = ByteStream::from_bytes("0123456789")
            .cutoff(6)
            .cancellable(token)
            .hash_with([Algorithm::Blake3])
            .with_header("x-checksum", "none");
        assert_eq!(stream.read_all().await.unwrap(), b"012345");
        assert_eq!(stream.headers().get("x-checksum").map(String::as_str), Some("none"));
        assert!(stream.digests().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_stream_fails() {
        let token = CancellationToken::new();
        let mut stream = ByteStream::from_bytes("0123456789").cancellable(token.clone());
        token.cancel();
        let err = stream.read_all().await.unwrap_err();
        assert_eq!(*err, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_copy_into_writer() {
        let mut stream = ByteStream::from_bytes("payload");
        let mut sink = Cursor::new(Vec::new());
        let copied = stream.copy_into(&mut sink).await.unwrap();
        assert_eq!(copied, 7);
        assert_eq!(sink.into_inner(), b"payload");
        assert!(stream.is_released());
    }
}
