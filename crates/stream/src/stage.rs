//! Transform stages that wrap an inner reader.
//!
//! Every stage forwards each outer `poll_read` to exactly one inner
//! `poll_read`, so chaining stages never buffers and backpressure is
//! inherited from whoever is pulling.

use crate::error::ErrorKind;
use futures::io::AsyncRead;
use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

pin_project! {
    /// Stops yielding bytes once `limit` bytes have been read.
    pub struct CutoffReader<R> {
        #[pin]
        inner: R,
        remaining: u64,
    }
}

impl<R> CutoffReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self { inner, remaining: limit }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<R: AsyncRead> AsyncRead for CutoffReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let this = self.project();
        if *this.remaining == 0 || buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        // Infallible: bounded by buf.len() which is already a usize.
        let max = usize::try_from((*this.remaining).min(buf.len() as u64)).unwrap_or(buf.len());
        let n = ready!(this.inner.poll_read(cx, &mut buf[..max]))?;
        *this.remaining -= n as u64;
        Poll::Ready(Ok(n))
    }
}

pin_project! {
    /// Fails the next read once the token is cancelled, even when the inner
    /// reader is parked waiting on a partner that has gone away.
    pub struct CancellableReader<R> {
        #[pin]
        inner: R,
        #[pin]
        cancelled: WaitForCancellationFutureOwned,
    }
}

impl<R> CancellableReader<R> {
    pub fn new(inner: R, token: CancellationToken) -> Self {
        Self {
            inner,
            cancelled: token.cancelled_owned(),
        }
    }
}

impl<R: AsyncRead> AsyncRead for CancellableReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let this = self.project();
        if this.cancelled.poll(cx).is_ready() {
            return Poll::Ready(Err(ErrorKind::Cancelled.into_io()));
        }
        this.inner.poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::{AsyncReadExt, Cursor};

    #[tokio::test]
    async fn test_cutoff_stops_at_limit() {
        let mut reader = CutoffReader::new(Cursor::new(b"0123456789".to_vec()), 4);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"0123");
        assert_eq!(reader.remaining(), 0);
    }

    #[tokio::test]
    async fn test_cutoff_larger_than_source() {
        let mut reader = CutoffReader::new(Cursor::new(b"abc".to_vec()), 100);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_reader() {
        let token = CancellationToken::new();
        let mut reader = std::pin::pin!(CancellableReader::new(Pending, token.clone()));
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(ErrorKind::from_io(&err), Some(ErrorKind::Cancelled));
    }

    struct Pending;
    impl AsyncRead for Pending {
        fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut [u8]) -> Poll<io::Result<usize>> {
            Poll::Pending
        }
    }
}
