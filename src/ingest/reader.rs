//! Size-capped stream adapter and streaming digest.
//!
//! Uploads arrive either with a declared content length or as a chunked
//! stream of unknown length. A declared length is checked against the
//! maximum permitted image size once, before any byte moves; an unknown
//! length is counted read-by-read so the ceiling trips before the
//! overflowing byte reaches a storage backend.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use imagevault_common::{Error, Result};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, ReadBuf};

/// Marker payload carried inside the `io::Error` raised when the size cap
/// trips, so backends can map it back to `SizeLimitExceeded`.
#[derive(Debug)]
struct LimitExceeded;

impl std::fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "maximum image size exceeded")
    }
}

impl std::error::Error for LimitExceeded {}

/// `AsyncRead` adapter enforcing a byte ceiling on the wrapped stream.
pub struct LimitedReader<R> {
    inner: R,
    cap: u64,
    read: u64,
}

impl<R: AsyncRead + Unpin> LimitedReader<R> {
    pub fn new(inner: R, cap: u64) -> Self {
        Self {
            inner,
            cap,
            read: 0,
        }
    }

    /// Bytes passed through so far.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

/// Eager check for uploads whose length is declared up front.
pub fn check_declared(declared: Option<u64>, cap: u64) -> Result<()> {
    match declared {
        Some(size) if size > cap => Err(Error::SizeLimitExceeded),
        _ => Ok(()),
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LimitedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let n = buf.filled().len() - before;
        this.read += n as u64;
        if this.read > this.cap {
            // Roll the overflowing chunk back so it never reaches the
            // backend.
            buf.set_filled(before);
            return Poll::Ready(Err(io::Error::other(LimitExceeded)));
        }
        Poll::Ready(Ok(()))
    }
}

/// Map a read error from a [`LimitedReader`]-wrapped stream back to the
/// common taxonomy.
pub fn map_read_error(e: io::Error) -> Error {
    if e.get_ref().is_some_and(|inner| inner.is::<LimitExceeded>()) {
        Error::SizeLimitExceeded
    } else {
        Error::Io(e)
    }
}

/// Incremental SHA-256 digest and byte count over a streamed upload.
pub struct StreamDigest {
    hasher: Sha256,
    bytes: u64,
}

impl StreamDigest {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Finish, returning the byte count and lowercase hex digest.
    pub fn finalize(self) -> (u64, String) {
        (self.bytes, hex::encode(self.hasher.finalize()))
    }
}

impl Default for StreamDigest {
    fn default() -> Self {
        Self::new()
    }
}
