//! Backpressure-aware byte forwarding.
//!
//! One buffer, one chunk in flight: a chunk is written in full before the
//! next read is issued, so a slow writer stalls the reader instead of
//! growing memory.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Which half of the pump failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Read,
    Write,
}

#[derive(Debug)]
pub(crate) struct PumpError {
    pub side: Side,
    pub transferred: u64,
    pub source: io::Error,
}

/// Bytes forwarded so far, and whether the reader has hit EOF.
///
/// Shared between [`forward`] and [`hangup`] running on the same task.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    bytes: AtomicU64,
    eof: AtomicBool,
}

impl Progress {
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Relaxed)
    }
}

/// Copy `reader` into `writer` until EOF, then flush and shut `writer` down.
///
/// `on_eof` runs once the reader is exhausted, before the writer is drained.
pub(crate) async fn forward<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    progress: &Progress,
    on_eof: F,
) -> Result<u64, PumpError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnOnce(u64),
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut transferred: u64 = 0;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(PumpError {
                    side: Side::Read,
                    transferred,
                    source,
                });
            }
        };

        writer
            .write_all(&buf[..n])
            .await
            .map_err(|source| PumpError {
                side: Side::Write,
                transferred,
                source,
            })?;
        transferred += n as u64;
        progress.bytes.store(transferred, Ordering::Relaxed);
        trace!(chunk = n, transferred, "Forwarded chunk");
    }

    progress.eof.store(true, Ordering::Relaxed);
    on_eof(transferred);

    let drain = async {
        writer.flush().await?;
        writer.shutdown().await
    };
    drain.await.map_err(|source| PumpError {
        side: Side::Write,
        transferred,
        source,
    })?;

    Ok(transferred)
}

/// Resolve when the peer on `conn` closes or errors before `progress`
/// reaches EOF.
///
/// Anything the peer sends is discarded. Once the reader side of the pump is
/// exhausted, a close is the normal end of the transfer and this never
/// resolves.
pub(crate) async fn hangup<R>(conn: &mut R, progress: &Progress) -> PumpError
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut scratch = [0u8; 512];
    let source = loop {
        match conn.read(&mut scratch).await {
            Ok(0) => {
                break io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "peer closed the connection",
                );
            }
            Ok(n) => debug!(bytes = n, "Discarding bytes sent by peer"),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => break e,
        }
    };

    if progress.is_eof() {
        return std::future::pending().await;
    }
    PumpError {
        side: Side::Write,
        transferred: progress.bytes(),
        source,
    }
}
