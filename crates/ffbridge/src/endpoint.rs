//! Local endpoint allocation and listener ownership.
//!
//! An [`EndpointAllocator`] hands out collision-free endpoints: unix socket
//! files with a per-process sequence number plus a random suffix, or loopback
//! TCP ports chosen by the OS. The returned [`BoundListener`] owns the OS
//! resource; dropping it closes the listener and removes the socket file.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use ffbridge_core::{BridgeSettings, Transport};

use crate::error::BridgeError;

/// Fresh socket names tried before giving up.
const MAX_BIND_ATTEMPTS: u32 = 8;

/// A connectable local address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    #[cfg(unix)]
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl Endpoint {
    /// URL form accepted by ffmpeg in place of a file path.
    pub fn url(&self) -> String {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => format!("unix:{}", path.display()),
            Self::Tcp(addr) => format!("tcp://{addr}"),
        }
    }

    pub const fn transport(&self) -> Transport {
        match self {
            #[cfg(unix)]
            Self::Unix(_) => Transport::Unix,
            Self::Tcp(_) => Transport::Tcp,
        }
    }

    /// Socket file backing this endpoint, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => Some(path),
            Self::Tcp(_) => None,
        }
    }

    /// Open a client connection, as the subprocess would.
    pub async fn connect(&self) -> io::Result<Connection> {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => UnixStream::connect(path).await.map(Connection::Unix),
            Self::Tcp(addr) => TcpStream::connect(addr).await.map(Connection::Tcp),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Allocates unique endpoints. Safe to share between tasks.
#[derive(Debug)]
pub struct EndpointAllocator {
    transport: Transport,
    socket_dir: PathBuf,
    sequence: AtomicU64,
}

impl EndpointAllocator {
    pub fn new(transport: Transport, socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            socket_dir: socket_dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self::new(settings.transport, settings.resolved_socket_dir())
    }

    pub const fn transport(&self) -> Transport {
        self.transport
    }

    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Bind a listener on a fresh endpoint.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn bind(&self) -> Result<BoundListener, BridgeError> {
        match self.transport {
            Transport::Tcp => bind_tcp(),
            Transport::Unix => self.bind_unix(),
        }
    }

    #[cfg(unix)]
    fn bind_unix(&self) -> Result<BoundListener, BridgeError> {
        for _ in 0..MAX_BIND_ATTEMPTS {
            let path = self.next_socket_path();
            match UnixListener::bind(&path) {
                Ok(listener) => {
                    debug!(path = %path.display(), "Bound unix endpoint");
                    return Ok(BoundListener {
                        kind: ListenerKind::Unix(listener),
                        endpoint: Endpoint::Unix(path.clone()),
                        socket_file: Some(SocketFile(path)),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    debug!(path = %path.display(), "Socket path taken, retrying");
                }
                Err(e) => {
                    return Err(BridgeError::EndpointAllocation {
                        reason: format!("{}: {e}", path.display()),
                    });
                }
            }
        }
        Err(BridgeError::EndpointAllocation {
            reason: format!(
                "no free socket name in {} after {MAX_BIND_ATTEMPTS} attempts",
                self.socket_dir.display()
            ),
        })
    }

    #[cfg(not(unix))]
    #[allow(clippy::unused_self)]
    fn bind_unix(&self) -> Result<BoundListener, BridgeError> {
        Err(BridgeError::EndpointAllocation {
            reason: "unix sockets are not available on this platform".to_string(),
        })
    }

    fn next_socket_path(&self) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.socket_dir.join(format!(
            "ffbridge-{}-{seq}-{}.sock",
            std::process::id(),
            &nonce[..8]
        ))
    }
}

fn bind_tcp() -> Result<BoundListener, BridgeError> {
    let allocation_failed = |e: io::Error| BridgeError::EndpointAllocation {
        reason: format!("loopback tcp: {e}"),
    };

    let std_listener =
        std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(allocation_failed)?;
    std_listener.set_nonblocking(true).map_err(allocation_failed)?;
    let addr = std_listener.local_addr().map_err(allocation_failed)?;
    let listener = TcpListener::from_std(std_listener).map_err(allocation_failed)?;

    debug!(%addr, "Bound tcp endpoint");
    Ok(BoundListener {
        kind: ListenerKind::Tcp(listener),
        endpoint: Endpoint::Tcp(addr),
        socket_file: None,
    })
}

enum ListenerKind {
    #[cfg(unix)]
    Unix(UnixListener),
    Tcp(TcpListener),
}

/// A listening endpoint. Released on drop.
pub struct BoundListener {
    // Field order matters: the listener closes before the file is unlinked.
    kind: ListenerKind,
    endpoint: Endpoint,
    socket_file: Option<SocketFile>,
}

impl BoundListener {
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Accept the next connection, returning it with a peer description.
    pub async fn accept(&self) -> io::Result<(Connection, String)> {
        match &self.kind {
            #[cfg(unix)]
            ListenerKind::Unix(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Connection::Unix(stream), format!("{addr:?}")))
            }
            ListenerKind::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Connection::Tcp(stream), addr.to_string()))
            }
        }
    }
}

impl fmt::Debug for BoundListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundListener")
            .field("endpoint", &self.endpoint)
            .field("owns_socket_file", &self.socket_file.is_some())
            .finish()
    }
}

/// Removes the socket file when dropped.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "Removed socket file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "Failed to remove socket file"),
        }
    }
}

/// One accepted (or dialled) stream.
#[derive(Debug)]
pub enum Connection {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn tcp_endpoint_is_loopback_url() {
        let allocator = EndpointAllocator::new(Transport::Tcp, std::env::temp_dir());
        let listener = allocator.bind().unwrap();
        let endpoint = listener.endpoint().clone();

        assert_eq!(endpoint.transport(), Transport::Tcp);
        assert!(endpoint.path().is_none());
        assert!(endpoint.url().starts_with("tcp://127.0.0.1:"));
        assert!(!endpoint.url().ends_with(":0"));
    }

    #[tokio::test]
    async fn accepted_connection_carries_bytes() {
        let allocator = EndpointAllocator::new(Transport::Tcp, std::env::temp_dir());
        let listener = allocator.bind().unwrap();
        let endpoint = listener.endpoint().clone();

        let client = tokio::spawn(async move {
            let mut conn = endpoint.connect().await.unwrap();
            conn.write_all(b"ping").await.unwrap();
            conn.shutdown().await.unwrap();
        });

        let (mut conn, peer) = listener.accept().await.unwrap();
        assert!(peer.starts_with("127.0.0.1:"));
        let mut got = Vec::new();
        conn.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"ping");
        client.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_socket_file_removed_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let allocator = EndpointAllocator::new(Transport::Unix, dir.path());
        let listener = allocator.bind().unwrap();
        let path = listener.endpoint().path().unwrap().to_path_buf();

        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
        assert_eq!(listener.endpoint().url(), format!("unix:{}", path.display()));

        drop(listener);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn concurrent_allocations_are_distinct() {
        let dir = tempfile::TempDir::new().unwrap();
        let allocator = std::sync::Arc::new(EndpointAllocator::new(Transport::Unix, dir.path()));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let allocator = std::sync::Arc::clone(&allocator);
            tasks.push(tokio::spawn(async move { allocator.bind().unwrap() }));
        }

        let mut listeners = Vec::new();
        for task in tasks {
            listeners.push(task.await.unwrap());
        }
        let urls: HashSet<String> = listeners.iter().map(|l| l.endpoint().url()).collect();
        assert_eq!(urls.len(), 16);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_socket_dir_fails_allocation() {
        let dir = tempfile::TempDir::new().unwrap();
        let allocator = EndpointAllocator::new(Transport::Unix, dir.path().join("absent"));
        let err = allocator.bind().unwrap_err();
        assert!(matches!(err, BridgeError::EndpointAllocation { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connect_after_release_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let allocator = EndpointAllocator::new(Transport::Unix, dir.path());
        let listener = allocator.bind().unwrap();
        let endpoint = listener.endpoint().clone();
        drop(listener);

        assert!(endpoint.connect().await.is_err());
    }
}
