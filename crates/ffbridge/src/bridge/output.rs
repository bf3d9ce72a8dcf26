//! Bridge that drains the connecting peer into a writable stream.

use std::time::Instant;

use tokio::io::AsyncWrite;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::handle::HandleParts;
use super::{
    BridgeCore, BridgeEvent, BridgeHandle, BridgeOptions, BridgeState, Direction, Finished,
    TransferReport,
};
use crate::endpoint::{Endpoint, EndpointAllocator};
use crate::error::BridgeError;
use crate::pump::{self, Progress, PumpError, Side};

/// Makes a writer look like a file the subprocess can open for output.
///
/// Everything the peer writes lands in the sink, in order. When the peer
/// closes, the sink is flushed and shut down.
pub struct OutputBridge {
    core: BridgeCore,
}

impl OutputBridge {
    /// Bind a fresh endpoint. Listening starts before this returns.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn bind(
        allocator: &EndpointAllocator,
        options: BridgeOptions,
    ) -> Result<Self, BridgeError> {
        BridgeCore::bind(allocator, options, Direction::Output).map(|core| Self { core })
    }

    pub const fn endpoint(&self) -> &Endpoint {
        self.core.endpoint()
    }

    pub fn url(&self) -> String {
        self.core.endpoint().url()
    }

    pub fn watch_state(&self) -> watch::Receiver<BridgeState> {
        self.core.watch_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.core.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.core.cancel.clone()
    }

    /// Accept one connection and copy it into `sink`.
    pub async fn serve<W>(self, sink: &mut W) -> Result<TransferReport, BridgeError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let core = self.core;
        let started = Instant::now();

        let outcome = match core.accept_first().await {
            Ok((mut conn, _peer)) => {
                let buffer_size = core.options.buffer_size;
                let progress = Progress::default();
                let pump = async {
                    pump::forward(&mut conn, sink, buffer_size, &progress, |bytes| {
                        debug!(bytes, "Peer finished writing, ending sink");
                        core.set_state(BridgeState::Draining);
                    })
                    .await
                    .map_err(classify)
                };
                core.drive(pump).await
            }
            Err(e) => (Err(e), 0),
        };

        core.finish(outcome, started)
    }

    /// Move `sink` onto a task and serve it there.
    pub fn spawn<W>(self, mut sink: W) -> BridgeHandle<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let parts = HandleParts::of(&self.core);
        let task = tokio::spawn(async move {
            let report = self.serve(&mut sink).await?;
            Ok::<_, BridgeError>(Finished { stream: sink, report })
        });
        parts.attach(task)
    }
}

fn classify(e: PumpError) -> BridgeError {
    match e.side {
        Side::Read => BridgeError::PeerDisconnected {
            transferred: e.transferred,
            source: e.source,
        },
        Side::Write => BridgeError::SinkWrite {
            transferred: e.transferred,
            source: e.source,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::AsyncWriteExt;

    use ffbridge_core::Transport;

    use crate::error::BridgeErrorKind;

    /// Sink whose consumer has gone away.
    struct BrokenSink;

    impl AsyncWrite for BrokenSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::other("downstream consumer failed")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn read_side_failure_is_peer_disconnect() {
        let err = classify(PumpError {
            side: Side::Read,
            transferred: 3,
            source: io::ErrorKind::ConnectionReset.into(),
        });
        assert_eq!(err.kind(), BridgeErrorKind::PeerDisconnectedPrematurely);
    }

    #[tokio::test]
    async fn sink_failure_fails_bridge() {
        let allocator = EndpointAllocator::new(Transport::Tcp, std::env::temp_dir());
        let bridge = OutputBridge::bind(&allocator, BridgeOptions::default()).unwrap();
        let endpoint = bridge.endpoint().clone();
        let state = bridge.watch_state();

        let peer = tokio::spawn(async move {
            let mut conn = endpoint.connect().await.unwrap();
            // The bridge may close before every byte is accepted.
            let _ = conn.write_all(b"some media bytes").await;
        });

        let err = bridge.serve(&mut BrokenSink).await.unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::SinkWriteError);
        assert!(matches!(*state.borrow(), BridgeState::Failed { .. }));
        peer.await.unwrap();
    }
}
