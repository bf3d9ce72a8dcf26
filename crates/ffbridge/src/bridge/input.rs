//! Bridge that serves a readable stream to the connecting peer.

use std::time::Instant;

use tokio::io::AsyncRead;
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

/// Makes a reader look like a file the subprocess can open for input.
///
/// The peer reads the source until EOF; the connection is then shut down
/// and the endpoint released.
pub struct InputBridge {
    core: BridgeCore,
}

impl InputBridge {
    /// Bind a fresh endpoint. Listening starts before this returns.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn bind(
        allocator: &EndpointAllocator,
        options: BridgeOptions,
    ) -> Result<Self, BridgeError> {
        BridgeCore::bind(allocator, options, Direction::Input).map(|core| Self { core })
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

    /// Subscribe before `serve` or `spawn` to see every event.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.core.subscribe()
    }

    /// Token that aborts the bridge when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.core.cancel.clone()
    }

    /// Accept one connection and copy `source` into it.
    pub async fn serve<R>(self, source: &mut R) -> Result<TransferReport, BridgeError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let core = self.core;
        let started = Instant::now();

        let outcome = match core.accept_first().await {
            Ok((mut conn, _peer)) => {
                let buffer_size = core.options.buffer_size;
                let progress = Progress::default();
                // The read half only exists to notice the peer leaving while
                // the source is idle.
                let (mut peer_rx, mut peer_tx) = tokio::io::split(&mut conn);
                let pump = async {
                    let forward =
                        pump::forward(source, &mut peer_tx, buffer_size, &progress, |bytes| {
                            debug!(bytes, "Source exhausted, closing connection");
                            core.set_state(BridgeState::Draining);
                        });
                    tokio::select! {
                        biased;
                        res = forward => res.map_err(classify),
                        e = pump::hangup(&mut peer_rx, &progress) => Err(classify(e)),
                    }
                };
                core.drive(pump).await
            }
            Err(e) => (Err(e), 0),
        };

        core.finish(outcome, started)
    }

    /// Move `source` onto a task and serve it there.
    pub fn spawn<R>(self, mut source: R) -> BridgeHandle<R>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let parts = HandleParts::of(&self.core);
        let task = tokio::spawn(async move {
            let report = self.serve(&mut source).await?;
            Ok::<_, BridgeError>(Finished {
                stream: source,
                report,
            })
        });
        parts.attach(task)
    }
}

fn classify(e: PumpError) -> BridgeError {
    match e.side {
        Side::Read => BridgeError::SourceRead {
            transferred: e.transferred,
            source: e.source,
        },
        Side::Write => BridgeError::PeerDisconnected {
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
    use tokio::io::{AsyncReadExt, ReadBuf};

    use ffbridge_core::Transport;

    use crate::error::BridgeErrorKind;

    /// Source that yields a prefix, then fails.
    struct FlakySource {
        prefix: Option<Vec<u8>>,
    }

    impl AsyncRead for FlakySource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.prefix.take() {
                Some(bytes) => {
                    buf.put_slice(&bytes);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::other("disk went away"))),
            }
        }
    }

    #[test]
    fn write_side_failure_is_peer_disconnect() {
        let err = classify(PumpError {
            side: Side::Write,
            transferred: 10,
            source: io::ErrorKind::BrokenPipe.into(),
        });
        assert_eq!(err.kind(), BridgeErrorKind::PeerDisconnectedPrematurely);
        assert_eq!(err.transferred(), Some(10));
    }

    #[tokio::test]
    async fn source_error_fails_bridge_and_closes_connection() {
        let allocator = EndpointAllocator::new(Transport::Tcp, std::env::temp_dir());
        let bridge = InputBridge::bind(&allocator, BridgeOptions::default()).unwrap();
        let endpoint = bridge.endpoint().clone();
        let mut events = bridge.subscribe();

        let peer = tokio::spawn(async move {
            let mut conn = endpoint.connect().await.unwrap();
            let mut got = Vec::new();
            // Either a clean EOF or a reset, but never more than the prefix.
            let _ = conn.read_to_end(&mut got).await;
            got
        });

        let mut source = FlakySource {
            prefix: Some(b"RIFF".to_vec()),
        };
        let err = bridge.serve(&mut source).await.unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::SourceReadError);
        assert_eq!(err.transferred(), Some(4));

        let got = peer.await.unwrap();
        assert!(got.len() <= 4);

        assert!(matches!(events.recv().await.unwrap(), BridgeEvent::Connected { .. }));
        match events.recv().await.unwrap() {
            BridgeEvent::Failed { kind, .. } => assert_eq!(kind, BridgeErrorKind::SourceReadError),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
