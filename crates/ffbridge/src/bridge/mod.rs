//! Socket-to-stream bridges.
//!
//! A bridge binds a local endpoint, accepts exactly one connection and pumps
//! bytes between it and a caller-supplied stream. [`InputBridge`] feeds a
//! reader to the peer; [`OutputBridge`] drains the peer into a writer.
//!
//! Both can be driven in place (`serve(&mut stream)`) or moved onto a tokio
//! task (`spawn(stream)`), which yields a [`BridgeHandle`].

mod handle;
mod input;
mod output;

pub use handle::{BridgeHandle, Finished};
pub use input::InputBridge;
pub use output::OutputBridge;

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ffbridge_core::BridgeSettings;

use crate::endpoint::{BoundListener, Connection, Endpoint, EndpointAllocator};
use crate::error::{BridgeError, BridgeErrorKind};

/// Buffered events per bridge before slow subscribers start lagging.
const EVENT_CAPACITY: usize = 16;

/// Lifecycle of a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    /// Listening, no connection yet.
    Pending,
    /// Peer connected, pump running.
    Connected,
    /// Reading side exhausted, flushing and shutting down the writing side.
    Draining,
    /// Finished successfully or cancelled. Endpoint released.
    Closed,
    /// Finished with an error. Endpoint released.
    Failed { reason: String },
}

impl BridgeState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed { .. })
    }
}

/// Notifications published while a bridge runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Connected { peer: String },
    /// A connection arrived after the first one and was closed unserved.
    ConnectionRejected { peer: String },
    Finished(TransferReport),
    /// Cancelled by the caller. The bridge ends `Closed`, not `Failed`.
    Cancelled,
    Failed { kind: BridgeErrorKind, message: String },
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u64,
    pub rejected_connections: u32,
    pub elapsed: Duration,
}

/// Per-bridge tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    /// How long to wait for the first connection. `None` waits forever.
    pub connect_timeout: Option<Duration>,
    pub buffer_size: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::from_settings(&BridgeSettings::default())
    }
}

impl BridgeOptions {
    pub const fn from_settings(settings: &BridgeSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            buffer_size: settings.buffer_size,
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Listener, channels and cancellation shared by both bridge directions.
struct BridgeCore {
    listener: BoundListener,
    options: BridgeOptions,
    direction: Direction,
    state_tx: watch::Sender<BridgeState>,
    events_tx: broadcast::Sender<BridgeEvent>,
    cancel: CancellationToken,
}

type Outcome = (Result<u64, BridgeError>, u32);

impl BridgeCore {
    fn bind(
        allocator: &EndpointAllocator,
        options: BridgeOptions,
        direction: Direction,
    ) -> Result<Self, BridgeError> {
        let listener = allocator.bind()?;
        let (state_tx, _) = watch::channel(BridgeState::Pending);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            direction = direction.as_str(),
            endpoint = %listener.endpoint(),
            "Bridge listening"
        );

        Ok(Self {
            listener,
            options,
            direction,
            state_tx,
            events_tx,
            cancel: CancellationToken::new(),
        })
    }

    const fn endpoint(&self) -> &Endpoint {
        self.listener.endpoint()
    }

    fn watch_state(&self) -> watch::Receiver<BridgeState> {
        self.state_tx.subscribe()
    }

    fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events_tx.subscribe()
    }

    fn set_state(&self, state: BridgeState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: BridgeEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    /// Wait for the first connection, bounded by the connect timeout and
    /// the cancellation token.
    async fn accept_first(&self) -> Result<(Connection, String), BridgeError> {
        let accept = async { self.listener.accept().await.map_err(BridgeError::Accept) };
        let bounded = async {
            match self.options.connect_timeout {
                Some(limit) => match tokio::time::timeout(limit, accept).await {
                    Ok(res) => res,
                    Err(_) => Err(BridgeError::Timeout(limit)),
                },
                None => accept.await,
            }
        };

        let (conn, peer) = tokio::select! {
            () = self.cancel.cancelled() => return Err(BridgeError::Cancelled),
            res = bounded => res?,
        };

        info!(
            direction = self.direction.as_str(),
            endpoint = %self.endpoint(),
            %peer,
            "Bridge connected"
        );
        self.set_state(BridgeState::Connected);
        self.emit(BridgeEvent::Connected { peer: peer.clone() });
        Ok((conn, peer))
    }

    /// Run `pump` to completion while closing any further connections.
    async fn drive<F>(&self, pump: F) -> Outcome
    where
        F: Future<Output = Result<u64, BridgeError>>,
    {
        tokio::pin!(pump);
        let mut rejected: u32 = 0;
        let mut listening = true;

        let result = loop {
            tokio::select! {
                res = &mut pump => break res,
                () = self.cancel.cancelled() => break Err(BridgeError::Cancelled),
                incoming = self.listener.accept(), if listening => match incoming {
                    Ok((conn, peer)) => {
                        drop(conn);
                        rejected += 1;
                        warn!(
                            endpoint = %self.endpoint(),
                            %peer,
                            "Rejected extra connection"
                        );
                        self.emit(BridgeEvent::ConnectionRejected { peer });
                    }
                    Err(e) => {
                        debug!(error = %e, "Accept failed while serving, no longer rejecting");
                        listening = false;
                    }
                },
            }
        };
        (result, rejected)
    }

    /// Release the endpoint, then publish the terminal state.
    fn finish(
        self,
        (result, rejected): Outcome,
        started: Instant,
    ) -> Result<TransferReport, BridgeError> {
        let Self {
            listener,
            direction,
            state_tx,
            events_tx,
            ..
        } = self;
        let endpoint = listener.endpoint().url();
        drop(listener);

        let (state, event, result) = match result {
            Ok(bytes) => {
                let report = TransferReport {
                    bytes,
                    rejected_connections: rejected,
                    elapsed: started.elapsed(),
                };
                info!(
                    direction = direction.as_str(),
                    %endpoint,
                    bytes,
                    rejected,
                    elapsed_ms = report.elapsed.as_millis(),
                    "Bridge closed"
                );
                (BridgeState::Closed, BridgeEvent::Finished(report), Ok(report))
            }
            Err(BridgeError::Cancelled) => {
                info!(direction = direction.as_str(), %endpoint, "Bridge cancelled");
                (
                    BridgeState::Closed,
                    BridgeEvent::Cancelled,
                    Err(BridgeError::Cancelled),
                )
            }
            Err(e) => {
                warn!(direction = direction.as_str(), %endpoint, error = %e, "Bridge failed");
                let state = BridgeState::Failed {
                    reason: e.to_string(),
                };
                let event = BridgeEvent::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                };
                (state, event, Err(e))
            }
        };

        state_tx.send_replace(state);
        let _ = events_tx.send(event);
        result
    }
}
