//! Handle to a bridge running on its own task.

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{BridgeCore, BridgeEvent, BridgeState, TransferReport};
use crate::endpoint::Endpoint;
use crate::error::BridgeError;

/// A completed transfer: the caller's stream, handed back, plus the report.
#[derive(Debug)]
pub struct Finished<S> {
    pub stream: S,
    pub report: TransferReport,
}

/// Handle to a spawned bridge.
///
/// Dropping the handle detaches the task; the connect timeout still bounds
/// how long an unconnected bridge holds its endpoint.
#[derive(Debug)]
pub struct BridgeHandle<S> {
    endpoint: Endpoint,
    state: watch::Receiver<BridgeState>,
    events: broadcast::Sender<BridgeEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<Finished<S>, BridgeError>>,
}

/// What a handle shares with a bridge, captured before the bridge moves
/// onto its task.
pub(super) struct HandleParts {
    endpoint: Endpoint,
    state: watch::Receiver<BridgeState>,
    events: broadcast::Sender<BridgeEvent>,
    cancel: CancellationToken,
}

impl HandleParts {
    pub(super) fn of(core: &BridgeCore) -> Self {
        Self {
            endpoint: core.endpoint().clone(),
            state: core.watch_state(),
            events: core.events_tx.clone(),
            cancel: core.cancel.clone(),
        }
    }

    pub(super) fn attach<S>(
        self,
        task: JoinHandle<Result<Finished<S>, BridgeError>>,
    ) -> BridgeHandle<S> {
        BridgeHandle {
            endpoint: self.endpoint,
            state: self.state,
            events: self.events,
            cancel: self.cancel,
            task,
        }
    }
}

impl<S> BridgeHandle<S> {
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Address to pass to the subprocess in place of a file path.
    pub fn url(&self) -> String {
        self.endpoint.url()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<BridgeState> {
        self.state.clone()
    }

    /// Events published from now on.
    ///
    /// The task is already running, so events sent before this call (an
    /// early `Connected`, say) are not replayed. Use [`Self::watch_state`]
    /// for anything that must not be missed, or subscribe on the unspawned
    /// bridge (`BridgeFactory::input_bridge`) before calling `spawn`.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Stop listening and abandon any in-flight transfer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this bridge, for use after the handle is consumed.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the bridge to reach a terminal state.
    ///
    /// On error the stream has already been dropped by the task.
    pub async fn finish(self) -> Result<Finished<S>, BridgeError> {
        self.task.await?
    }
}
