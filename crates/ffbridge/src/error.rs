//! Bridge error types.

use std::time::Duration;

/// Coarse classification of a [`BridgeError`], cheap to copy into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeErrorKind {
    EndpointAllocationFailed,
    ConnectionRejected,
    SourceReadError,
    SinkWriteError,
    PeerDisconnectedPrematurely,
    Timeout,
    Cancelled,
    Accept,
    Task,
}

/// Errors from bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to allocate endpoint: {reason}")]
    EndpointAllocation { reason: String },

    #[error("Bridge already served its connection")]
    ConnectionRejected,

    #[error("Failed to read from source after {transferred} bytes: {source}")]
    SourceRead {
        transferred: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to sink after {transferred} bytes: {source}")]
    SinkWrite {
        transferred: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Peer disconnected after {transferred} bytes: {source}")]
    PeerDisconnected {
        transferred: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("No connection within {0:?}")]
    Timeout(Duration),

    #[error("Bridge cancelled")]
    Cancelled,

    #[error("Failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("Bridge task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl BridgeError {
    pub const fn kind(&self) -> BridgeErrorKind {
        match self {
            Self::EndpointAllocation { .. } => BridgeErrorKind::EndpointAllocationFailed,
            Self::ConnectionRejected => BridgeErrorKind::ConnectionRejected,
            Self::SourceRead { .. } => BridgeErrorKind::SourceReadError,
            Self::SinkWrite { .. } => BridgeErrorKind::SinkWriteError,
            Self::PeerDisconnected { .. } => BridgeErrorKind::PeerDisconnectedPrematurely,
            Self::Timeout(_) => BridgeErrorKind::Timeout,
            Self::Cancelled => BridgeErrorKind::Cancelled,
            Self::Accept(_) => BridgeErrorKind::Accept,
            Self::Task(_) => BridgeErrorKind::Task,
        }
    }

    /// Bytes delivered before the failure, when the pump had started.
    pub const fn transferred(&self) -> Option<u64> {
        match self {
            Self::SourceRead { transferred, .. }
            | Self::SinkWrite { transferred, .. }
            | Self::PeerDisconnected { transferred, .. } => Some(*transferred),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_transferred() {
        let err = BridgeError::PeerDisconnected {
            transferred: 12,
            source: std::io::ErrorKind::BrokenPipe.into(),
        };
        assert_eq!(err.kind(), BridgeErrorKind::PeerDisconnectedPrematurely);
        assert_eq!(err.transferred(), Some(12));

        let err = BridgeError::Timeout(Duration::from_millis(50));
        assert_eq!(err.kind(), BridgeErrorKind::Timeout);
        assert!(err.transferred().is_none());
    }
}
