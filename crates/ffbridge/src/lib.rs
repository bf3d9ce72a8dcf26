//! ffbridge
//!
//! Lets a media subprocess read from and write to in-process async streams
//! by way of local IPC endpoints:
//! - Endpoint allocation over unix sockets or TCP loopback
//! - One-shot input and output bridges with backpressure
//! - Lifecycle state and event reporting per bridge

pub mod bridge;
pub mod endpoint;
pub mod error;
pub mod factory;
mod pump;

pub use bridge::{
    BridgeEvent, BridgeHandle, BridgeOptions, BridgeState, Finished, InputBridge, OutputBridge,
    TransferReport,
};
pub use endpoint::{Endpoint, EndpointAllocator};
pub use error::{BridgeError, BridgeErrorKind};
pub use factory::BridgeFactory;
pub use ffbridge_core::Transport;
