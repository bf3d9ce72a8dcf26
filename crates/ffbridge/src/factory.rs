//! Entry point for creating bridges.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use ffbridge_core::Config;

use crate::bridge::{BridgeHandle, BridgeOptions, InputBridge, OutputBridge};
use crate::endpoint::EndpointAllocator;
use crate::error::BridgeError;

/// Hands out bridges sharing one endpoint allocator.
///
/// Cheap to clone; clones draw from the same name sequence, so every
/// bridge they create gets a distinct endpoint.
#[derive(Debug, Clone)]
pub struct BridgeFactory {
    allocator: Arc<EndpointAllocator>,
    options: BridgeOptions,
}

impl Default for BridgeFactory {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl BridgeFactory {
    pub fn new(allocator: EndpointAllocator, options: BridgeOptions) -> Self {
        Self {
            allocator: Arc::new(allocator),
            options,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            EndpointAllocator::from_settings(&config.bridge),
            BridgeOptions::from_settings(&config.bridge),
        )
    }

    pub fn allocator(&self) -> &EndpointAllocator {
        &self.allocator
    }

    pub const fn options(&self) -> BridgeOptions {
        self.options
    }

    /// Same factory, different per-bridge options.
    #[must_use]
    pub fn with_options(&self, options: BridgeOptions) -> Self {
        Self {
            allocator: Arc::clone(&self.allocator),
            options,
        }
    }

    /// Bind an input bridge without starting it.
    pub fn input_bridge(&self) -> Result<InputBridge, BridgeError> {
        InputBridge::bind(&self.allocator, self.options)
    }

    /// Bind an output bridge without starting it.
    pub fn output_bridge(&self) -> Result<OutputBridge, BridgeError> {
        OutputBridge::bind(&self.allocator, self.options)
    }

    /// Expose `source` as an input URL and serve it on a background task.
    ///
    /// The endpoint is listening when this returns, so the URL can be handed
    /// to a subprocess straight away.
    pub fn input<R>(&self, source: R) -> Result<BridgeHandle<R>, BridgeError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Ok(self.input_bridge()?.spawn(source))
    }

    /// Expose `sink` as an output URL and serve it on a background task.
    pub fn output<W>(&self, sink: W) -> Result<BridgeHandle<W>, BridgeError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Ok(self.output_bridge()?.spawn(sink))
    }
}
