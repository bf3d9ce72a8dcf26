//! `ffbridge` Core Library
//!
//! Shared functionality for `ffbridge` components:
//! - Configuration resolution and hierarchy
//! - Transport selection for bridge endpoints
//! - Tracing/logging initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{BridgeSettings, Config, LoggingSettings, Transport};
pub use error::{Error, Result};
