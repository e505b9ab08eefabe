//! Stdio tool-provider runtime for toolwire.
//!
//! Launches provider processes from a [`ServerRegistry`], speaks
//! line-delimited JSON-RPC with them, caches their tool lists and exposes the
//! whole thing through [`McpService`] (which implements
//! [`toolwire_core::ToolHostPort`]).
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Used by the stub provider binary only.
use anyhow as _;
use tracing_subscriber as _;

pub(crate) mod catalog;
pub mod config;
pub(crate) mod correlator;
pub(crate) mod instance;
pub(crate) mod path;
pub(crate) mod process;
pub mod protocol;
pub mod service;
pub(crate) mod supervisor;

pub use config::{ConfigLoader, EnvProvider, LoadedConfig, ServerRegistry, SystemEnv};
pub use service::McpService;

// Re-export domain types from core for convenience
pub use toolwire_core::{
    DiscoveryStatus, McpClientSettings, McpError, McpErrorCategory, McpErrorInfo, McpResult,
    RawArgumentWrapping, ServerSpec, ServerState, ToolArguments, ToolDescriptor, ToolHostPort,
};
