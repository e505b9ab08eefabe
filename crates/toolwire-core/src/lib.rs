//! Core domain types and port definitions for toolwire.
//!
//! This crate has no process, filesystem or async-runtime dependencies. It
//! describes what a tool-provider server *is* (`ServerSpec`), what it exposes
//! (`ToolDescriptor`), how its runtime state evolves (`ServerState`), the error
//! taxonomy shared by every adapter (`McpError`), and the narrow port that
//! collaborators consume (`ToolHostPort`).
#![deny(unused_crate_dependencies)]

pub mod domain;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{DiscoveryStatus, ServerSpec, ServerState, ToolArguments, ToolDescriptor};
pub use ports::{McpError, McpErrorCategory, McpErrorInfo, McpResult, ToolHostPort, tool_inventory};
pub use settings::{
    DEFAULT_CALL_METHOD, DEFAULT_DISCOVERY_METHOD, McpClientSettings, RawArgumentWrapping,
};
