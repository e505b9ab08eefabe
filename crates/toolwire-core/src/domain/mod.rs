//! Domain types for tool-provider servers.

pub mod mcp;

pub use mcp::{DiscoveryStatus, ServerSpec, ServerState, ToolArguments, ToolDescriptor};
