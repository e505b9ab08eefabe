//! MCP server domain types.

mod types;

pub use types::{DiscoveryStatus, ServerSpec, ServerState, ToolArguments, ToolDescriptor};
