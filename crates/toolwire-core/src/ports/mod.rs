//! Port definitions (trait abstractions) consumed by collaborators.
//!
//! Ports define the interfaces the embedding application expects from the
//! tool-host runtime. They use only domain types.
//!
//! # Design Rules
//!
//! - No process or pipe types in any signature
//! - Errors are expressed with the shared `McpError` taxonomy

pub mod mcp_error;
pub mod tool_host;

pub use mcp_error::{McpError, McpErrorCategory, McpErrorInfo, McpResult};
pub use tool_host::{ToolHostPort, tool_inventory};
