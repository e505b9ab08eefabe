//! MCP error types.
//!
//! One taxonomy is shared by the resolver, the supervisor and the facade so
//! callers always receive a distinguishable outcome that names the server
//! (and tool, where applicable) involved.

use serde_json::Value;
use thiserror::Error;

/// Result alias used throughout toolwire.
pub type McpResult<T> = Result<T, McpError>;

/// Errors surfaced by MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Malformed or conflicting server configuration.
    #[error("Invalid MCP configuration: {0}")]
    Configuration(String),

    /// The requested server name is not configured.
    #[error("MCP server not configured: {0}")]
    NotConfigured(String),

    /// A caller-supplied argument was rejected before anything was sent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The executable could not be launched.
    #[error("Failed to spawn MCP server '{server}': {reason}")]
    ProcessSpawn { server: String, reason: String },

    /// The server could not be brought up before a call.
    #[error("MCP server '{server}' is unavailable: {source}")]
    ServerUnavailable {
        server: String,
        source: Box<McpError>,
    },

    /// The process exited (or was stopped) while in use.
    #[error("MCP server '{server}' crashed: {reason}")]
    ServerCrashed { server: String, reason: String },

    /// No matching response arrived within the configured window.
    #[error("MCP request '{method}' to '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The provider returned an `error` object; code and message are verbatim.
    #[error("MCP tool '{tool}' on '{server}' failed [{code}]: {message}")]
    ToolInvocation {
        server: String,
        tool: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// A message could not be interpreted as the expected shape.
    #[error("MCP protocol error from '{server}': {reason}")]
    Protocol { server: String, reason: String },

    /// The client has been shut down and no longer starts servers.
    #[error("MCP client is shut down")]
    ShutDown,
}

impl McpError {
    /// Error category for UI handling.
    pub fn category(&self) -> McpErrorCategory {
        McpErrorCategory::from(self)
    }

    /// Server involved in this error, if any.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::ProcessSpawn { server, .. }
            | Self::ServerUnavailable { server, .. }
            | Self::ServerCrashed { server, .. }
            | Self::Timeout { server, .. }
            | Self::ToolInvocation { server, .. }
            | Self::Protocol { server, .. } => Some(server),
            Self::NotConfigured(name) => Some(name),
            Self::Configuration(_) | Self::InvalidArgument(_) | Self::ShutDown => None,
        }
    }

    /// Innermost cause, unwrapping `ServerUnavailable` layers.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::ServerUnavailable { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Wrap a start failure for a caller that needed the server running.
    pub fn unavailable(server: impl Into<String>, source: Self) -> Self {
        Self::ServerUnavailable {
            server: server.into(),
            source: Box::new(source),
        }
    }
}

/// Categories of MCP errors for UI handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpErrorCategory {
    /// Configuration or caller-argument error.
    Configuration,
    /// Server process lifecycle error.
    Process,
    /// Protocol communication error.
    Protocol,
    /// Tool invocation error reported by the provider.
    Tool,
    /// Request timed out.
    Timeout,
}

impl From<&McpError> for McpErrorCategory {
    fn from(error: &McpError) -> Self {
        match error {
            McpError::Configuration(_)
            | McpError::NotConfigured(_)
            | McpError::InvalidArgument(_) => Self::Configuration,
            McpError::ProcessSpawn { .. }
            | McpError::ServerUnavailable { .. }
            | McpError::ServerCrashed { .. }
            | McpError::ShutDown => Self::Process,
            McpError::Timeout { .. } => Self::Timeout,
            McpError::ToolInvocation { .. } => Self::Tool,
            McpError::Protocol { .. } => Self::Protocol,
        }
    }
}

/// User-safe error information for collaborators.
///
/// Carries no raw OS errors, only the rendered message and its category.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpErrorInfo {
    /// Name of the MCP server (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Provider error code, for tool errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    /// User-friendly error message.
    pub message: String,

    /// Error category for UI handling.
    pub category: McpErrorCategory,
}

impl From<&McpError> for McpErrorInfo {
    fn from(error: &McpError) -> Self {
        let code = match error.root_cause() {
            McpError::ToolInvocation { code, .. } => Some(*code),
            _ => None,
        };
        Self {
            server_name: error.server().map(ToString::to_string),
            code,
            message: error.to_string(),
            category: error.category(),
        }
    }
}
