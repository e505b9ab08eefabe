//! Client settings and validation.
//!
//! Pure configuration types with serde defaults; every field may be omitted
//! from a configuration file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ports::McpError;

/// Default reserved method used for tool discovery.
pub const DEFAULT_DISCOVERY_METHOD: &str = "list_tools";

/// Default method used for tool invocation.
pub const DEFAULT_CALL_METHOD: &str = "call_tool";

/// How a raw string argument is wrapped before it is sent to a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawArgumentWrapping {
    /// `"text"` becomes `["text"]`.
    #[default]
    Positional,
    /// `"text"` becomes `{"<key>": "text"}`.
    Keyed(String),
}

/// Runtime settings for the MCP client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpClientSettings {
    /// Default timeout for an RPC call, in milliseconds.
    pub request_timeout_ms: u64,

    /// Timeout for the discovery round-trip performed at start.
    pub discovery_timeout_ms: u64,

    /// Grace period between the termination signal and a forced kill.
    pub stop_grace_period_ms: u64,

    /// Overall bound for `shutdown_all` across every server.
    pub shutdown_deadline_ms: u64,

    /// Reserved method name for tool discovery.
    pub discovery_method: String,

    /// Method name for tool invocation.
    pub call_method: String,

    /// Raw-string argument convention.
    pub raw_argument_wrapping: RawArgumentWrapping,

    /// Consecutive unparsable stdout lines after which an instance is treated
    /// as crashed. Zero disables escalation.
    pub max_consecutive_protocol_errors: u32,
}

impl Default for McpClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            discovery_timeout_ms: 3_000,
            stop_grace_period_ms: 5_000,
            shutdown_deadline_ms: 10_000,
            discovery_method: DEFAULT_DISCOVERY_METHOD.to_string(),
            call_method: DEFAULT_CALL_METHOD.to_string(),
            raw_argument_wrapping: RawArgumentWrapping::default(),
            max_consecutive_protocol_errors: 0,
        }
    }
}

impl McpClientSettings {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub const fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }

    pub const fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }

    /// Validate settings, reporting the first problem as a configuration error.
    pub fn validate(&self) -> Result<(), McpError> {
        let timeouts = [
            ("request_timeout_ms", self.request_timeout_ms),
            ("discovery_timeout_ms", self.discovery_timeout_ms),
            ("stop_grace_period_ms", self.stop_grace_period_ms),
            ("shutdown_deadline_ms", self.shutdown_deadline_ms),
        ];
        if let Some((field, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(McpError::Configuration(format!(
                "{field} must be greater than zero"
            )));
        }

        if self.discovery_method.trim().is_empty() {
            return Err(McpError::Configuration(
                "discovery_method cannot be empty".to_string(),
            ));
        }
        if self.call_method.trim().is_empty() {
            return Err(McpError::Configuration(
                "call_method cannot be empty".to_string(),
            ));
        }
        if matches!(&self.raw_argument_wrapping, RawArgumentWrapping::Keyed(key) if key.is_empty())
        {
            return Err(McpError::Configuration(
                "raw_argument_wrapping key cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
