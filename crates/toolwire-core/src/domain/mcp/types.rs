//! MCP server domain types.
//!
//! These types are shared between the runtime crate and any embedding
//! front end (HTTP/chat adapters, CLIs).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::settings::RawArgumentWrapping;

/// Launch specification for one tool-provider server.
///
/// Produced by the configuration resolver and never mutated afterwards; the
/// runtime shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Unique server name (registry key).
    pub name: String,

    /// Executable to launch (absolute path or a name resolved via `PATH`).
    pub command: String,

    /// Ordered argument list.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides applied on top of the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Optional module-search-path (e.g. a `node_modules` directory). Its
    /// `.bin` subdirectory is prepended to the child's `PATH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_search_path: Option<String>,

    /// Tool names declared in configuration. Used to seed the catalog until
    /// discovery succeeds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_tools: Vec<String>,
}

impl ServerSpec {
    /// Create a spec with no arguments or environment overrides.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            module_search_path: None,
            declared_tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_module_search_path(mut self, path: impl Into<String>) -> Self {
        self.module_search_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_declared_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the spec shape.
    ///
    /// Runs at resolve time so that configuration mistakes surface before any
    /// process is launched.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Server name cannot be empty".to_string());
        }

        if self.command.trim().is_empty() {
            return Err(format!("Server '{}' has an empty command", self.name));
        }

        if self.command != self.command.trim() {
            return Err(format!(
                "Server '{}' command has surrounding whitespace; put flags in 'args'",
                self.name
            ));
        }

        if let Some(key) = self
            .env
            .keys()
            .find(|k| k.is_empty() || k.contains('=') || k.contains('\0'))
        {
            return Err(format!(
                "Server '{}' has an invalid environment variable name: {key:?}",
                self.name
            ));
        }

        if matches!(self.module_search_path.as_deref(), Some(p) if p.trim().is_empty()) {
            return Err(format!(
                "Server '{}' has an empty module search path",
                self.name
            ));
        }

        if self.declared_tools.iter().any(|t| t.trim().is_empty()) {
            return Err(format!(
                "Server '{}' declares a tool with an empty name",
                self.name
            ));
        }

        Ok(())
    }
}

/// A tool exposed by a provider, as reported by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its server.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Input schema payload, passed through untouched.
    #[serde(
        default,
        rename = "inputSchema",
        alias = "input_schema",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<Value>,

    /// Name of the server that exposes this tool.
    #[serde(default)]
    pub server: String,
}

impl ToolDescriptor {
    /// Create a descriptor with only a name.
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
            server: server.into(),
        }
    }
}

/// Arguments for a tool invocation.
///
/// Callers may pass either a structured mapping or a raw string; the raw form
/// is wrapped according to the configured `RawArgumentWrapping` before it is
/// sent, so callers never need to know the provider's exact argument shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolArguments {
    Structured(Map<String, Value>),
    Raw(String),
}

impl ToolArguments {
    /// Empty structured arguments.
    pub fn empty() -> Self {
        Self::Structured(Map::new())
    }

    /// Interpret an arbitrary JSON value as tool arguments.
    ///
    /// Objects are structured, `null` is empty, strings are raw, and any other
    /// scalar or array is passed as its JSON text in raw form.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Structured(map),
            Value::Null => Self::empty(),
            Value::String(s) => Self::Raw(s),
            other => Self::Raw(other.to_string()),
        }
    }

    /// Encode for the wire using the configured raw-string convention.
    pub fn into_wire(self, wrapping: &RawArgumentWrapping) -> Value {
        match self {
            Self::Structured(map) => Value::Object(map),
            Self::Raw(raw) => match wrapping {
                RawArgumentWrapping::Positional => Value::Array(vec![Value::String(raw)]),
                RawArgumentWrapping::Keyed(key) => {
                    let mut map = Map::new();
                    map.insert(key.clone(), Value::String(raw));
                    Value::Object(map)
                }
            },
        }
    }
}

impl Default for ToolArguments {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Map<String, Value>> for ToolArguments {
    fn from(map: Map<String, Value>) -> Self {
        Self::Structured(map)
    }
}

impl From<Value> for ToolArguments {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl From<String> for ToolArguments {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

impl From<&str> for ToolArguments {
    fn from(raw: &str) -> Self {
        Self::Raw(raw.to_string())
    }
}

/// Runtime state of a server instance.
///
/// Instances move through `Starting → Running → (Stopping | Crashed) →
/// Terminated`. `Stopped` is reported for servers with no instance at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// No instance exists.
    #[default]
    Stopped,
    /// Process spawned, not yet confirmed alive.
    Starting,
    /// Process alive and accepting requests.
    Running,
    /// Graceful termination in progress.
    Stopping,
    /// Process exited unexpectedly.
    Crashed,
    /// Process reaped and readers joined.
    Terminated,
}

impl ServerState {
    /// Whether the instance can accept requests.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Running | Self::Stopping | Self::Crashed)
                | (Self::Running, Self::Stopping | Self::Crashed)
                | (Self::Stopping | Self::Crashed, Self::Terminated)
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
            Self::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// Outcome of tool discovery for a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiscoveryStatus {
    /// Server not running, or discovery not attempted yet.
    #[default]
    Undiscovered,
    /// Only tools declared in configuration are known.
    Declared { tool_count: usize },
    /// Discovery round-trip succeeded.
    Discovered { tool_count: usize },
    /// The most recent discovery attempt failed; any previous list is kept.
    Failed { reason: String },
}

impl DiscoveryStatus {
    pub const fn is_discovered(&self) -> bool {
        matches!(self, Self::Discovered { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_validate_accepts_minimal() {
        let spec = ServerSpec::new("echo-srv", "/usr/bin/echo-mcp");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_spec_validate_rejects_empty_command() {
        let spec = ServerSpec::new("echo-srv", "  ");
        let err = spec.validate().unwrap_err();
        assert!(err.contains("empty command"));
    }

    #[test]
    fn test_spec_validate_rejects_command_with_flags() {
        let spec = ServerSpec::new("echo-srv", "npx ");
        assert!(spec.validate().unwrap_err().contains("args"));
    }

    #[test]
    fn test_spec_validate_rejects_bad_env_key() {
        let spec = ServerSpec::new("srv", "node").with_env("A=B", "c");
        assert!(spec.validate().unwrap_err().contains("environment"));
    }

    #[test]
    fn test_spec_validate_rejects_blank_declared_tool() {
        let spec = ServerSpec::new("srv", "node").with_declared_tools(["ok", ""]);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_raw_arguments_positional_wrapping() {
        let wire = ToolArguments::from("hello").into_wire(&RawArgumentWrapping::Positional);
        assert_eq!(wire, json!(["hello"]));
    }

    #[test]
    fn test_raw_arguments_keyed_wrapping() {
        let wrapping = RawArgumentWrapping::Keyed("input".to_string());
        let wire = ToolArguments::from("hello".to_string()).into_wire(&wrapping);
        assert_eq!(wire, json!({"input": "hello"}));
    }

    #[test]
    fn test_structured_arguments_pass_through() {
        let args = ToolArguments::from(json!({"text": "hi"}));
        let wire = args.into_wire(&RawArgumentWrapping::Positional);
        assert_eq!(wire, json!({"text": "hi"}));
    }

    #[test]
    fn test_null_arguments_become_empty_object() {
        let wire = ToolArguments::from(Value::Null).into_wire(&RawArgumentWrapping::Positional);
        assert_eq!(wire, json!({}));
    }

    #[test]
    fn test_state_machine_transitions() {
        use ServerState::*;
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Crashed));
        assert!(Running.can_transition_to(Stopping));
        assert!(Crashed.can_transition_to(Terminated));
        assert!(Stopping.can_transition_to(Terminated));

        assert!(!Terminated.can_transition_to(Running));
        assert!(!Crashed.can_transition_to(Running));
        assert!(!Stopping.can_transition_to(Crashed));
        assert!(!Running.can_transition_to(Starting));
    }

    #[test]
    fn test_only_starting_and_running_are_live() {
        assert!(ServerState::Starting.is_live());
        assert!(ServerState::Running.is_live());
        assert!(!ServerState::Crashed.is_live());
        assert!(!ServerState::Stopped.is_live());
    }

    #[test]
    fn test_tool_descriptor_accepts_both_schema_spellings() {
        let camel: ToolDescriptor =
            serde_json::from_value(json!({"name": "a", "inputSchema": {"type": "object"}}))
                .unwrap();
        let snake: ToolDescriptor =
            serde_json::from_value(json!({"name": "a", "input_schema": {"type": "object"}}))
                .unwrap();
        assert_eq!(camel.input_schema, snake.input_schema);
        assert!(camel.input_schema.is_some());
    }

    #[test]
    fn test_discovery_status_serialization() {
        let status = DiscoveryStatus::Discovered { tool_count: 2 };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json, json!({"status": "discovered", "tool_count": 2}));
    }
}
