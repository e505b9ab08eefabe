//! High-level MCP service for managing tool-provider servers.
//!
//! This is the surface collaborators use: lifecycle control plus tool
//! invocation. It also implements [`ToolHostPort`] so front ends can depend on
//! the port instead of this crate.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use toolwire_core::{
    DiscoveryStatus, McpClientSettings, McpError, McpResult, ServerSpec, ServerState,
    ToolArguments, ToolDescriptor, ToolHostPort,
};

use crate::config::{ConfigLoader, LoadedConfig, ServerRegistry};
use crate::supervisor::McpSupervisor;

/// MCP service providing unified access to server management and tool calls.
///
/// Cheap to clone; clones share the same running servers.
#[derive(Clone)]
pub struct McpService {
    supervisor: Arc<McpSupervisor>,
}

impl McpService {
    /// Create a service over a resolved registry.
    pub fn new(registry: ServerRegistry, settings: McpClientSettings) -> McpResult<Self> {
        settings.validate()?;
        Ok(Self {
            supervisor: Arc::new(McpSupervisor::new(registry, settings)),
        })
    }

    pub fn from_config(config: LoadedConfig) -> McpResult<Self> {
        Self::new(config.registry, config.settings)
    }

    /// Load from `MCP_*` variables, the default config files and an optional
    /// explicit file.
    pub fn from_environment(config_file: Option<&Path>) -> McpResult<Self> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = config_file {
            loader = loader.with_explicit_file(path);
        }
        Self::from_config(loader.load()?)
    }

    pub fn settings(&self) -> &McpClientSettings {
        self.supervisor.settings()
    }

    // =========================================================================
    // Server lifecycle
    // =========================================================================

    /// Names from configuration, independent of run state.
    pub fn list_configured_servers(&self) -> Vec<String> {
        self.supervisor.registry().names()
    }

    pub async fn list_running_servers(&self) -> Vec<String> {
        self.supervisor.list_running().await
    }

    /// Start a server and run tool discovery. No-op if already running.
    pub async fn start_server(&self, name: &str) -> McpResult<()> {
        self.supervisor.start(name).await.map(|_| ())
    }

    /// Stop a server. Succeeds if it was not running.
    pub async fn stop_server(&self, name: &str) -> McpResult<()> {
        self.supervisor.stop(name).await
    }

    /// Start every configured server.
    pub async fn start_all(&self) -> BTreeMap<String, McpResult<()>> {
        let mut outcomes = BTreeMap::new();
        for name in self.list_configured_servers() {
            let outcome = self.start_server(&name).await;
            if let Err(e) = &outcome {
                tracing::warn!(server = %name, error = %e, "Failed to start MCP server");
            }
            outcomes.insert(name, outcome);
        }
        outcomes
    }

    /// Stop every running server. Unlike [`Self::shutdown_all`], servers can be
    /// started again afterwards.
    pub async fn stop_all(&self) -> BTreeMap<String, McpResult<()>> {
        self.supervisor.stop_all().await
    }

    /// Stop everything and refuse further starts. Safe to call repeatedly.
    pub async fn shutdown_all(&self) {
        self.supervisor.shutdown_all().await;
    }

    pub fn server_config(&self, name: &str) -> Option<ServerSpec> {
        self.supervisor.registry().get(name).cloned()
    }

    pub async fn server_status(&self, name: &str) -> ServerState {
        self.supervisor.status(name).await
    }

    /// Process id of the live instance, if any.
    pub async fn server_pid(&self, name: &str) -> Option<u32> {
        self.supervisor
            .live_instance(name)
            .await
            .and_then(|instance| instance.pid())
    }

    /// Requests still waiting for a response on `name`.
    pub async fn outstanding_requests(&self, name: &str) -> usize {
        self.supervisor
            .live_instance(name)
            .await
            .map_or(0, |instance| instance.outstanding())
    }

    // =========================================================================
    // Tools
    // =========================================================================

    /// Last discovered tools for a running server (empty otherwise).
    pub async fn list_tools(&self, name: &str) -> Vec<ToolDescriptor> {
        self.supervisor.list_tools(name).await
    }

    /// Distinguishes "no tools discovered yet" from an empty tool list.
    pub async fn discovery_status(&self, name: &str) -> DiscoveryStatus {
        self.supervisor.discovery_status(name).await
    }

    /// Re-run discovery on every running server.
    ///
    /// Returns the discovered tool names per server; a failed server maps to
    /// an empty list and keeps its previous catalog.
    pub async fn refresh_tools(&self) -> BTreeMap<String, Vec<String>> {
        let mut refreshed = BTreeMap::new();
        for name in self.list_running_servers().await {
            let Some(instance) = self.supervisor.live_instance(&name).await else {
                continue;
            };
            let names = match self.supervisor.discover(&instance).await {
                Ok(tools) => tools.into_iter().map(|tool| tool.name).collect(),
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "Tool refresh failed");
                    Vec::new()
                }
            };
            refreshed.insert(name, names);
        }
        refreshed
    }

    /// Invoke `tool` on `server` with the default request timeout.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: impl Into<ToolArguments> + Send,
    ) -> McpResult<Value> {
        self.call_tool_with_timeout(server, tool, arguments, None)
            .await
    }

    /// Invoke `tool` on `server`, starting the server on demand.
    ///
    /// The provider's result payload is returned unchanged.
    pub async fn call_tool_with_timeout(
        &self,
        server: &str,
        tool: &str,
        arguments: impl Into<ToolArguments> + Send,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        let instance = self.supervisor.ensure_running(server).await?;

        if tool.trim().is_empty() {
            return Err(McpError::InvalidArgument(
                "tool name cannot be empty".to_string(),
            ));
        }

        let settings = self.settings();
        let params = json!({
            "name": tool,
            "arguments": arguments.into().into_wire(&settings.raw_argument_wrapping),
        });
        let wait = timeout.unwrap_or_else(|| settings.request_timeout());

        tracing::debug!(server = %server, tool = %tool, "Calling MCP tool");
        instance
            .request(&settings.call_method, params, wait, Some(tool))
            .await
    }
}

#[async_trait]
impl ToolHostPort for McpService {
    fn list_configured_servers(&self) -> Vec<String> {
        Self::list_configured_servers(self)
    }

    async fn list_running_servers(&self) -> Vec<String> {
        Self::list_running_servers(self).await
    }

    async fn start_server(&self, name: &str) -> McpResult<()> {
        Self::start_server(self, name).await
    }

    async fn stop_server(&self, name: &str) -> McpResult<()> {
        Self::stop_server(self, name).await
    }

    async fn list_tools(&self, name: &str) -> Vec<ToolDescriptor> {
        Self::list_tools(self, name).await
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: ToolArguments,
    ) -> McpResult<Value> {
        Self::call_tool(self, server, tool, arguments).await
    }

    async fn shutdown_all(&self) {
        Self::shutdown_all(self).await;
    }
}
