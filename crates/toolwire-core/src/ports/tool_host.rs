//! Tool-host port.
//!
//! The two narrow interfaces collaborators (chat front ends, CLIs) use:
//! server lifecycle control and tool invocation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use super::McpResult;
use crate::domain::{ToolArguments, ToolDescriptor};

/// Port for managing tool-provider servers and invoking their tools.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolHostPort: Send + Sync {
    /// Names from configuration, independent of run state.
    fn list_configured_servers(&self) -> Vec<String>;

    /// Names of servers with a live instance.
    async fn list_running_servers(&self) -> Vec<String>;

    /// Start a server. Succeeds without effect if it is already running.
    async fn start_server(&self, name: &str) -> McpResult<()>;

    /// Stop a server. Idempotent.
    async fn stop_server(&self, name: &str) -> McpResult<()>;

    /// Last successfully discovered tools for a server (possibly empty).
    async fn list_tools(&self, name: &str) -> Vec<ToolDescriptor>;

    /// Invoke a tool, starting its server on demand.
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: ToolArguments,
    ) -> McpResult<Value>;

    /// Stop every running server. Safe to call more than once.
    async fn shutdown_all(&self);
}

/// Collect the tools of every running server, keyed by server name.
pub async fn tool_inventory(host: &dyn ToolHostPort) -> BTreeMap<String, Vec<ToolDescriptor>> {
    let mut inventory = BTreeMap::new();
    for server in host.list_running_servers().await {
        let tools = host.list_tools(&server).await;
        inventory.insert(server, tools);
    }
    inventory
}
