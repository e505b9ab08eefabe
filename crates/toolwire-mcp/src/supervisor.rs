//! Process supervisor: the name → instance table and every lifecycle move.
//!
//! Key design decisions:
//! - **One live instance per name**: starts for the same name are serialised
//!   by a per-name lock; the instance map itself is only held briefly
//! - **Crash is lazy**: a crashed instance stays in the map until the next
//!   start or listing reaps it
//! - **Single shutdown**: `shutdown_all` runs once behind a `OnceCell` and is
//!   bounded by the configured deadline

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde_json::json;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinSet;
use tokio::time::timeout;
use toolwire_core::{
    DiscoveryStatus, McpClientSettings, McpError, McpResult, ServerState, ToolDescriptor,
};
use tracing::{debug, info, warn};

use crate::catalog::ToolCatalog;
use crate::config::ServerRegistry;
use crate::instance::ServerInstance;
use crate::protocol::parse_tool_list;

pub struct McpSupervisor {
    registry: ServerRegistry,
    settings: McpClientSettings,
    catalog: Arc<ToolCatalog>,
    instances: Mutex<HashMap<String, Arc<ServerInstance>>>,
    start_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    next_generation: AtomicU64,
    shutdown: OnceCell<()>,
    shut_down: AtomicBool,
}

impl McpSupervisor {
    pub fn new(registry: ServerRegistry, settings: McpClientSettings) -> Self {
        Self {
            registry,
            settings,
            catalog: Arc::new(ToolCatalog::new()),
            instances: Mutex::new(HashMap::new()),
            start_locks: StdMutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            shutdown: OnceCell::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub const fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub const fn settings(&self) -> &McpClientSettings {
        &self.settings
    }

    fn start_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.start_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    fn ensure_open(&self) -> McpResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(McpError::ShutDown);
        }
        Ok(())
    }

    /// Live instance for `name`, if any.
    pub async fn live_instance(&self, name: &str) -> Option<Arc<ServerInstance>> {
        self.instances
            .lock()
            .await
            .get(name)
            .filter(|instance| instance.is_live())
            .cloned()
    }

    /// Start `name`, or return its live instance.
    ///
    /// After spawning, one discovery round-trip runs before returning; its
    /// failure is logged and leaves the server running with an empty or
    /// declared catalog.
    pub async fn start(&self, name: &str) -> McpResult<Arc<ServerInstance>> {
        let spec = self.registry.resolve(name)?;
        self.ensure_open()?;

        let lock = self.start_lock(name);
        let _start_guard = lock.lock().await;

        if let Some(instance) = self.live_instance(name).await {
            debug!(server = %name, "MCP server already running");
            return Ok(instance);
        }
        self.reap(name).await;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        // Seed before the readers exist so a fast crash can invalidate it
        self.catalog.seed(name, generation, &spec.declared_tools);

        let instance = match ServerInstance::launch(
            Arc::clone(&spec),
            generation,
            Arc::clone(&self.catalog),
            &self.settings,
        ) {
            Ok(instance) => instance,
            Err(e) => {
                self.catalog.invalidate(name, generation);
                warn!(server = %name, error = %e, "Failed to start MCP server");
                return Err(e);
            }
        };

        {
            let mut instances = self.instances.lock().await;
            if self.shut_down.load(Ordering::SeqCst) {
                drop(instances);
                instance.teardown(self.settings.stop_grace_period()).await;
                return Err(McpError::ShutDown);
            }
            instances.insert(name.to_string(), Arc::clone(&instance));
        }
        instance.mark_running();

        info!(
            server = %name,
            pid = ?instance.pid(),
            generation,
            "MCP server started"
        );

        match self.discover(&instance).await {
            Ok(tools) => info!(server = %name, tool_count = tools.len(), "Discovered MCP tools"),
            Err(e) => warn!(server = %name, error = %e, "Tool discovery failed; server stays up"),
        }

        // Exited or stopped during discovery
        let state = instance.state();
        if !state.is_live() {
            let reason = if state == ServerState::Crashed {
                "process exited during startup"
            } else {
                "server stopped during startup"
            };
            return Err(McpError::ServerCrashed {
                server: name.to_string(),
                reason: reason.to_string(),
            });
        }

        Ok(instance)
    }

    /// Run the discovery request and record the outcome in the catalog.
    pub async fn discover(&self, instance: &ServerInstance) -> McpResult<Vec<ToolDescriptor>> {
        let name = instance.name();
        let outcome = instance
            .request(
                &self.settings.discovery_method,
                json!({}),
                self.settings.discovery_timeout(),
                None,
            )
            .await
            .and_then(|result| {
                parse_tool_list(name, result).map_err(|reason| McpError::Protocol {
                    server: name.to_string(),
                    reason,
                })
            });

        match outcome {
            Ok(tools) => {
                self.catalog
                    .record_discovery(name, instance.generation(), tools.clone());
                Ok(tools)
            }
            Err(e) => {
                self.catalog
                    .record_failure(name, instance.generation(), e.to_string());
                Err(e)
            }
        }
    }

    /// Stop `name` if it has an instance. Idempotent.
    pub async fn stop(&self, name: &str) -> McpResult<()> {
        let removed = self.instances.lock().await.remove(name);
        match removed {
            Some(instance) => {
                instance.teardown(self.settings.stop_grace_period()).await;
            }
            None => debug!(server = %name, "MCP server not running; nothing to stop"),
        }
        Ok(())
    }

    /// Remove a dead instance for `name` and reap its process.
    async fn reap(&self, name: &str) {
        let dead = {
            let mut instances = self.instances.lock().await;
            match instances.get(name) {
                Some(instance) if !instance.is_live() => instances.remove(name),
                _ => None,
            }
        };
        if let Some(instance) = dead {
            debug!(server = %name, state = %instance.state(), "Reaping dead MCP server instance");
            instance.teardown(self.settings.stop_grace_period()).await;
        }
    }

    /// Start `name` unless it is already live. Start failures are reported as
    /// `ServerUnavailable`.
    pub async fn ensure_running(&self, name: &str) -> McpResult<Arc<ServerInstance>> {
        if let Some(instance) = self.live_instance(name).await {
            return Ok(instance);
        }
        self.start(name).await.map_err(|e| match e {
            McpError::NotConfigured(_) | McpError::Configuration(_) | McpError::ShutDown => e,
            other => McpError::unavailable(name, other),
        })
    }

    /// Names with a live instance, sorted. Crashed instances found on the way
    /// are removed and reaped in the background.
    pub async fn list_running(&self) -> Vec<String> {
        let (mut running, dead) = {
            let mut instances = self.instances.lock().await;
            let dead_names: Vec<String> = instances
                .iter()
                .filter(|(_, instance)| !instance.is_live())
                .map(|(name, _)| name.clone())
                .collect();
            let dead: Vec<Arc<ServerInstance>> = dead_names
                .iter()
                .filter_map(|name| instances.remove(name))
                .collect();
            (instances.keys().cloned().collect::<Vec<_>>(), dead)
        };

        let grace = self.settings.stop_grace_period();
        for instance in dead {
            tokio::spawn(async move {
                instance.teardown(grace).await;
            });
        }

        running.sort();
        running
    }

    pub async fn status(&self, name: &str) -> ServerState {
        self.instances
            .lock()
            .await
            .get(name)
            .map_or(ServerState::Stopped, |instance| instance.state())
    }

    /// Tools of `name`. Empty unless the server has a live instance.
    pub async fn list_tools(&self, name: &str) -> Vec<ToolDescriptor> {
        if self.live_instance(name).await.is_none() {
            return Vec::new();
        }
        self.catalog.list(name)
    }

    pub async fn discovery_status(&self, name: &str) -> DiscoveryStatus {
        if self.live_instance(name).await.is_none() {
            return DiscoveryStatus::Undiscovered;
        }
        self.catalog.status(name)
    }

    /// Stop every running server, reporting each outcome.
    pub async fn stop_all(&self) -> BTreeMap<String, McpResult<()>> {
        let names: Vec<String> = self.instances.lock().await.keys().cloned().collect();
        let mut outcomes = BTreeMap::new();
        for name in names {
            let outcome = self.stop(&name).await;
            outcomes.insert(name, outcome);
        }
        outcomes
    }

    /// Process-wide teardown. Runs once; later and concurrent callers wait for
    /// the first run to finish. New starts are refused from here on.
    pub async fn shutdown_all(&self) {
        self.shutdown.get_or_init(|| self.run_shutdown()).await;
    }

    async fn run_shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let drained: Vec<(String, Arc<ServerInstance>)> =
            self.instances.lock().await.drain().collect();
        if drained.is_empty() {
            debug!("MCP shutdown: no running servers");
            return;
        }

        info!(count = drained.len(), "Shutting down MCP servers");
        let grace = self.settings.stop_grace_period();
        let mut tasks = JoinSet::new();
        for (name, instance) in drained {
            tasks.spawn(async move {
                instance.teardown(grace).await;
                name
            });
        }

        let deadline = self.settings.shutdown_deadline();
        let finished = timeout(deadline, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(name) => debug!(server = %name, "MCP server shut down"),
                    Err(e) => warn!(error = %e, "MCP shutdown task failed"),
                }
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                remaining = tasks.len(),
                deadline_ms = deadline.as_millis(),
                "MCP shutdown deadline elapsed; killing remaining servers"
            );
            // Dropping the tasks drops their children, which are killed on drop
            tasks.abort_all();
        }
    }
}
