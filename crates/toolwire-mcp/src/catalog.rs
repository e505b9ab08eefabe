//! Per-server tool cache.
//!
//! Entries are tagged with the generation of the instance that produced them,
//! so a late update from a replaced instance cannot touch its successor's
//! entry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use toolwire_core::{DiscoveryStatus, ToolDescriptor};

struct CatalogEntry {
    generation: u64,
    tools: Vec<ToolDescriptor>,
    status: DiscoveryStatus,
}

#[derive(Default)]
pub struct ToolCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CatalogEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CatalogEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a fresh entry for a new instance, seeded with declared tool names.
    pub fn seed(&self, server: &str, generation: u64, declared: &[String]) {
        let tools: Vec<ToolDescriptor> = declared
            .iter()
            .map(|name| ToolDescriptor::new(name.clone(), server))
            .collect();
        let status = if tools.is_empty() {
            DiscoveryStatus::Undiscovered
        } else {
            DiscoveryStatus::Declared {
                tool_count: tools.len(),
            }
        };
        self.write().insert(
            server.to_string(),
            CatalogEntry {
                generation,
                tools,
                status,
            },
        );
    }

    /// Replace the tool list wholesale. Ignored for a stale generation.
    pub fn record_discovery(&self, server: &str, generation: u64, tools: Vec<ToolDescriptor>) -> bool {
        let mut entries = self.write();
        let Some(entry) = entries.get_mut(server).filter(|e| e.generation == generation) else {
            return false;
        };
        entry.status = DiscoveryStatus::Discovered {
            tool_count: tools.len(),
        };
        entry.tools = tools;
        true
    }

    /// Note a failed discovery, keeping whatever list is already there.
    pub fn record_failure(&self, server: &str, generation: u64, reason: String) -> bool {
        let mut entries = self.write();
        let Some(entry) = entries.get_mut(server).filter(|e| e.generation == generation) else {
            return false;
        };
        entry.status = DiscoveryStatus::Failed { reason };
        true
    }

    pub fn list(&self, server: &str) -> Vec<ToolDescriptor> {
        self.read()
            .get(server)
            .map(|entry| entry.tools.clone())
            .unwrap_or_default()
    }

    pub fn status(&self, server: &str) -> DiscoveryStatus {
        self.read()
            .get(server)
            .map(|entry| entry.status.clone())
            .unwrap_or_default()
    }

    /// Drop the entry if it still belongs to `generation`.
    pub fn invalidate(&self, server: &str, generation: u64) -> bool {
        let mut entries = self.write();
        if entries.get(server).is_some_and(|e| e.generation == generation) {
            entries.remove(server);
            return true;
        }
        false
    }
}
