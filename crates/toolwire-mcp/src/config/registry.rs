//! Resolved server registry and the loader that builds it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use toolwire_core::{McpClientSettings, McpError, McpResult, ServerSpec};

use super::env::{EnvProvider, SystemEnv, load_env_servers};
use super::file::{default_config_paths, load_config_file};

/// Immutable name → spec table. Every spec in it has been validated.
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    specs: BTreeMap<String, Arc<ServerSpec>>,
}

impl ServerRegistry {
    /// Build from a single source. Duplicate names are a conflict.
    pub fn from_specs(specs: impl IntoIterator<Item = ServerSpec>) -> McpResult<Self> {
        let mut registry = Self::default();
        for spec in specs {
            if registry.specs.contains_key(&spec.name) {
                return Err(McpError::Configuration(format!(
                    "server '{}' is defined more than once",
                    spec.name
                )));
            }
            registry.insert(spec)?;
        }
        Ok(registry)
    }

    /// Union of both sources; a file entry replaces an env entry of the same name.
    pub fn from_sources(
        env_specs: impl IntoIterator<Item = ServerSpec>,
        file_specs: impl IntoIterator<Item = ServerSpec>,
    ) -> McpResult<Self> {
        let mut registry = Self::from_specs(env_specs)?;
        for spec in file_specs {
            if registry.specs.contains_key(&spec.name) {
                tracing::info!(
                    server = %spec.name,
                    "File configuration overrides environment configuration"
                );
            }
            registry.insert(spec)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, spec: ServerSpec) -> McpResult<()> {
        spec.validate().map_err(McpError::Configuration)?;
        self.specs.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    /// Spec for `name`, or `NotConfigured`.
    pub fn resolve(&self, name: &str) -> McpResult<Arc<ServerSpec>> {
        self.specs
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::NotConfigured(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ServerSpec> {
        self.specs.get(name).map(AsRef::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Configured names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Result of loading every configuration source.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub registry: ServerRegistry,
    pub settings: McpClientSettings,
}

/// Collects env and file sources into a [`LoadedConfig`].
///
/// Files are read in order (later files override earlier ones per server
/// name); missing search-path files are skipped, a missing explicit file is
/// an error.
pub struct ConfigLoader<E: EnvProvider = SystemEnv> {
    env: E,
    search_paths: Vec<PathBuf>,
    explicit_file: Option<PathBuf>,
}

impl ConfigLoader<SystemEnv> {
    /// Loader over the process environment and the default search paths.
    pub fn new() -> Self {
        Self::with_env(SystemEnv).with_default_paths()
    }
}

impl Default for ConfigLoader<SystemEnv> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EnvProvider> ConfigLoader<E> {
    /// Loader over a custom environment and no search paths.
    pub const fn with_env(env: E) -> Self {
        Self {
            env,
            search_paths: Vec::new(),
            explicit_file: None,
        }
    }

    #[must_use]
    pub fn with_default_paths(mut self) -> Self {
        self.search_paths.extend(default_config_paths());
        self
    }

    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn with_explicit_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_file = Some(path.into());
        self
    }

    pub fn load(&self) -> McpResult<LoadedConfig> {
        let env_specs = load_env_servers(&self.env)?;

        let mut file_specs: BTreeMap<String, ServerSpec> = BTreeMap::new();
        let mut settings = None;

        for path in &self.search_paths {
            if !path.is_file() {
                tracing::debug!(path = %path.display(), "No MCP config file at search path");
                continue;
            }
            Self::merge_file(path, &mut file_specs, &mut settings)?;
        }

        if let Some(path) = &self.explicit_file {
            if !path.is_file() {
                return Err(McpError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            Self::merge_file(path, &mut file_specs, &mut settings)?;
        }

        let registry = ServerRegistry::from_sources(env_specs, file_specs.into_values())?;
        let settings = settings.unwrap_or_default();
        settings.validate()?;

        tracing::debug!(servers = registry.len(), "Loaded MCP configuration");
        Ok(LoadedConfig { registry, settings })
    }

    fn merge_file(
        path: &std::path::Path,
        specs: &mut BTreeMap<String, ServerSpec>,
        settings: &mut Option<McpClientSettings>,
    ) -> McpResult<()> {
        let mut file = load_config_file(path)?;
        tracing::debug!(
            path = %path.display(),
            servers = file.servers.len(),
            "Read MCP config file"
        );
        if let Some(file_settings) = file.settings.take() {
            *settings = Some(file_settings);
        }
        for spec in file.into_specs() {
            specs.insert(spec.name.clone(), spec);
        }
        Ok(())
    }
}
