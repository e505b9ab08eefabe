//! JSON configuration file source.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toolwire_core::{McpClientSettings, McpError, McpResult, ServerSpec};

/// Directory under the home directory that holds the user-level config.
const USER_CONFIG_DIR: &str = ".mcp-group";

/// Config file name, searched in the user directory and the working directory.
const CONFIG_FILE_NAME: &str = "mcp_config.json";

/// Parsed config document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Server entries keyed by name.
    pub servers: BTreeMap<String, ServerEntry>,

    /// Client settings; absent means "keep what earlier sources set".
    pub settings: Option<McpClientSettings>,
}

/// One entry of the `servers` mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerEntry {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default, alias = "module_search_path")]
    pub node_modules_path: Option<String>,

    /// Declared tool names, used until discovery succeeds.
    #[serde(default)]
    pub tools: Vec<String>,
}

impl ServerEntry {
    pub fn into_spec(self, name: &str) -> ServerSpec {
        let mut spec = ServerSpec::new(name, self.command)
            .with_args(self.args)
            .with_declared_tools(self.tools);
        spec.env = self.env;
        spec.module_search_path = self.node_modules_path;
        spec
    }
}

impl ConfigFile {
    /// Parse a config document. `origin` names the source in error messages.
    pub fn parse(contents: &str, origin: &str) -> McpResult<Self> {
        serde_json::from_str(contents)
            .map_err(|e| McpError::Configuration(format!("{origin}: {e}")))
    }

    /// Server entries converted to specs.
    pub fn into_specs(self) -> Vec<ServerSpec> {
        self.servers
            .into_iter()
            .map(|(name, entry)| entry.into_spec(&name))
            .collect()
    }
}

/// Read and parse a config file.
pub fn load_config_file(path: &Path) -> McpResult<ConfigFile> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        McpError::Configuration(format!("failed to read {}: {e}", path.display()))
    })?;
    ConfigFile::parse(&contents, &path.display().to_string())
}

/// Default search list, lowest precedence first.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(USER_CONFIG_DIR).join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from(CONFIG_FILE_NAME));
    paths
}
