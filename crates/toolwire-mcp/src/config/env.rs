//! Environment-variable configuration source.
//!
//! `MCP_SERVERS` lists server names; each name then reads
//! `MCP_SERVER_<NAME>_COMMAND`, `_ARGS`, `_ENV` and `_NODE_MODULES`.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;

use toolwire_core::{McpError, McpResult, ServerSpec};

/// Comma separated list of configured server names.
pub const SERVERS_VAR: &str = "MCP_SERVERS";

/// Trait for accessing environment variables (injectable for testing).
pub trait EnvProvider {
    /// Get an environment variable.
    fn get(&self, key: &str) -> Option<OsString>;
}

/// Production environment provider that reads from the actual process environment.
pub struct SystemEnv;

impl EnvProvider for SystemEnv {
    fn get(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }
}

/// Test/mock environment provider with predefined variables.
#[cfg(test)]
#[derive(Default)]
pub struct MockEnv {
    vars: HashMap<String, OsString>,
}

#[cfg(test)]
impl MockEnv {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
impl EnvProvider for MockEnv {
    fn get(&self, key: &str) -> Option<OsString> {
        self.vars.get(key).cloned()
    }
}

/// Variable prefix for a server: upper-cased, `-` replaced by `_`.
pub fn env_prefix(name: &str) -> String {
    format!("MCP_SERVER_{}", name.to_uppercase().replace('-', "_"))
}

/// Read every server listed in `MCP_SERVERS`.
///
/// Returns an empty list when the variable is unset.
pub fn load_env_servers(env: &dyn EnvProvider) -> McpResult<Vec<ServerSpec>> {
    let Some(list) = read_var(env, SERVERS_VAR)? else {
        return Ok(Vec::new());
    };

    let mut prefixes: HashMap<String, String> = HashMap::new();
    let mut specs = Vec::new();

    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let prefix = env_prefix(name);
        if let Some(existing) = prefixes.get(&prefix) {
            if existing == name {
                tracing::debug!(server = %name, "Ignoring repeated entry in {SERVERS_VAR}");
                continue;
            }
            return Err(McpError::Configuration(format!(
                "servers '{existing}' and '{name}' both map to {prefix}_*"
            )));
        }
        prefixes.insert(prefix.clone(), name.to_string());
        specs.push(load_server(env, name, &prefix)?);
    }

    Ok(specs)
}

fn load_server(env: &dyn EnvProvider, name: &str, prefix: &str) -> McpResult<ServerSpec> {
    let command_var = format!("{prefix}_COMMAND");
    let command = read_var(env, &command_var)?
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            McpError::Configuration(format!(
                "server '{name}' is listed in {SERVERS_VAR} but {command_var} is not set"
            ))
        })?;

    let args_var = format!("{prefix}_ARGS");
    let args: Vec<String> = match read_var(env, &args_var)? {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(|e| {
            McpError::Configuration(format!("{args_var} must be a JSON array of strings: {e}"))
        })?,
        _ => Vec::new(),
    };

    let env_var = format!("{prefix}_ENV");
    let overrides: BTreeMap<String, String> = match read_var(env, &env_var)? {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(|e| {
            McpError::Configuration(format!(
                "{env_var} must be a JSON object of string values: {e}"
            ))
        })?,
        _ => BTreeMap::new(),
    };

    let module_search_path =
        read_var(env, &format!("{prefix}_NODE_MODULES"))?.filter(|p| !p.trim().is_empty());

    let mut spec = ServerSpec::new(name, command).with_args(args);
    spec.env = overrides;
    spec.module_search_path = module_search_path;
    Ok(spec)
}

fn read_var(env: &dyn EnvProvider, key: &str) -> McpResult<Option<String>> {
    env.get(key)
        .map(|value| {
            value
                .into_string()
                .map_err(|_| McpError::Configuration(format!("{key} is not valid UTF-8")))
        })
        .transpose()
}
