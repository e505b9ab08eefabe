//! Server configuration resolution.
//!
//! Two sources feed the registry: `MCP_*` environment variables and JSON
//! config files. Both are parsed and validated eagerly so mistakes surface
//! before any process is launched.

mod env;
mod file;
mod registry;

pub use env::{EnvProvider, SERVERS_VAR, SystemEnv, env_prefix, load_env_servers};
pub use file::{ConfigFile, ServerEntry, default_config_paths, load_config_file};
pub use registry::{ConfigLoader, LoadedConfig, ServerRegistry};

#[cfg(test)]
pub(crate) use env::MockEnv;
