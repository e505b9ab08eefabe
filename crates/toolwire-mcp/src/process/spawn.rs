//! Provider process creation.

use std::io;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use toolwire_core::{McpError, McpResult, ServerSpec};

use crate::path::build_effective_path;

/// A freshly spawned provider with its three pipes detached from the handle.
pub struct SpawnedProvider {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
    pub pid: Option<u32>,
}

/// Spawn the provider described by `spec` with piped stdio.
///
/// The child inherits the parent environment with the spec's overrides on
/// top. When a module search path is set its `.bin` directory is prepended to
/// `PATH`.
pub fn spawn_provider(spec: &ServerSpec) -> McpResult<SpawnedProvider> {
    let mut command = Command::new(&spec.command);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(module_path) = &spec.module_search_path {
        let base = spec
            .env
            .get("PATH")
            .map(Into::into)
            .or_else(|| std::env::var_os("PATH"));
        let path = build_effective_path(module_path, base.as_deref()).map_err(|e| {
            McpError::ProcessSpawn {
                server: spec.name.clone(),
                reason: format!("invalid module search path '{module_path}': {e}"),
            }
        })?;
        command.env("PATH", path);
    }

    let mut child = command.spawn().map_err(|e| McpError::ProcessSpawn {
        server: spec.name.clone(),
        reason: describe_spawn_error(&spec.command, &e),
    })?;

    let pid = child.id();
    let stdin = take_pipe(spec, child.stdin.take(), "stdin")?;
    let stdout = take_pipe(spec, child.stdout.take(), "stdout")?;
    let stderr = take_pipe(spec, child.stderr.take(), "stderr")?;

    tracing::debug!(
        server = %spec.name,
        command = %spec.command,
        pid = ?pid,
        "Spawned MCP server process"
    );

    Ok(SpawnedProvider {
        child,
        stdin,
        stdout,
        stderr,
        pid,
    })
}

fn take_pipe<T>(spec: &ServerSpec, pipe: Option<T>, label: &str) -> McpResult<T> {
    pipe.ok_or_else(|| McpError::ProcessSpawn {
        server: spec.name.clone(),
        reason: format!("failed to capture {label}"),
    })
}

fn describe_spawn_error(command: &str, error: &io::Error) -> String {
    match error.kind() {
        io::ErrorKind::NotFound => format!("executable not found: {command}"),
        io::ErrorKind::PermissionDenied => format!("permission denied: {command}"),
        _ => format!("failed to launch '{command}': {error}"),
    }
}
