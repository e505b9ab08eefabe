//! Scriptable tool provider used by the integration tests.
//!
//! Speaks line-delimited JSON-RPC on stdin/stdout. `STUB_MODE` selects the
//! behaviour:
//!
//! - `echo` (default): answers discovery with `[{"name":"echo"}]` and serves
//!   the tools below
//! - `silent`: reads requests and never answers
//! - `garbage`: writes a non-JSON line, a notification and a stale response
//!   before every real response
//! - `crash_on_call`: answers discovery, exits on the first tool call
//! - `reverse`: holds tool calls until `STUB_BATCH` (default 2) are queued,
//!   then answers them newest first
//! - `no_discovery`: rejects the discovery method, serves tools normally
//! - `error`: every tool call fails with code -32001
//!
//! Tools served in the answering modes: `echo` (returns the arguments),
//! `whoami` (returns the request id and arguments), `delay` (waits
//! `arguments.ms` on a thread, then answers), `fail`, `block` (never
//! answers) and `crash` (exits).

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use toolwire_mcp::protocol::error_codes;
use tracing_subscriber::EnvFilter;

const DISCOVERY_METHODS: [&str; 2] = ["list_tools", "tools/list"];
const CALL_METHODS: [&str; 2] = ["call_tool", "tools/call"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Echo,
    Silent,
    Garbage,
    CrashOnCall,
    Reverse,
    NoDiscovery,
    Error,
}

impl Mode {
    fn from_env() -> Result<Self> {
        let raw = std::env::var("STUB_MODE").unwrap_or_else(|_| "echo".to_string());
        Ok(match raw.as_str() {
            "echo" => Self::Echo,
            "silent" => Self::Silent,
            "garbage" => Self::Garbage,
            "crash_on_call" => Self::CrashOnCall,
            "reverse" => Self::Reverse,
            "no_discovery" => Self::NoDiscovery,
            "error" => Self::Error,
            other => anyhow::bail!("unknown STUB_MODE '{other}'"),
        })
    }
}

#[derive(Clone)]
struct Output(Arc<Mutex<std::io::Stdout>>);

impl Output {
    fn line(&self, value: &Value) -> Result<()> {
        self.raw(&value.to_string())
    }

    fn raw(&self, line: &str) -> Result<()> {
        let mut stdout = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("stdout lock poisoned"))?;
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        Ok(())
    }

    fn result(&self, id: &Value, result: Value) -> Result<()> {
        self.line(&json!({"jsonrpc": "2.0", "id": id, "result": result}))
    }

    fn error(&self, id: &Value, code: i64, message: &str, data: Option<Value>) -> Result<()> {
        let mut error = json!({"code": code, "message": message});
        if let Some(data) = data {
            error["data"] = data;
        }
        self.line(&json!({"jsonrpc": "2.0", "id": id, "error": error}))
    }
}

struct Stub {
    mode: Mode,
    out: Output,
    batch: usize,
    queued: Vec<(Value, Value)>,
}

impl Stub {
    fn handle(&mut self, request: &Value) -> Result<()> {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(Value::Null);
        tracing::debug!(%id, method, "request");

        if self.mode == Mode::Silent {
            return Ok(());
        }

        if DISCOVERY_METHODS.contains(&method) {
            self.noise()?;
            if self.mode == Mode::NoDiscovery {
                return self.out.error(&id, error_codes::METHOD_NOT_FOUND, "discovery disabled", None);
            }
            return self.out.result(&id, json!([{"name": "echo"}]));
        }

        if !CALL_METHODS.contains(&method) {
            return self.out.error(
                &id,
                error_codes::METHOD_NOT_FOUND,
                &format!("unknown method '{method}'"),
                None,
            );
        }

        match self.mode {
            Mode::CrashOnCall => std::process::exit(1),
            Mode::Error => self.out.error(
                &id,
                -32001,
                "file not found: /tmp/x",
                Some(json!({"path": "/tmp/x"})),
            ),
            Mode::Reverse => {
                self.queued.push((id, params));
                if self.queued.len() >= self.batch {
                    while let Some((id, params)) = self.queued.pop() {
                        self.call(id, &params)?;
                    }
                }
                Ok(())
            }
            _ => {
                self.noise()?;
                self.call(id, &params)
            }
        }
    }

    fn noise(&self) -> Result<()> {
        if self.mode == Mode::Garbage {
            self.out.raw("this is not json {")?;
            self.out
                .line(&json!({"jsonrpc": "2.0", "method": "notifications/progress"}))?;
            self.out.result(&json!(999_999), json!("stale"))?;
        }
        Ok(())
    }

    fn call(&self, id: Value, params: &Value) -> Result<()> {
        let tool = params.get("name").and_then(Value::as_str).unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        match tool {
            "echo" => self.out.result(&id, arguments),
            "whoami" => self
                .out
                .result(&id, json!({"id": id, "arguments": arguments})),
            "delay" => {
                let ms = arguments.get("ms").and_then(Value::as_u64).unwrap_or(0);
                let out = self.out.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(ms));
                    if let Err(e) = out.result(&id, json!({"id": id, "slept_ms": ms})) {
                        tracing::warn!(error = %e, "delayed write failed");
                    }
                });
                Ok(())
            }
            "fail" => self.out.error(&id, -32001, "tool failed on request", None),
            "block" => Ok(()),
            "crash" => std::process::exit(2),
            other => self.out.error(
                &id,
                error_codes::METHOD_NOT_FOUND,
                &format!("unknown tool '{other}'"),
                None,
            ),
        }
    }
}

fn main() -> Result<()> {
    // stdout carries the protocol, so diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let batch = std::env::var("STUB_BATCH")
        .ok()
        .map(|raw| raw.parse::<usize>())
        .transpose()
        .context("STUB_BATCH must be a positive integer")?
        .unwrap_or(2)
        .max(1);

    let mut stub = Stub {
        mode: Mode::from_env()?,
        out: Output(Arc::new(Mutex::new(std::io::stdout()))),
        batch,
        queued: Vec::new(),
    };
    tracing::info!(mode = ?stub.mode, "stub provider ready");

    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(request) => stub.handle(&request)?,
            Err(e) => tracing::warn!(error = %e, "ignoring unparsable request"),
        }
    }

    Ok(())
}
