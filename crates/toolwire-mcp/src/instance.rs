//! One running provider process.
//!
//! An instance owns its child, the write end of its stdin, two reader tasks
//! and the pending-request table. State moves through
//! `Starting → Running → (Stopping | Crashed) → Terminated`; every move goes
//! through [`ServerInstance::transition`].

use std::process::ExitStatus;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use toolwire_core::{McpClientSettings, McpError, McpResult, ServerSpec, ServerState};
use tracing::{debug, info, warn};

use crate::catalog::ToolCatalog;
use crate::correlator::{Completion, PendingGuard, PendingTable};
use crate::process::{LineHandler, StreamKind, shutdown_child, spawn_provider, spawn_stream_reader};
use crate::protocol::{IncomingMessage, JsonRpcRequest, ResponseBody};

/// Upper bound for joining a reader after its process is gone.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Stand-in deadline for waits too long to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Longest slice of a bad line echoed into logs.
const LOGGED_LINE_LIMIT: usize = 200;

pub struct ServerInstance {
    name: Arc<str>,
    generation: u64,
    pid: Option<u32>,
    state: Mutex<ServerState>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Option<Child>>,
    pending: PendingTable,
    cancel: CancellationToken,
    readers: Mutex<Vec<JoinHandle<()>>>,
    protocol_errors: AtomicU32,
    max_protocol_errors: u32,
    catalog: Arc<ToolCatalog>,
    teardown: OnceCell<Option<ExitStatus>>,
}

/// Why a request never reached the provider.
enum WriteFailure {
    /// The request deadline passed first.
    Expired,
    Closed(McpError),
}

/// Reader-side view of an instance. Holds a weak reference so that a dropped
/// instance releases its child (and with it, the pipes).
struct StdoutLines(Weak<ServerInstance>);

impl LineHandler for StdoutLines {
    fn on_line(&self, line: &str) {
        if let Some(instance) = self.0.upgrade() {
            instance.dispatch_line(line);
        }
    }

    fn on_discarded(&self, excerpt: &str, reason: &str) {
        if let Some(instance) = self.0.upgrade() {
            instance.note_protocol_error(excerpt, reason);
        }
    }

    fn on_closed(&self, reason: &str) {
        if let Some(instance) = self.0.upgrade() {
            instance.mark_crashed(&format!("output closed ({reason})"));
        }
    }
}

impl ServerInstance {
    /// Spawn the process and attach both readers. The instance starts in
    /// `Starting`.
    pub fn launch(
        spec: Arc<ServerSpec>,
        generation: u64,
        catalog: Arc<ToolCatalog>,
        settings: &McpClientSettings,
    ) -> McpResult<Arc<Self>> {
        let spawned = spawn_provider(&spec)?;
        let name: Arc<str> = Arc::from(spec.name.as_str());

        let instance = Arc::new(Self {
            name: Arc::clone(&name),
            generation,
            pid: spawned.pid,
            state: Mutex::new(ServerState::Starting),
            stdin: tokio::sync::Mutex::new(Some(spawned.stdin)),
            child: tokio::sync::Mutex::new(Some(spawned.child)),
            pending: PendingTable::new(Arc::clone(&name)),
            cancel: CancellationToken::new(),
            readers: Mutex::new(Vec::with_capacity(2)),
            protocol_errors: AtomicU32::new(0),
            max_protocol_errors: settings.max_consecutive_protocol_errors,
            catalog,
            teardown: OnceCell::new(),
        });

        let stdout_handler: Arc<dyn LineHandler> =
            Arc::new(StdoutLines(Arc::downgrade(&instance)));
        let handles = vec![
            spawn_stream_reader(
                spawned.stdout,
                Arc::clone(&name),
                StreamKind::Stdout,
                instance.cancel.clone(),
                Some(stdout_handler),
            ),
            spawn_stream_reader(
                spawned.stderr,
                name,
                StreamKind::Stderr,
                instance.cancel.clone(),
                None,
            ),
        ];
        instance.lock_readers().extend(handles);

        Ok(instance)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ServerState {
        *self.lock_state()
    }

    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_readers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if legal. Returns the previous state on success.
    fn transition(&self, next: ServerState) -> Option<ServerState> {
        let mut state = self.lock_state();
        let previous = *state;
        if !previous.can_transition_to(next) {
            return None;
        }
        *state = next;
        drop(state);
        debug!(server = %self.name, generation = self.generation, from = %previous, to = %next, "State change");
        Some(previous)
    }

    pub fn mark_running(&self) -> bool {
        self.transition(ServerState::Running).is_some()
    }

    /// Record an unexpected exit: fail outstanding requests and drop the
    /// catalog entry. Returns false if the instance was already stopping,
    /// crashed or terminated.
    pub fn mark_crashed(&self, reason: &str) -> bool {
        if self.transition(ServerState::Crashed).is_none() {
            return false;
        }
        let failed = self.pending.fail_all(reason);
        self.catalog.invalidate(&self.name, self.generation);
        warn!(
            server = %self.name,
            pid = ?self.pid,
            failed_requests = failed,
            reason = %reason,
            "MCP server crashed"
        );
        true
    }

    /// Send one request and wait for its response, the timeout, or the
    /// instance going away. `tool` names the tool in invocation errors.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        wait: Duration,
        tool: Option<&str>,
    ) -> McpResult<Value> {
        let state = self.state();
        if !state.is_live() {
            return Err(McpError::ServerCrashed {
                server: self.name.to_string(),
                reason: format!("instance is {state}"),
            });
        }

        let (id, mut rx) = self.pending.register(method)?;
        let _guard = PendingGuard::new(&self.pending, id);
        let now = Instant::now();
        let deadline = now.checked_add(wait).unwrap_or(now + FAR_FUTURE);

        let line = JsonRpcRequest::new(id, method, &params)
            .to_line()
            .map_err(|e| McpError::Protocol {
                server: self.name.to_string(),
                reason: format!("failed to encode request: {e}"),
            })?;

        let written = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(WriteFailure::Closed(self.stopped_error())),
            written = self.write_line(&line, deadline) => written,
        };
        match written {
            Ok(()) => debug!(server = %self.name, id, method = %method, "Request sent"),
            Err(WriteFailure::Expired) => {
                self.pending.expire(id);
                warn!(server = %self.name, id, method = %method, "MCP request timed out before it was sent");
                return Err(self.timeout_error(method, wait));
            }
            Err(WriteFailure::Closed(e)) => return Err(e),
        }

        let completion = match timeout_at(deadline, &mut rx).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(_)) => Completion::Failed(McpError::ServerCrashed {
                server: self.name.to_string(),
                reason: "request abandoned".to_string(),
            }),
            Err(_) => {
                if self.pending.expire(id).is_some() {
                    warn!(server = %self.name, id, method = %method, "MCP request timed out");
                    return Err(self.timeout_error(method, wait));
                }
                // Settled while the timer fired
                rx.try_recv()
                    .map_err(|_| self.timeout_error(method, wait))?
            }
        };

        match completion {
            Completion::Reply(ResponseBody::Result(value)) => Ok(value),
            Completion::Reply(ResponseBody::Error(error)) => Err(McpError::ToolInvocation {
                server: self.name.to_string(),
                tool: tool.unwrap_or(method).to_string(),
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            Completion::Failed(error) => Err(error),
        }
    }

    fn timeout_error(&self, method: &str, wait: Duration) -> McpError {
        McpError::Timeout {
            server: self.name.to_string(),
            method: method.to_string(),
            timeout_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn stopped_error(&self) -> McpError {
        McpError::ServerCrashed {
            server: self.name.to_string(),
            reason: "server stopped".to_string(),
        }
    }

    /// Write one line to stdin before `deadline`.
    ///
    /// A write that stalls part way leaves a torn frame on the pipe, so the
    /// pipe is closed and the instance marked crashed.
    async fn write_line(&self, line: &str, deadline: Instant) -> Result<(), WriteFailure> {
        let Ok(mut stdin) = timeout_at(deadline, self.stdin.lock()).await else {
            return Err(WriteFailure::Expired);
        };
        let Some(pipe) = stdin.as_mut() else {
            return Err(WriteFailure::Closed(McpError::ServerCrashed {
                server: self.name.to_string(),
                reason: "stdin is closed".to_string(),
            }));
        };

        let written = timeout_at(deadline, async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WriteFailure::Closed(McpError::ServerCrashed {
                server: self.name.to_string(),
                reason: format!("failed to write request: {e}"),
            })),
            Err(_) => {
                drop(stdin.take());
                drop(stdin);
                self.mark_crashed("provider stopped reading stdin");
                Err(WriteFailure::Expired)
            }
        }
    }

    /// Handle one stdout line: resolve a waiter or log and drop it.
    fn dispatch_line(&self, line: &str) {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                self.note_protocol_error(line, &e.to_string());
                return;
            }
        };

        match IncomingMessage::classify(value) {
            IncomingMessage::Response { id, body } => {
                self.protocol_errors.store(0, Ordering::Relaxed);
                if !self.pending.complete(id, body) {
                    debug!(server = %self.name, id, "Dropping response with no pending request");
                }
            }
            IncomingMessage::Notification { method } => {
                self.protocol_errors.store(0, Ordering::Relaxed);
                debug!(server = %self.name, method = %method, "Ignoring unsolicited message");
            }
            IncomingMessage::Unrecognized(reason) => self.note_protocol_error(line, &reason),
        }
    }

    fn note_protocol_error(&self, line: &str, reason: &str) {
        let count = self.protocol_errors.fetch_add(1, Ordering::Relaxed) + 1;
        let excerpt: String = line.chars().take(LOGGED_LINE_LIMIT).collect();
        warn!(
            server = %self.name,
            error = %reason,
            line = %excerpt,
            consecutive = count,
            "Discarding unreadable line from MCP server"
        );

        if self.max_protocol_errors > 0 && count >= self.max_protocol_errors {
            self.mark_crashed(&format!("{count} consecutive unreadable lines"));
        }
    }

    /// Stop the instance and release every resource it holds.
    ///
    /// Concurrent and repeated calls share one teardown. Readers are cancelled
    /// first so no read outlives the grace period.
    pub async fn teardown(&self, grace: Duration) -> Option<ExitStatus> {
        *self
            .teardown
            .get_or_init(|| self.run_teardown(grace))
            .await
    }

    async fn run_teardown(&self, grace: Duration) -> Option<ExitStatus> {
        let stopping = self.transition(ServerState::Stopping).is_some();
        self.cancel.cancel();

        let failed = self.pending.fail_all("server stopped");
        if failed > 0 {
            debug!(server = %self.name, failed_requests = failed, "Failed outstanding requests on stop");
        }
        self.catalog.invalidate(&self.name, self.generation);

        // Closing stdin lets well-behaved providers exit on their own. A
        // writer stuck on a full pipe keeps the lock; the kill below unblocks it.
        if let Ok(mut stdin) = self.stdin.try_lock() {
            drop(stdin.take());
        }

        let child = self.child.lock().await.take();
        let status = match child {
            Some(child) => match shutdown_child(child, grace).await {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!(server = %self.name, error = %e, "Failed to shut down MCP server process");
                    None
                }
            },
            None => None,
        };

        if let Ok(mut stdin) = timeout(READER_JOIN_TIMEOUT, self.stdin.lock()).await {
            drop(stdin.take());
        }

        let handles: Vec<JoinHandle<()>> = self.lock_readers().drain(..).collect();
        for handle in handles {
            let abort = handle.abort_handle();
            if timeout(READER_JOIN_TIMEOUT, handle).await.is_err() {
                debug!(server = %self.name, "Reader did not exit in time, aborting");
                abort.abort();
            }
        }

        self.transition(ServerState::Terminated);
        if stopping {
            info!(server = %self.name, pid = ?self.pid, status = ?status, "MCP server stopped");
        } else {
            debug!(server = %self.name, pid = ?self.pid, status = ?status, "Reaped crashed MCP server");
        }
        status
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell_spec(script: &str) -> Arc<ServerSpec> {
        Arc::new(ServerSpec::new("sh-srv", "sh").with_args(["-c", script]))
    }

    fn launch(script: &str, settings: &McpClientSettings) -> Arc<ServerInstance> {
        ServerInstance::launch(shell_spec(script), 1, Arc::new(ToolCatalog::new()), settings)
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_resolves_from_stdout() {
        // Answer the first request with id 1, then idle
        let instance = launch(
            r#"read line; echo '{"id":1,"result":{"ok":true}}'; sleep 5"#,
            &McpClientSettings::default(),
        );
        assert!(instance.mark_running());

        let value = instance
            .request("call_tool", json!({}), Duration::from_secs(2), Some("t"))
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(instance.outstanding(), 0);

        instance.teardown(Duration::from_millis(200)).await;
        assert_eq!(instance.state(), ServerState::Terminated);
    }

    #[tokio::test]
    async fn test_exit_marks_crashed_and_fails_waiters() {
        let instance = launch("read line; exit 3", &McpClientSettings::default());
        instance.mark_running();

        let err = instance
            .request("call_tool", json!({}), Duration::from_secs(5), None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ServerCrashed { .. }));
        assert_eq!(instance.state(), ServerState::Crashed);

        instance.teardown(Duration::from_millis(200)).await;
        assert_eq!(instance.state(), ServerState::Terminated);
    }

    #[tokio::test]
    async fn test_protocol_error_escalation() {
        let settings = McpClientSettings {
            max_consecutive_protocol_errors: 2,
            ..McpClientSettings::default()
        };
        let instance = launch("read line; echo nope; echo still-nope; sleep 5", &settings);
        instance.mark_running();

        let err = instance
            .request("call_tool", json!({}), Duration::from_secs(5), None)
            .await
            .unwrap_err();
        assert!(
            matches!(&err, McpError::ServerCrashed { reason, .. } if reason.contains("unreadable"))
        );
        instance.teardown(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_teardown_is_shared_and_idempotent() {
        let instance = launch("sleep 30", &McpClientSettings::default());
        instance.mark_running();

        let grace = Duration::from_millis(500);
        let (a, b) = tokio::join!(instance.teardown(grace), instance.teardown(grace));
        assert_eq!(a, b);
        assert_eq!(instance.teardown(grace).await, a);
        assert_eq!(instance.state(), ServerState::Terminated);
    }

    /// Answers the first request, then never reads stdin again.
    const DEAF_AFTER_FIRST: &str = r#"read l; echo '{"id":1,"result":[]}'; sleep 30"#;

    fn large_payload() -> Value {
        json!({"blob": "x".repeat(1024 * 1024)})
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_write_honours_request_timeout() {
        let instance = launch(DEAF_AFTER_FIRST, &McpClientSettings::default());
        instance.mark_running();
        instance
            .request("list_tools", json!({}), Duration::from_secs(2), None)
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = tokio::time::timeout(
            Duration::from_secs(3),
            instance.request("call_tool", large_payload(), Duration::from_millis(300), Some("t")),
        )
        .await
        .expect("request must respect its own timeout")
        .unwrap_err();

        assert!(matches!(err, McpError::Timeout { .. }), "got {err}");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(instance.outstanding(), 0);
        // A torn frame makes the pipe unusable
        assert_eq!(instance.state(), ServerState::Crashed);

        tokio::time::timeout(Duration::from_secs(3), instance.teardown(Duration::from_millis(200)))
            .await
            .expect("teardown must be bounded");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_teardown_unblocks_stalled_writer() {
        let instance = launch(DEAF_AFTER_FIRST, &McpClientSettings::default());
        instance.mark_running();
        instance
            .request("list_tools", json!({}), Duration::from_secs(2), None)
            .await
            .unwrap();

        let writer = Arc::clone(&instance);
        let call = tokio::spawn(async move {
            writer
                .request("call_tool", large_payload(), Duration::from_secs(30), Some("t"))
                .await
        });
        // Let the writer fill the pipe and block
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(4), instance.teardown(Duration::from_millis(500)))
            .await
            .expect("teardown must not wait on a stalled writer");
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(instance.state(), ServerState::Terminated);

        let err = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("stalled call must be released")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, McpError::ServerCrashed { .. }), "got {err}");
    }
}
