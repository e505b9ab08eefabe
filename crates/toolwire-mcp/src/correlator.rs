//! Request/response correlation for one provider instance.
//!
//! Id allocation and waiter registration happen under a single lock, and a
//! waiter leaves the table exactly once: by a matching response, by expiry,
//! or by `fail_all` when the instance goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use toolwire_core::{McpError, McpResult};

use crate::protocol::ResponseBody;

/// How a pending request was settled.
#[derive(Debug)]
pub enum Completion {
    Reply(ResponseBody),
    Failed(McpError),
}

struct PendingRequest {
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<Completion>,
}

struct TableState {
    next_id: u64,
    waiters: HashMap<u64, PendingRequest>,
    /// Set once the instance is gone; no further registrations.
    closed: Option<String>,
}

/// Outstanding requests of one instance.
pub struct PendingTable {
    server: Arc<str>,
    state: Mutex<TableState>,
}

impl PendingTable {
    pub fn new(server: Arc<str>) -> Self {
        Self {
            server,
            state: Mutex::new(TableState {
                next_id: 1,
                waiters: HashMap::new(),
                closed: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next id and register a waiter for it.
    pub fn register(&self, method: &str) -> McpResult<(u64, oneshot::Receiver<Completion>)> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(McpError::ServerCrashed {
                server: self.server.to_string(),
                reason: reason.clone(),
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created_at: Instant::now(),
                tx,
            },
        );
        Ok((id, rx))
    }

    /// Resolve the waiter for `id`. Returns false when nothing was waiting.
    pub fn complete(&self, id: u64, body: ResponseBody) -> bool {
        let Some(request) = self.lock().waiters.remove(&id) else {
            return false;
        };
        tracing::trace!(
            server = %self.server,
            id,
            method = %request.method,
            elapsed_ms = request.created_at.elapsed().as_millis(),
            "Response matched"
        );
        // The caller may have given up already; the entry is gone either way
        let _ = request.tx.send(Completion::Reply(body));
        true
    }

    /// Remove the waiter for `id` without resolving it, returning its age.
    pub fn expire(&self, id: u64) -> Option<Duration> {
        self.lock()
            .waiters
            .remove(&id)
            .map(|request| request.created_at.elapsed())
    }

    /// Fail every waiter with `ServerCrashed` and refuse new registrations.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.waiters.drain().map(|(_, request)| request).collect()
        };

        let count = drained.len();
        for request in drained {
            let _ = request.tx.send(Completion::Failed(McpError::ServerCrashed {
                server: self.server.to_string(),
                reason: reason.to_string(),
            }));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// Removes a waiter if the requesting future is dropped before it settles.
pub struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: u64,
}

impl<'a> PendingGuard<'a> {
    pub const fn new(table: &'a PendingTable, id: u64) -> Self {
        Self { table, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.expire(self.id);
    }
}
