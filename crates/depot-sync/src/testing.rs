//! Scriptable [`RemoteApi`] fake shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use depot_core::{SyncAction, SyncTask};

use crate::clock::{Clock, SystemClock};
use crate::remote::{RemoteAck, RemoteApi, RemoteError};
use crate::reporter::{SyncEventEmitter, SyncStatus};

/// One observed `apply` call.
#[derive(Debug, Clone)]
pub(crate) struct ApplyCall {
    pub task_id: i64,
    pub table: String,
    pub record_id: i64,
    pub action: SyncAction,
    pub idempotency_key: String,
    pub at: DateTime<Utc>,
}

/// Replies from a queue of scripted outcomes, then acknowledges.
pub(crate) struct ScriptedRemote {
    script: Mutex<VecDeque<Result<RemoteAck, RemoteError>>>,
    calls: Mutex<Vec<ApplyCall>>,
    healthy: AtomicBool,
    latency: Mutex<Option<Duration>>,
    clock: Arc<dyn Clock>,
    called: Notify,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        ScriptedRemote {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
            latency: Mutex::new(None),
            clock,
            called: Notify::new(),
        }
    }

    /// Queues the outcome of the next unscripted call.
    pub fn push(&self, outcome: Result<RemoteAck, RemoteError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn push_status(&self, status: u16, times: usize) {
        for _ in 0..times {
            self.push(Err(RemoteError::from_status(status, "scripted")));
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ApplyCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Waits until `apply` has been entered at least `n` times.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.called.notified();
            if self.calls.lock().unwrap().len() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn apply(
        &self,
        task: &SyncTask,
        idempotency_key: &str,
    ) -> Result<RemoteAck, RemoteError> {
        self.calls.lock().unwrap().push(ApplyCall {
            task_id: task.task_id,
            table: task.table.clone(),
            record_id: task.record_id,
            action: task.action,
            idempotency_key: idempotency_key.to_string(),
            at: self.clock.now(),
        });
        self.called.notify_waiters();

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(RemoteAck {
                remote_id: Some(format!("remote-{}", task.task_id)),
            })
        })
    }

    async fn health_probe(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Emitter that remembers dead-lettered task ids.
#[derive(Default)]
pub(crate) struct RecordingEmitter {
    dead_letters: Mutex<Vec<i64>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingEmitter {
    pub fn dead_letters(&self) -> Vec<i64> {
        self.dead_letters.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl SyncEventEmitter for RecordingEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}

    fn emit_progress(&self, _pending: i64, _synced: i64) {}

    fn emit_error(&self, message: &str, _retryable: bool) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn emit_dead_letter(&self, task: &SyncTask, _error: &str) {
        self.dead_letters.lock().unwrap().push(task.task_id);
    }
}
