//! # Sync Status Reporter
//!
//! Read-side view of the sync engine for the host UI.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Status Sources                                  │
//! │                                                                         │
//! │   sync_tasks (COUNT GROUP BY status) ──┐                                │
//! │   ConnectivityMonitor::is_online ──────┼──► SyncStatus (on demand)      │
//! │   DrainWorker state / last drain ──────┘                                │
//! │                                                                         │
//! │   EVENTS (pushed by the worker through SyncEventEmitter):              │
//! │   "sync://status"      - full SyncStatus                               │
//! │   "sync://progress"    - { pending: 5, synced: 100 }                   │
//! │   "sync://error"       - { message: "HTTP 503: ...", retryable: true } │
//! │   "sync://dead-letter" - { taskId: 7, error: "HTTP 422: ..." }         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here is cached; every [`StatusReporter::status`] call recomputes
//! from the outbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use ts_rs::TS;

use depot_core::SyncTask;
use depot_db::{Database, UnreadableTask};

use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncResult;
use crate::worker::{DrainShared, DrainState};

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Tasks waiting for delivery (including ones in backoff).
    pub pending_count: i64,

    /// Tasks claimed by the drain worker right now.
    pub in_flight_count: i64,

    pub succeeded_count: i64,

    /// Dead-lettered tasks.
    pub failed_count: i64,

    pub is_online: bool,

    pub drain_state: DrainState,

    /// End of the last drain that delivered, rescheduled or dead-lettered
    /// at least one task. Drains that found nothing to do leave it alone.
    #[ts(as = "Option<String>")]
    pub last_drain_at: Option<DateTime<Utc>>,

    /// Last delivery or drain error. Cleared by the next successful delivery.
    pub last_error: Option<String>,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for emitting sync events (implemented by the host UI bridge).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits a sync progress event.
    fn emit_progress(&self, pending: i64, synced: i64);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str, retryable: bool);

    /// Emits when a task is dead-lettered and needs attention.
    fn emit_dead_letter(&self, task: &SyncTask, error: &str);
}

/// No-op event emitter for headless use.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _pending: i64, _synced: i64) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
    fn emit_dead_letter(&self, _task: &SyncTask, _error: &str) {}
}

// =============================================================================
// Status Reporter
// =============================================================================

/// Computes [`SyncStatus`] and manages dead letters.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    db: Database,
    monitor: ConnectivityMonitor,
    shared: Arc<DrainShared>,
}

impl StatusReporter {
    pub(crate) fn new(db: Database, monitor: ConnectivityMonitor, shared: Arc<DrainShared>) -> Self {
        StatusReporter {
            db,
            monitor,
            shared,
        }
    }

    /// Recomputes the status from the outbox and monitor.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let counts = self.db.outbox().count_by_status().await?;
        let snapshot = self.shared.snapshot().await;

        Ok(SyncStatus {
            pending_count: counts.pending,
            in_flight_count: counts.in_flight,
            succeeded_count: counts.succeeded,
            failed_count: counts.failed,
            is_online: self.monitor.is_online(),
            drain_state: snapshot.state,
            last_drain_at: snapshot.last_drain_at,
            last_error: snapshot.last_error,
        })
    }

    /// Dead-lettered tasks, oldest first.
    pub async fn dead_letters(&self) -> SyncResult<Vec<SyncTask>> {
        Ok(self.db.outbox().dead_letters().await?)
    }

    /// Dead-lettered rows that were too damaged to decode.
    pub async fn unreadable_dead_letters(&self) -> SyncResult<Vec<UnreadableTask>> {
        Ok(self.db.outbox().unreadable_dead_letters().await?)
    }

    /// Puts a dead-lettered task back in the queue and wakes the worker.
    pub async fn retry_dead_letter(&self, task_id: i64) -> SyncResult<()> {
        self.db.outbox().retry_dead_letter(task_id).await?;
        self.db.sync_signal().notify_one();
        info!(task_id, "Manual retry requested");
        Ok(())
    }
}
