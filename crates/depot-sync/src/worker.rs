//! # Sync Drain Worker
//!
//! Pushes outbox tasks to the remote, one at a time, in `task_id` order.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Drain Worker States                              │
//! │                                                                         │
//! │        task appended / BecameOnline / tick / drain_now                  │
//! │   ┌──────────┐ ──────────────────────────────────► ┌──────────────┐     │
//! │   │   Idle   │                                     │   Draining   │     │
//! │   └──────────┘ ◄────────────────────────────────── └──────┬───────┘     │
//! │        ▲         queue empty / connectivity lost          │             │
//! │        │                                                  │ only        │
//! │        │ backoff timer fires                              │ rescheduled │
//! │        │ (→ Draining)                                     ▼ tasks left  │
//! │        │                                           ┌──────────────┐     │
//! │        └────────────────────────────────────────── │ BackoffWait  │     │
//! │                                                    └──────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## One Pass
//! For every pending task, oldest first:
//!
//! 1. Skip it if an earlier task of the same record is waiting (per-record
//!    order). Skip and block the record if it isn't eligible yet.
//! 2. Claim it (`mark_in_flight`) and call [`RemoteApi::apply`] under the
//!    request timeout.
//! 3. Ack → `mark_succeeded`. Retryable failure with attempts left →
//!    `reschedule` and block the record. Otherwise → `mark_failed`.
//!    Connectivity lost during the call → `release` and stop.
//!
//! Passes repeat until one makes no progress, so tasks appended mid-drain
//! are picked up before the worker goes idle.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, watch, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use chrono::{DateTime, Utc};
use depot_core::{RecordKey, SyncTask, TaskStatus};
use depot_db::Database;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::SyncResult;
use crate::remote::{RemoteAck, RemoteApi, RemoteError};
use crate::reporter::{NoOpEmitter, StatusReporter, SyncEventEmitter};
use crate::retry::RetryPolicy;

// =============================================================================
// Drain State
// =============================================================================

/// What the drain worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DrainState {
    #[default]
    Idle,
    Draining,
    /// Only rescheduled tasks remain; a timer is armed for the earliest.
    BackoffWait,
}

impl std::fmt::Display for DrainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainState::Idle => write!(f, "idle"),
            DrainState::Draining => write!(f, "draining"),
            DrainState::BackoffWait => write!(f, "backoff_wait"),
        }
    }
}

/// Counters for one call to [`DrainWorker::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub delivered: u32,
    pub rescheduled: u32,
    pub dead_lettered: u32,
}

impl DrainStats {
    fn is_empty(&self) -> bool {
        self.delivered == 0 && self.rescheduled == 0 && self.dead_lettered == 0
    }
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No eligible work left.
    Completed(DrainStats),
    /// Connectivity dropped part-way; the current task was released.
    Interrupted(DrainStats),
    /// Offline at the start; nothing was attempted.
    Offline,
    /// Another drain was already running; this trigger was absorbed by it.
    AlreadyRunning,
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the worker and the status reporter.
#[derive(Debug, Default)]
pub(crate) struct DrainShared {
    running: AtomicBool,
    snapshot: RwLock<DrainSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DrainSnapshot {
    pub state: DrainState,
    pub last_drain_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl DrainShared {
    pub(crate) async fn snapshot(&self) -> DrainSnapshot {
        self.snapshot.read().await.clone()
    }
}

/// Clears the single-flight flag even if the drain future is dropped.
struct RunningGuard<'a> {
    shared: &'a DrainShared,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut snapshot) = self.shared.snapshot.try_write() {
            if snapshot.state == DrainState::Draining {
                snapshot.state = DrainState::Idle;
            }
        }
        self.shared.running.store(false, Ordering::Release);
    }
}

// =============================================================================
// Worker Settings
// =============================================================================

/// Timing knobs for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub request_timeout: Duration,
    pub tick_interval: Duration,
    pub retention: chrono::Duration,
    pub compaction_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        WorkerSettings {
            request_timeout: config.drain.request_timeout(),
            tick_interval: config.drain.tick_interval(),
            retention: config.outbox.retention(),
            compaction_interval: config.outbox.compaction_interval(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

enum Delivery {
    Acked(RemoteAck),
    Failed(RemoteError),
    ConnectivityLost,
}

// =============================================================================
// Drain Worker
// =============================================================================

/// Single-flight drain loop over the outbox.
#[derive(Clone)]
pub struct DrainWorker {
    db: Database,
    remote: Arc<dyn RemoteApi>,
    monitor: ConnectivityMonitor,
    policy: RetryPolicy,
    settings: WorkerSettings,
    clock: Arc<dyn Clock>,
    emitter: Arc<dyn SyncEventEmitter>,
    shared: Arc<DrainShared>,
}

impl DrainWorker {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteApi>,
        monitor: ConnectivityMonitor,
        policy: RetryPolicy,
        settings: WorkerSettings,
    ) -> Self {
        DrainWorker {
            db,
            remote,
            monitor,
            policy,
            settings,
            clock: Arc::new(SystemClock),
            emitter: Arc::new(NoOpEmitter),
            shared: Arc::new(DrainShared::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Reporter reading this worker's state.
    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(self.db.clone(), self.monitor.clone(), self.shared.clone())
    }

    /// Delivers every currently eligible task.
    ///
    /// Returns [`DrainOutcome::AlreadyRunning`] without doing anything when
    /// another drain holds the flag.
    pub async fn drain(&self) -> SyncResult<DrainOutcome> {
        if !self.monitor.is_online() {
            return Ok(DrainOutcome::Offline);
        }

        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already running; trigger coalesced");
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let _guard = RunningGuard {
            shared: &self.shared,
        };

        self.shared.snapshot.write().await.state = DrainState::Draining;
        let result = self.drain_passes().await;

        let mut snapshot = self.shared.snapshot.write().await;
        snapshot.state = DrainState::Idle;
        match &result {
            Ok(DrainOutcome::Completed(stats)) | Ok(DrainOutcome::Interrupted(stats))
                if !stats.is_empty() =>
            {
                snapshot.last_drain_at = Some(self.clock.now());
            }
            Err(e) => snapshot.last_error = Some(e.to_string()),
            _ => {}
        }

        result
    }

    async fn drain_passes(&self) -> SyncResult<DrainOutcome> {
        let outbox = self.db.outbox();
        let mut stats = DrainStats::default();

        loop {
            let scan = outbox.scan_pending().await?;
            for unreadable in &scan.corrupted {
                let message = format!(
                    "task {}: {}",
                    unreadable.task_id,
                    unreadable.last_error.as_deref().unwrap_or("queue corruption")
                );
                stats.dead_lettered += 1;
                self.shared.snapshot.write().await.last_error = Some(message.clone());
                self.emitter.emit_error(&message, false);
            }

            let tasks = scan.tasks;
            let mut blocked: HashSet<RecordKey> = HashSet::new();
            let mut progressed = false;

            for task in tasks {
                let key = task.record_key();
                if blocked.contains(&key) {
                    continue;
                }

                if task.status == TaskStatus::InFlight {
                    // Claim left by an interrupted drain; outcome unknown.
                    outbox.release(task.task_id).await?;
                }

                if !task.is_eligible(self.clock.now()) {
                    blocked.insert(key);
                    continue;
                }

                if !self.monitor.is_online() {
                    info!("Connectivity lost; drain stopped");
                    return Ok(DrainOutcome::Interrupted(stats));
                }

                outbox.mark_in_flight(task.task_id).await?;
                progressed = true;

                match self.deliver(&task).await {
                    Delivery::Acked(ack) => {
                        outbox.mark_succeeded(task.task_id).await?;
                        stats.delivered += 1;
                        self.shared.snapshot.write().await.last_error = None;
                        debug!(
                            task_id = task.task_id,
                            table = %task.table,
                            record_id = task.record_id,
                            remote_id = ?ack.remote_id,
                            "Task delivered"
                        );
                    }
                    Delivery::ConnectivityLost => {
                        outbox.release(task.task_id).await?;
                        info!(task_id = task.task_id, "Connectivity lost mid-call; task released");
                        return Ok(DrainOutcome::Interrupted(stats));
                    }
                    Delivery::Failed(err) => {
                        let message = err.to_string();
                        let attempts = task.attempts + 1;
                        self.shared.snapshot.write().await.last_error = Some(message.clone());

                        if err.retryable && self.policy.should_retry(attempts) {
                            let delay = self.policy.delay_for(attempts);
                            let next = self.clock.now()
                                + chrono::Duration::from_std(delay)
                                    .unwrap_or_else(|_| chrono::Duration::zero());
                            outbox.reschedule(task.task_id, next, &message).await?;
                            stats.rescheduled += 1;
                            blocked.insert(key);

                            warn!(
                                task_id = task.task_id,
                                attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %message,
                                "Delivery failed; retry scheduled"
                            );
                            self.emitter.emit_error(&message, true);
                        } else {
                            outbox.mark_failed(task.task_id, &message).await?;
                            stats.dead_lettered += 1;

                            error!(
                                task_id = task.task_id,
                                table = %task.table,
                                record_id = task.record_id,
                                attempts,
                                error = %message,
                                "Task dead-lettered"
                            );
                            self.emitter.emit_dead_letter(&task, &message);
                        }
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        Ok(DrainOutcome::Completed(stats))
    }

    /// One remote call, raced against the request timeout and connectivity.
    async fn deliver(&self, task: &SyncTask) -> Delivery {
        let key = task.idempotency_key(self.db.origin_id());
        let timeout = self.settings.request_timeout;

        tokio::select! {
            result = tokio::time::timeout(timeout, self.remote.apply(task, &key)) => match result {
                Ok(Ok(ack)) => Delivery::Acked(ack),
                Ok(Err(err)) => Delivery::Failed(err),
                Err(_) => Delivery::Failed(RemoteError::timeout(timeout)),
            },
            _ = self.monitor.wait_offline() => Delivery::ConnectivityLost,
        }
    }

    /// Time until the earliest rescheduled task becomes eligible.
    async fn next_wake(&self) -> SyncResult<Option<Duration>> {
        let now = self.clock.now();
        let tasks = self.db.outbox().peek_pending().await?;

        Ok(tasks
            .iter()
            .filter_map(|task| task.next_eligible_at)
            .filter(|at| *at > now)
            .min()
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO)))
    }

    /// Removes succeeded tasks older than the retention window.
    pub async fn compact(&self) -> SyncResult<u64> {
        let cutoff = self.clock.now() - self.settings.retention;
        Ok(self.db.outbox().compact(cutoff).await?)
    }

    // =========================================================================
    // Worker Loop
    // =========================================================================

    /// Runs until `shutdown` flips (or its sender is dropped).
    ///
    /// A drain cut short by shutdown leaves its claimed task `in_flight`;
    /// the next open of the database returns it to `pending`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.monitor.subscribe();
        let signal = self.db.sync_signal();
        let reporter = self.reporter();

        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_compaction: Option<Instant> = None;

        info!(
            tick_ms = self.settings.tick_interval.as_millis() as u64,
            max_attempts = self.policy.max_attempts,
            "Drain worker started"
        );

        loop {
            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                outcome = self.drain() => outcome,
            };
            self.after_drain(outcome, &reporter).await;

            if last_compaction.map_or(true, |at| at.elapsed() >= self.settings.compaction_interval) {
                last_compaction = Some(Instant::now());
                if let Err(e) = self.compact().await {
                    warn!(error = %e, "Outbox compaction failed");
                }
            }

            let wake = if self.monitor.is_online() {
                match self.next_wake().await {
                    Ok(wake) => wake,
                    Err(e) => {
                        warn!(error = %e, "Could not compute next retry time");
                        None
                    }
                }
            } else {
                None
            };
            self.shared.snapshot.write().await.state = if wake.is_some() {
                DrainState::BackoffWait
            } else {
                DrainState::Idle
            };

            let backoff_timer = async move {
                match wake {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = signal.notified() => {
                    debug!("Drain triggered by outbox signal");
                }
                event = events.recv() => match event {
                    Ok(ConnectivityEvent::BecameOnline) => {
                        info!("Back online; draining outbox");
                        self.emit_status(&reporter).await;
                    }
                    Ok(ConnectivityEvent::BecameOffline) => {
                        self.emit_status(&reporter).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Connectivity events lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Connectivity channel closed");
                    }
                },
                _ = ticker.tick(), if self.monitor.is_online() => {
                    debug!("Periodic drain tick");
                }
                _ = backoff_timer => {
                    debug!("Backoff timer fired");
                }
            }
        }

        self.shared.snapshot.write().await.state = DrainState::Idle;
        info!("Drain worker stopped");
    }

    async fn after_drain(&self, outcome: SyncResult<DrainOutcome>, reporter: &StatusReporter) {
        match outcome {
            Ok(DrainOutcome::Completed(stats)) | Ok(DrainOutcome::Interrupted(stats)) => {
                if stats.is_empty() {
                    return;
                }
                info!(
                    delivered = stats.delivered,
                    rescheduled = stats.rescheduled,
                    dead_lettered = stats.dead_lettered,
                    "Drain finished"
                );
                match self.db.outbox().count_by_status().await {
                    Ok(counts) => self.emitter.emit_progress(counts.outstanding(), counts.succeeded),
                    Err(e) => warn!(error = %e, "Could not count outbox tasks"),
                }
                self.emit_status(reporter).await;
            }
            Ok(DrainOutcome::Offline) => debug!("Offline; drain skipped"),
            Ok(DrainOutcome::AlreadyRunning) => {}
            Err(e) => {
                error!(error = %e, "Drain failed");
                self.emitter.emit_error(&e.to_string(), e.is_retryable());
            }
        }
    }

    async fn emit_status(&self, reporter: &StatusReporter) {
        match reporter.status().await {
            Ok(status) => self.emitter.emit_status(&status),
            Err(e) => warn!(error = %e, "Could not build sync status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{RecordingEmitter, ScriptedRemote};
    use depot_core::{Fields, SyncAction};
    use depot_db::DbConfig;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    struct Harness {
        db: Database,
        remote: Arc<ScriptedRemote>,
        monitor: ConnectivityMonitor,
        clock: Arc<ManualClock>,
        worker: DrainWorker,
    }

    async fn harness(online: bool, settings: WorkerSettings) -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let remote = Arc::new(ScriptedRemote::with_clock(clock.clone()));
        let monitor = ConnectivityMonitor::new(online);
        let worker = DrainWorker::new(
            db.clone(),
            remote.clone(),
            monitor.clone(),
            RetryPolicy::default(),
            settings,
        )
        .with_clock(clock.clone());

        Harness {
            db,
            remote,
            monitor,
            clock,
            worker,
        }
    }

    async fn create_item(db: &Database, name: &str) -> i64 {
        db.records()
            .create("inventory", fields(json!({ "name": name, "stock": 5 })))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_offline_drain_does_nothing() {
        let h = harness(false, WorkerSettings::default()).await;
        create_item(&h.db, "Brake Pad").await;

        assert_eq!(h.worker.drain().await.unwrap(), DrainOutcome::Offline);
        assert!(h.remote.calls().is_empty());
        assert_eq!(h.db.outbox().count_by_status().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_online_drain_delivers_pending_task() {
        let h = harness(false, WorkerSettings::default()).await;
        let id = create_item(&h.db, "Brake Pad").await;

        h.monitor.set_online(true);
        let outcome = h.worker.drain().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainStats {
                delivered: 1,
                ..Default::default()
            })
        );

        let calls = h.remote.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].table, "inventory");
        assert_eq!(calls[0].record_id, id);
        assert_eq!(calls[0].action, SyncAction::Create);
        assert_eq!(
            calls[0].idempotency_key,
            format!("{}:{}", h.db.origin_id(), calls[0].task_id)
        );

        let counts = h.db.outbox().count_by_status().await.unwrap();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.succeeded, 1);

        let status = h.worker.reporter().status().await.unwrap();
        assert_eq!(status.last_drain_at, Some(h.clock.now()));
        assert_eq!(status.drain_state, DrainState::Idle);
    }

    #[tokio::test]
    async fn test_retryable_failures_back_off_then_dead_letter() {
        let h = harness(true, WorkerSettings::default()).await;
        create_item(&h.db, "Brake Pad").await;
        h.remote.push_status(503, 3);
        let start = h.clock.now();

        // Attempt 1 fails: retry in 5s.
        let outcome = h.worker.drain().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainStats {
                rescheduled: 1,
                ..Default::default()
            })
        );
        let task = h.db.outbox().peek_pending().await.unwrap().remove(0);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.next_eligible_at, Some(start + chrono::Duration::seconds(5)));
        assert_eq!(task.last_error.as_deref(), Some("HTTP 503: scripted"));

        // Not yet eligible.
        h.worker.drain().await.unwrap();
        assert_eq!(h.remote.calls().len(), 1);

        // Attempt 2 fails: retry in 10s.
        h.clock.advance(Duration::from_secs(5));
        h.worker.drain().await.unwrap();
        let task = h.db.outbox().get(task.task_id).await.unwrap();
        assert_eq!(task.attempts, 2);
        assert_eq!(
            task.next_eligible_at,
            Some(start + chrono::Duration::seconds(15))
        );

        // Attempt 3 fails: out of attempts.
        h.clock.advance(Duration::from_secs(10));
        let outcome = h.worker.drain().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainStats {
                dead_lettered: 1,
                ..Default::default()
            })
        );

        let calls = h.remote.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].at - calls[0].at, chrono::Duration::seconds(5));
        assert_eq!(calls[2].at - calls[1].at, chrono::Duration::seconds(10));

        let status = h.worker.reporter().status().await.unwrap();
        assert_eq!(status.failed_count, 1);
        assert_eq!(status.pending_count, 0);

        let dead = h.db.outbox().dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_terminal_failure_dead_letters_immediately() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut h = harness(true, WorkerSettings::default()).await;
        h.worker = h.worker.clone().with_emitter(emitter.clone());

        create_item(&h.db, "Brake Pad").await;
        create_item(&h.db, "Oil Filter").await;
        h.remote.push_status(422, 1);

        let outcome = h.worker.drain().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainStats {
                delivered: 1,
                dead_lettered: 1,
                ..Default::default()
            })
        );

        let dead = h.db.outbox().dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("HTTP 422: scripted"));
        assert_eq!(emitter.dead_letters(), vec![dead[0].task_id]);
    }

    #[tokio::test]
    async fn test_corrupted_task_alerts_and_queue_continues() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut h = harness(true, WorkerSettings::default()).await;
        h.worker = h.worker.clone().with_emitter(emitter.clone());

        sqlx::query(
            "INSERT INTO sync_tasks (table_name, record_id, action, payload, status, attempts, created_at)
             VALUES ('inventory', 'abc', 'create', '{}', 'pending', 0, ?1)",
        )
        .bind(Utc::now())
        .execute(h.db.pool())
        .await
        .unwrap();
        create_item(&h.db, "Brake Pad").await;

        let outcome = h.worker.drain().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainStats {
                delivered: 1,
                dead_lettered: 1,
                ..Default::default()
            })
        );
        assert_eq!(h.remote.calls().len(), 1);

        let errors = emitter.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("queue corruption"));

        let reporter = h.worker.reporter();
        let status = reporter.status().await.unwrap();
        assert_eq!(status.failed_count, 1);
        assert_eq!(status.succeeded_count, 1);
        assert_eq!(reporter.unreadable_dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_idle_drain_keeps_last_drain_time_and_success_clears_error() {
        let h = harness(true, WorkerSettings::default()).await;
        let reporter = h.worker.reporter();

        h.worker.drain().await.unwrap();
        assert!(reporter.status().await.unwrap().last_drain_at.is_none());

        create_item(&h.db, "Brake Pad").await;
        h.remote.push_status(503, 1);
        h.worker.drain().await.unwrap();
        let first = reporter.status().await.unwrap();
        assert_eq!(first.last_drain_at, Some(h.clock.now()));
        assert_eq!(first.last_error.as_deref(), Some("HTTP 503: scripted"));

        // Backoff not elapsed: nothing attempted, timestamp unchanged.
        h.clock.advance(Duration::from_secs(1));
        h.worker.drain().await.unwrap();
        assert_eq!(reporter.status().await.unwrap().last_drain_at, first.last_drain_at);

        h.clock.advance(Duration::from_secs(4));
        h.worker.drain().await.unwrap();
        let status = reporter.status().await.unwrap();
        assert_eq!(status.succeeded_count, 1);
        assert_eq!(status.last_drain_at, Some(h.clock.now()));
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_per_record_order_survives_retry() {
        let h = harness(true, WorkerSettings::default()).await;
        let a = create_item(&h.db, "Brake Pad").await;
        h.worker.drain().await.unwrap();

        h.db.records()
            .update("inventory", a, fields(json!({ "name": "Brake Pad", "stock": 4 })))
            .await
            .unwrap();
        h.db.records().delete("inventory", a).await.unwrap();
        let b = create_item(&h.db, "Oil Filter").await;

        // The update fails once; the delete must wait, record b must not.
        h.remote.push_status(503, 1);
        h.worker.drain().await.unwrap();

        let seen: Vec<(i64, SyncAction)> = h
            .remote
            .calls()
            .iter()
            .map(|c| (c.record_id, c.action))
            .collect();
        assert_eq!(
            seen,
            vec![
                (a, SyncAction::Create),
                (a, SyncAction::Update),
                (b, SyncAction::Create),
            ]
        );

        h.clock.advance(Duration::from_secs(5));
        h.worker.drain().await.unwrap();

        let for_a: Vec<SyncAction> = h
            .remote
            .calls()
            .iter()
            .filter(|c| c.record_id == a)
            .map(|c| c.action)
            .collect();
        assert_eq!(
            for_a,
            vec![
                SyncAction::Create,
                SyncAction::Update,
                SyncAction::Update,
                SyncAction::Delete
            ]
        );
        assert_eq!(h.db.outbox().count_by_status().await.unwrap().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_connectivity_loss_releases_task() {
        let settings = WorkerSettings {
            request_timeout: Duration::from_secs(30),
            ..WorkerSettings::default()
        };
        let h = harness(true, settings).await;
        create_item(&h.db, "Brake Pad").await;
        h.remote.set_latency(Duration::from_secs(20));

        let worker = h.worker.clone();
        let drain = tokio::spawn(async move { worker.drain().await });

        h.remote.wait_for_calls(1).await;
        h.monitor.set_online(false);

        let outcome = tokio::time::timeout(Duration::from_secs(5), drain)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, DrainOutcome::Interrupted(DrainStats::default()));

        let task = h.db.outbox().peek_pending().await.unwrap().remove(0);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert!(task.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable_failure() {
        let settings = WorkerSettings {
            request_timeout: Duration::from_millis(50),
            ..WorkerSettings::default()
        };
        let h = harness(true, settings).await;
        create_item(&h.db, "Brake Pad").await;
        h.remote.set_latency(Duration::from_secs(5));

        let outcome = h.worker.drain().await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainStats {
                rescheduled: 1,
                ..Default::default()
            })
        );

        let task = h.db.outbox().peek_pending().await.unwrap().remove(0);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.last_error.as_deref(), Some("request timed out after 50ms"));
    }

    #[tokio::test]
    async fn test_concurrent_drains_coalesce() {
        let h = harness(true, WorkerSettings::default()).await;
        create_item(&h.db, "Brake Pad").await;
        h.remote.set_latency(Duration::from_millis(300));

        let worker = h.worker.clone();
        let first = tokio::spawn(async move { worker.drain().await });
        h.remote.wait_for_calls(1).await;

        assert_eq!(h.worker.drain().await.unwrap(), DrainOutcome::AlreadyRunning);

        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, DrainOutcome::Completed(s) if s.delivered == 1));
        assert_eq!(h.remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_claim_is_redelivered() {
        let h = harness(true, WorkerSettings::default()).await;
        create_item(&h.db, "Brake Pad").await;

        let task = h.db.outbox().peek_pending().await.unwrap().remove(0);
        h.db.outbox().mark_in_flight(task.task_id).await.unwrap();

        h.worker.drain().await.unwrap();
        assert_eq!(h.remote.calls().len(), 1);
        assert_eq!(
            h.db.outbox().get(task.task_id).await.unwrap().status,
            TaskStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_compact_removes_old_succeeded_tasks() {
        let h = harness(true, WorkerSettings::default()).await;
        create_item(&h.db, "Brake Pad").await;
        h.worker.drain().await.unwrap();

        assert_eq!(h.worker.compact().await.unwrap(), 0);

        h.clock.advance(Duration::from_secs(8 * 24 * 60 * 60));
        assert_eq!(h.worker.compact().await.unwrap(), 1);
        assert_eq!(h.db.outbox().count_by_status().await.unwrap().succeeded, 0);
    }

    // =========================================================================
    // Worker loop (real time)
    // =========================================================================

    async fn wait_until_succeeded(db: &Database, n: i64) {
        for _ in 0..200 {
            if db.outbox().count_by_status().await.unwrap().succeeded >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tasks were not delivered in time");
    }

    #[tokio::test]
    async fn test_loop_drains_on_reconnect_and_append() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(ScriptedRemote::new());
        let monitor = ConnectivityMonitor::new(false);
        let worker = DrainWorker::new(
            db.clone(),
            remote.clone(),
            monitor.clone(),
            RetryPolicy::default(),
            WorkerSettings {
                tick_interval: Duration::from_secs(60),
                ..WorkerSettings::default()
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        create_item(&db, "Brake Pad").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(remote.calls().is_empty());

        monitor.set_online(true);
        tokio::time::timeout(Duration::from_secs(2), remote.wait_for_calls(1))
            .await
            .unwrap();
        wait_until_succeeded(&db, 1).await;

        create_item(&db, "Oil Filter").await;
        tokio::time::timeout(Duration::from_secs(2), remote.wait_for_calls(2))
            .await
            .unwrap();
        wait_until_succeeded(&db, 2).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_loop_retries_when_backoff_timer_fires() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(ScriptedRemote::new());
        remote.push_status(503, 1);
        let monitor = ConnectivityMonitor::new(true);
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            ..RetryPolicy::default()
        };
        let worker = DrainWorker::new(
            db.clone(),
            remote.clone(),
            monitor,
            policy,
            WorkerSettings {
                tick_interval: Duration::from_secs(60),
                ..WorkerSettings::default()
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        create_item(&db, "Brake Pad").await;
        tokio::time::timeout(Duration::from_secs(3), remote.wait_for_calls(2))
            .await
            .unwrap();
        wait_until_succeeded(&db, 1).await;

        let calls = remote.calls();
        assert!(calls[1].at - calls[0].at >= chrono::Duration::milliseconds(100));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
