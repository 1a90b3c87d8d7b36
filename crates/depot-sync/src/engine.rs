//! # Sync Engine
//!
//! Wires the connectivity monitor, health probe and drain worker together
//! and hands the host a [`SyncEngineHandle`].
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncEngine Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncEngine                               │  │
//! │  │                                                                  │  │
//! │  │  • Validates config, spawns background tasks                     │  │
//! │  │  • Owns the shutdown channel                                     │  │
//! │  │  • Emits status events to the host UI                            │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Health probe   │  │  DrainWorker   │  │   StatusReporter       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ RemoteApi::    │  │ Outbox → Remote│  │ Counts, online flag,   │    │
//! │  │ health_probe   │  │ with backoff   │  │ dead letters           │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```rust,ignore
//! let db = Database::new(DbConfig::new("depot.db")).await?;
//! let engine = SyncEngineBuilder::new(SyncConfig::load(None)?)
//!     .with_database(db.clone())
//!     .with_remote(Arc::new(MyHttpApi::new()))
//!     .build()?;
//!
//! let handle = engine.start().await?;
//! handle.monitor().set_online(true);
//! // ... record mutations go through `db.records()` ...
//! handle.shutdown().await?;
//! ```

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use depot_core::SyncTask;
use depot_db::{Database, UnreadableTask};

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteApi;
use crate::reporter::{NoOpEmitter, StatusReporter, SyncEventEmitter, SyncStatus};
use crate::retry::RetryPolicy;
use crate::worker::{DrainWorker, WorkerSettings};

// =============================================================================
// Sync Engine
// =============================================================================

/// Configured but not yet running sync engine.
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    db: Database,
    remote: Arc<dyn RemoteApi>,
    monitor: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl SyncEngine {
    /// The monitor the host reports connectivity changes to.
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Spawns the drain worker (and the health probe if enabled).
    pub async fn start(self) -> SyncResult<SyncEngineHandle> {
        self.config.validate()?;

        info!(
            device_id = %self.config.device_id(),
            origin_id = %self.db.origin_id(),
            online = self.monitor.is_online(),
            "Starting sync engine"
        );

        let worker = DrainWorker::new(
            self.db.clone(),
            self.remote.clone(),
            self.monitor.clone(),
            RetryPolicy::from_settings(&self.config.drain),
            WorkerSettings::from_config(&self.config),
        )
        .with_clock(self.clock.clone())
        .with_emitter(self.emitter.clone());
        let reporter = worker.reporter();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let probe = if self.config.connectivity.probe_enabled {
            Some(self.monitor.spawn_probe(
                self.remote.clone(),
                self.config.connectivity.probe_interval(),
                self.config.drain.request_timeout(),
                shutdown_rx.clone(),
            ))
        } else {
            None
        };
        let worker = tokio::spawn(worker.run(shutdown_rx));

        info!("Sync engine started");
        Ok(SyncEngineHandle {
            db: self.db,
            monitor: self.monitor,
            reporter,
            shutdown_tx,
            worker,
            probe,
        })
    }
}

// =============================================================================
// Engine Handle (for external control)
// =============================================================================

/// Handle for controlling a running engine from the host application.
pub struct SyncEngineHandle {
    db: Database,
    monitor: ConnectivityMonitor,
    reporter: StatusReporter,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
    probe: Option<JoinHandle<()>>,
}

impl SyncEngineHandle {
    /// Gets the current sync status.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        self.reporter.status().await
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    /// Asks the worker to drain now. Coalesces with any drain in progress.
    pub fn drain_now(&self) {
        self.db.sync_signal().notify_one();
    }

    pub async fn dead_letters(&self) -> SyncResult<Vec<SyncTask>> {
        self.reporter.dead_letters().await
    }

    pub async fn unreadable_dead_letters(&self) -> SyncResult<Vec<UnreadableTask>> {
        self.reporter.unreadable_dead_letters().await
    }

    pub async fn retry_dead_letter(&self, task_id: i64) -> SyncResult<()> {
        self.reporter.retry_dead_letter(task_id).await
    }

    /// Stops the background tasks and waits for them to exit.
    ///
    /// A remote call still outstanding is abandoned; its task stays
    /// `in_flight` until the database is next opened.
    pub async fn shutdown(self) -> SyncResult<()> {
        info!("Shutting down sync engine");

        if self.shutdown_tx.send(true).is_err() {
            warn!("Sync tasks already stopped");
        }

        self.worker.await?;
        if let Some(probe) = self.probe {
            probe.await?;
        }

        info!("Sync engine stopped");
        Ok(())
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating SyncEngine with options.
pub struct SyncEngineBuilder {
    config: SyncConfig,
    db: Option<Database>,
    remote: Option<Arc<dyn RemoteApi>>,
    monitor: Option<ConnectivityMonitor>,
    clock: Option<Arc<dyn Clock>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncEngineBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: SyncConfig) -> Self {
        SyncEngineBuilder {
            config,
            db: None,
            remote: None,
            monitor: None,
            clock: None,
            emitter: None,
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteApi>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Shares an existing monitor instead of creating one from config.
    pub fn with_monitor(mut self, monitor: ConnectivityMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the SyncEngine.
    pub fn build(self) -> SyncResult<SyncEngine> {
        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;
        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote API adapter required".into()))?;

        let monitor = self
            .monitor
            .unwrap_or_else(|| ConnectivityMonitor::new(self.config.connectivity.start_online));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncEngine {
            config: Arc::new(self.config),
            db,
            remote,
            monitor,
            clock,
            emitter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingEmitter, ScriptedRemote};
    use depot_db::DbConfig;
    use serde_json::json;
    use std::time::Duration;

    fn fast_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.connectivity.probe_enabled = false;
        config.drain.base_delay_ms = 50;
        config.drain.max_delay_ms = 200;
        config.drain.tick_interval_ms = 60_000;
        config
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..300 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_builder_requires_database_and_remote() {
        let err = SyncEngineBuilder::new(SyncConfig::default())
            .with_remote(Arc::new(ScriptedRemote::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = fast_config();
        config.drain.max_attempts = 0;

        let engine = SyncEngineBuilder::new(config)
            .with_database(db)
            .with_remote(Arc::new(ScriptedRemote::new()))
            .build()
            .unwrap();
        assert!(engine.start().await.is_err());
    }

    #[tokio::test]
    async fn test_offline_then_online_end_to_end() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(ScriptedRemote::new());
        let handle = SyncEngineBuilder::new(fast_config())
            .with_database(db.clone())
            .with_remote(remote.clone())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let record = db
            .records()
            .create(
                "inventory",
                json!({ "name": "Brake Pad", "stock": 5 }).as_object().unwrap().clone(),
            )
            .await
            .unwrap();
        assert_eq!(record.id, 1);

        let status = handle.status().await.unwrap();
        assert_eq!(status.pending_count, 1);
        assert!(!status.is_online);

        handle.monitor().set_online(true);
        wait_for(|| async { handle.status().await.unwrap().succeeded_count == 1 }).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.pending_count, 0);
        assert!(status.is_online);
        assert!(status.last_drain_at.is_some());
        assert_eq!(remote.calls().len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_letter_and_manual_retry() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(ScriptedRemote::new());
        let emitter = Arc::new(RecordingEmitter::default());
        let mut config = fast_config();
        config.connectivity.start_online = true;

        let handle = SyncEngineBuilder::new(config)
            .with_database(db.clone())
            .with_remote(remote.clone())
            .with_emitter(emitter.clone())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        remote.push_status(503, 3);
        db.records()
            .create("customers", json!({ "name": "Ayesha" }).as_object().unwrap().clone())
            .await
            .unwrap();

        wait_for(|| async { handle.status().await.unwrap().failed_count == 1 }).await;
        assert_eq!(remote.calls().len(), 3);
        assert_eq!(emitter.errors().len(), 2);

        let dead = handle.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(emitter.dead_letters(), vec![dead[0].task_id]);
        assert_eq!(
            handle.status().await.unwrap().last_error.as_deref(),
            Some("HTTP 503: scripted")
        );

        handle.retry_dead_letter(dead[0].task_id).await.unwrap();
        wait_for(|| async { handle.status().await.unwrap().succeeded_count == 1 }).await;
        assert_eq!(remote.calls().len(), 4);
        assert!(handle.dead_letters().await.unwrap().is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_now_triggers_worker() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(ScriptedRemote::new());
        let mut config = fast_config();
        config.connectivity.start_online = true;

        let handle = SyncEngineBuilder::new(config)
            .with_database(db.clone())
            .with_remote(remote.clone())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        // A task written behind the record store's back raises no signal.
        sqlx::query(
            "INSERT INTO sync_tasks (table_name, record_id, action, payload, created_at) \
             VALUES ('suppliers', 1, 'create', '{}', ?1)",
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(db.pool())
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(remote.calls().is_empty());

        handle.drain_now();
        wait_for(|| async { handle.status().await.unwrap().succeeded_count == 1 }).await;
        assert_eq!(remote.calls().len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_brings_engine_online() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(ScriptedRemote::new());
        let mut config = fast_config();
        config.connectivity.probe_enabled = true;

        db.records()
            .create("inventory", json!({ "name": "Oil Filter" }).as_object().unwrap().clone())
            .await
            .unwrap();

        let handle = SyncEngineBuilder::new(config)
            .with_database(db.clone())
            .with_remote(remote.clone())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        // The first probe runs immediately and reports the remote healthy.
        wait_for(|| async { handle.status().await.unwrap().succeeded_count == 1 }).await;
        assert!(handle.monitor().is_online());

        handle.shutdown().await.unwrap();
    }
}
