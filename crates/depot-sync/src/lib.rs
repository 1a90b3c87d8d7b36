//! # depot-sync: Sync Drain Worker for Depot
//!
//! Delivers the durable outbox written by `depot-db` to the remote business
//! API, in order, at least once, without ever blocking a local mutation.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  record store ──(same tx)──► sync_tasks ──► Notify ─┐                  │
//! │                                                      │                  │
//! │  ┌──────────────────────────┐                        ▼                  │
//! │  │  ConnectivityMonitor     │ BecameOnline  ┌──────────────────┐       │
//! │  │  set_online / probe      │ ────────────► │   DrainWorker    │       │
//! │  └──────────────────────────┘               │  single-flight   │       │
//! │                                             │  per-record order│       │
//! │  ┌──────────────────────────┐  delays       │  timeout/backoff │       │
//! │  │  RetryPolicy (backoff)   │ ────────────► └────────┬─────────┘       │
//! │  └──────────────────────────┘                        │ apply()         │
//! │                                                      ▼                  │
//! │  ┌──────────────────────────┐               ┌──────────────────┐       │
//! │  │  StatusReporter          │               │ RemoteApi (host) │       │
//! │  │  counts, dead letters    │               └──────────────────┘       │
//! │  └──────────────────────────┘                                          │
//! │                                                                         │
//! │  STATUS EVENTS (to the host UI via SyncEventEmitter):                  │
//! │  • "sync://status"      • "sync://progress"                            │
//! │  • "sync://error"       • "sync://dead-letter"                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `SyncEngine`, builder and handle
//! - [`worker`] - Drain state machine
//! - [`connectivity`] - Online/offline state and health probe
//! - [`retry`] - Exponential backoff policy
//! - [`remote`] - Remote API adapter trait and error classification
//! - [`reporter`] - Status, event emitter, dead letters
//! - [`clock`] - Time source used for scheduling
//! - [`config`] - Sync configuration (TOML + environment)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use depot_sync::{SyncConfig, SyncEngineBuilder};
//!
//! let config = SyncConfig::load_or_default(None);
//! let handle = SyncEngineBuilder::new(config)
//!     .with_database(db.clone())
//!     .with_remote(remote)
//!     .build()?
//!     .start()
//!     .await?;
//!
//! let status = handle.status().await?;
//! println!("Pending: {}", status.pending_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod remote;
pub mod reporter;
pub mod retry;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use async_trait::async_trait;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConnectivitySettings, DatabaseSettings, DeviceConfig, DrainSettings, OutboxSettings,
    SyncConfig,
};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor};
pub use engine::{SyncEngine, SyncEngineBuilder, SyncEngineHandle};
pub use error::{SyncError, SyncResult};
pub use remote::{RemoteAck, RemoteApi, RemoteError};
pub use reporter::{NoOpEmitter, StatusReporter, SyncEventEmitter, SyncStatus};
pub use retry::RetryPolicy;
pub use worker::{DrainOutcome, DrainState, DrainStats, DrainWorker, WorkerSettings};
