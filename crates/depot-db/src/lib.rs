//! # depot-db: Record Store and Outbox for Depot
//!
//! Local SQLite storage for business records, where every mutation is
//! committed together with the sync task that will replay it remotely.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Depot Data Flow                                │
//! │                                                                         │
//! │  Host application (create / update / delete)                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     depot-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ RecordRepo    │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ TypedTable    │    │ 001_init.sql │  │   │
//! │  │   │ table locks   │    │ OutboxRepo    │    │              │  │   │
//! │  │   │ sync signal   │    │               │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                   │                             │
//! │       ▼                                   ▼ sync signal                 │
//! │  ┌──────────────────────┐        ┌──────────────────────────┐          │
//! │  │   SQLite (WAL, FULL) │        │ depot-sync drain worker  │          │
//! │  └──────────────────────┘        └──────────────────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Record and outbox repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use depot_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/depot.db")).await?;
//!
//! let record = db.records().create("inventory", fields).await?;
//! let pending = db.outbox().peek_pending().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::outbox::{OutboxRepository, PendingScan, UnreadableTask};
pub use repository::records::{RecordRepository, TypedTable};
