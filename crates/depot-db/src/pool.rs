//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  Host application startup                                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::new(path) ← Configure pool settings                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await                                           │
//! │       ├── create pool (WAL, synchronous=FULL, foreign keys)            │
//! │       ├── run migrations                                               │
//! │       ├── load / create origin id                                      │
//! │       └── in_flight tasks → pending (unknown outcome from last run)    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │  Database (Clone, cheap)                 │                           │
//! │  │  ├── SqlitePool                          │                           │
//! │  │  ├── per-table write locks               │                           │
//! │  │  └── sync signal (Notify) ──────────────────► drain worker          │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       ├── db.records()   → RecordRepository (mutations + outbox)      │
//! │       ├── db.typed::<T>()→ TypedTable<T>                               │
//! │       └── db.outbox()    → OutboxRepository (drain side)               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Durability
//! WAL journal with `synchronous = FULL`: a committed mutation and its sync
//! task survive power loss, not only process crashes.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use depot_core::Entity;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::outbox::OutboxRepository;
use crate::repository::records::{RecordRepository, TableLocks, TypedTable};

const ORIGIN_KEY: &str = "origin_id";

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/depot.db")
///     .max_connections(5)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection timeout duration.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true. When disabled the schema must already exist.
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    ///
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// Every call yields an isolated database.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // In-memory requires single connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            run_migrations: true,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == ":memory:"
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
///
/// Cheap to clone; all clones share the pool, the per-table locks and the
/// sync signal. Construct one per database file and inject it where needed.
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,

    /// Serializes mutations per table.
    locks: TableLocks,

    /// Notified after every committed mutation.
    sync_signal: Arc<Notify>,

    /// Stable id of this database, part of every idempotency key.
    origin_id: Arc<str>,
}

impl Database {
    /// Opens (or creates) the database.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite: WAL, synchronous FULL, foreign keys
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    /// 5. Loads the origin id, generating one on first open
    /// 6. Returns tasks left `in_flight` by a previous run to `pending`
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            // FULL: fsync on every commit; the outbox must survive power loss
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .create_if_missing(true);

        debug!("Connection options configured");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout));

        // An in-memory database lives exactly as long as its one connection.
        if config.is_in_memory() {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        if config.run_migrations {
            info!("Running database migrations");
            migrations::run_migrations(&pool).await?;
            info!("Migrations complete");
        }

        let origin_id = load_origin_id(&pool).await?;

        let db = Database {
            pool,
            locks: TableLocks::default(),
            sync_signal: Arc::new(Notify::new()),
            origin_id: origin_id.into(),
        };

        let recovered = db.outbox().recover_in_flight().await?;
        if recovered > 0 {
            warn!(
                recovered,
                "Tasks with unknown outcome returned to pending; they will be redelivered"
            );
        }

        Ok(db)
    }

    /// Returns a reference to the connection pool.
    ///
    /// For diagnostics and tests. Writing records through the pool bypasses
    /// the outbox.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the record repository (mutations enqueue sync tasks).
    ///
    /// ## Example
    /// ```rust,ignore
    /// let item = db.records().create("inventory", fields).await?;
    /// ```
    pub fn records(&self) -> RecordRepository {
        RecordRepository::new(
            self.pool.clone(),
            self.locks.clone(),
            self.sync_signal.clone(),
        )
    }

    /// Returns a typed view over the table bound to `T`.
    pub fn typed<T: Entity>(&self) -> TypedTable<T> {
        TypedTable::new(self.records())
    }

    /// Returns the outbox repository.
    pub fn outbox(&self) -> OutboxRepository {
        OutboxRepository::new(self.pool.clone())
    }

    /// Signal notified after every committed mutation.
    ///
    /// Notifications coalesce: many commits while nobody waits leave a
    /// single wake-up.
    pub fn sync_signal(&self) -> Arc<Notify> {
        self.sync_signal.clone()
    }

    /// Stable identifier of this database.
    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    /// Closes the database connection pool.
    ///
    /// After calling close, all repository operations will fail.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

async fn load_origin_id(pool: &SqlitePool) -> DbResult<String> {
    sqlx::query("INSERT OR IGNORE INTO depot_meta (key, value) VALUES (?1, ?2)")
        .bind(ORIGIN_KEY)
        .bind(Uuid::new_v4().to_string())
        .execute(pool)
        .await?;

    let origin: String = sqlx::query_scalar("SELECT value FROM depot_meta WHERE key = ?1")
        .bind(ORIGIN_KEY)
        .fetch_one(pool)
        .await?;

    debug!(origin_id = %origin, "Origin id loaded");
    Ok(origin)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Temp file path for tests that reopen the same database.
    pub(crate) fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("depot-test-{}.db", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        assert!(db.health_check().await);
        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2)
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(!config.run_migrations);
        assert!(DbConfig::in_memory().is_in_memory());
    }

    #[tokio::test]
    async fn test_origin_id_is_stable_across_reopen() {
        let path = temp_db_path();

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let first = db.origin_id().to_string();
        db.close().await;

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        assert_eq!(db.origin_id(), first);
        db.close().await;

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_separate_databases_are_isolated() {
        let a = Database::new(DbConfig::in_memory()).await.unwrap();
        let b = Database::new(DbConfig::in_memory()).await.unwrap();

        assert_ne!(a.origin_id(), b.origin_id());
    }
}
