//! # Record Repository
//!
//! Schema-less record storage where every mutation enqueues its sync task.
//!
//! ## Mutation Flow
//! ```text
//! create("inventory", {name, stock})
//!     │
//!     ├── validate table name + fields
//!     ├── lock table "inventory"          (other tables proceed)
//!     │
//!     ├── BEGIN
//!     │     bump table_sequences high-water → id
//!     │     INSERT INTO records
//!     │     INSERT INTO sync_tasks (create, snapshot)
//!     ├── COMMIT
//!     │
//!     ├── unlock
//!     └── sync_signal.notify_one()        → drain worker wakes up
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tracing::debug;

use depot_core::validation::{validate_fields, validate_record_id, validate_table_name};
use depot_core::{Entity, Fields, Record, SyncAction, TypedRecord};

use crate::error::{DbError, DbResult};
use crate::repository::outbox;

// =============================================================================
// Per-table Locks
// =============================================================================

/// One async mutex per table name.
///
/// Serializes mutations (and id assignment) within a table while leaving
/// other tables free.
#[derive(Debug, Clone, Default)]
pub(crate) struct TableLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl TableLocks {
    async fn acquire(&self, table: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(table.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    table_name: String,
    id: i64,
    fields: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for Record {
    type Error = DbError;

    fn try_from(row: RecordRow) -> DbResult<Self> {
        Ok(Record {
            fields: serde_json::from_str(&row.fields)?,
            table: row.table_name,
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for record mutations and reads.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    pool: SqlitePool,
    locks: TableLocks,
    sync_signal: Arc<Notify>,
}

impl RecordRepository {
    pub(crate) fn new(pool: SqlitePool, locks: TableLocks, sync_signal: Arc<Notify>) -> Self {
        RecordRepository {
            pool,
            locks,
            sync_signal,
        }
    }

    /// Creates a record, assigning the next id in `table`.
    ///
    /// Ids are never reused, even after the highest record is deleted.
    pub async fn create(&self, table: &str, fields: Fields) -> DbResult<Record> {
        validate_table_name(table)?;
        validate_fields(&fields)?;

        let _guard = self.locks.acquire(table).await;
        let now = Utc::now();
        let payload = serde_json::to_string(&fields)?;

        let mut tx = self.begin().await?;

        // First statement writes, so the transaction takes the write lock up
        // front instead of upgrading from a read snapshot.
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO table_sequences (table_name, high_water)
            VALUES (?1, (SELECT COALESCE(MAX(id), 0) + 1 FROM records WHERE table_name = ?1))
            ON CONFLICT(table_name) DO UPDATE SET
                high_water = MAX(table_sequences.high_water, excluded.high_water - 1) + 1
            RETURNING high_water
            "#,
        )
        .bind(table)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO records (table_name, id, fields, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
        )
        .bind(table)
        .bind(id)
        .bind(&payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        outbox::append(&mut tx, table, id, SyncAction::Create, &payload, now).await?;
        self.commit(tx).await?;

        debug!(table, id, "Record created");
        Ok(Record {
            table: table.to_string(),
            id,
            fields,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces the fields of an existing record.
    pub async fn update(&self, table: &str, id: i64, fields: Fields) -> DbResult<Record> {
        validate_table_name(table)?;
        validate_record_id(id)?;
        validate_fields(&fields)?;

        let _guard = self.locks.acquire(table).await;
        self.write_update(table, id, fields).await
    }

    /// Shallow-merges `patch` into the record's fields.
    ///
    /// Keys in `patch` overwrite existing ones; other keys are kept. Produces
    /// a single `update` task carrying the merged snapshot.
    pub async fn merge(&self, table: &str, id: i64, patch: Fields) -> DbResult<Record> {
        validate_table_name(table)?;
        validate_record_id(id)?;
        validate_fields(&patch)?;

        // Holding the table lock keeps the read and the write consistent.
        let _guard = self.locks.acquire(table).await;
        let mut fields = self.get(table, id).await?.fields;
        fields.extend(patch);
        self.write_update(table, id, fields).await
    }

    /// Hard-deletes a record. The `delete` task carries its last fields.
    pub async fn delete(&self, table: &str, id: i64) -> DbResult<Record> {
        validate_table_name(table)?;
        validate_record_id(id)?;

        let _guard = self.locks.acquire(table).await;
        let now = Utc::now();

        let mut tx = self.begin().await?;

        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            DELETE FROM records
            WHERE table_name = ?1 AND id = ?2
            RETURNING table_name, id, fields, created_at, updated_at
            "#,
        )
        .bind(table)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(DbError::not_found("Record", format!("{}/{}", table, id)));
        };

        outbox::append(&mut tx, table, id, SyncAction::Delete, &row.fields, now).await?;
        self.commit(tx).await?;

        debug!(table, id, "Record deleted");
        Record::try_from(row)
    }

    /// Fetches a record.
    pub async fn get(&self, table: &str, id: i64) -> DbResult<Record> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT table_name, id, fields, created_at, updated_at
            FROM records
            WHERE table_name = ?1 AND id = ?2
            "#,
        )
        .bind(table)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Record::try_from(row),
            None => Err(DbError::not_found("Record", format!("{}/{}", table, id))),
        }
    }

    /// All records in `table`, ordered by id.
    pub async fn list(&self, table: &str) -> DbResult<Vec<Record>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT table_name, id, fields, created_at, updated_at
            FROM records
            WHERE table_name = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Record::try_from).collect()
    }

    /// Records in `table` matching `predicate`, ordered by id.
    pub async fn list_where<F>(&self, table: &str, predicate: F) -> DbResult<Vec<Record>>
    where
        F: Fn(&Record) -> bool,
    {
        let mut records = self.list(table).await?;
        records.retain(|r| predicate(r));
        Ok(records)
    }

    /// Number of records in `table`.
    pub async fn count(&self, table: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE table_name = ?1")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn write_update(&self, table: &str, id: i64, fields: Fields) -> DbResult<Record> {
        let now = Utc::now();
        let payload = serde_json::to_string(&fields)?;

        let mut tx = self.begin().await?;

        let created_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE records SET
                fields = ?3,
                updated_at = ?4
            WHERE table_name = ?1 AND id = ?2
            RETURNING created_at
            "#,
        )
        .bind(table)
        .bind(id)
        .bind(&payload)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(created_at) = created_at else {
            return Err(DbError::not_found("Record", format!("{}/{}", table, id)));
        };

        outbox::append(&mut tx, table, id, SyncAction::Update, &payload, now).await?;
        self.commit(tx).await?;

        debug!(table, id, "Record updated");
        Ok(Record {
            table: table.to_string(),
            id,
            fields,
            created_at,
            updated_at: now,
        })
    }

    async fn begin(&self) -> DbResult<sqlx::Transaction<'static, sqlx::Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))
    }

    async fn commit(&self, tx: sqlx::Transaction<'static, sqlx::Sqlite>) -> DbResult<()> {
        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        self.sync_signal.notify_one();
        Ok(())
    }
}

// =============================================================================
// Typed Access
// =============================================================================

/// Record access bound to one [`Entity`] type.
///
/// ## Example
/// ```rust,ignore
/// let items = db.typed::<InventoryItem>();
/// let pad = items.create(&InventoryItem { name: "Brake Pad".into(), stock: 5, .. }).await?;
/// ```
#[derive(Debug, Clone)]
pub struct TypedTable<T> {
    records: RecordRepository,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> TypedTable<T> {
    pub(crate) fn new(records: RecordRepository) -> Self {
        TypedTable {
            records,
            _entity: PhantomData,
        }
    }

    pub async fn create(&self, entity: &T) -> DbResult<TypedRecord<T>> {
        entity.validate()?;
        let record = self.records.create(T::TABLE, entity.to_fields()?).await?;
        Ok(T::from_record(&record)?)
    }

    pub async fn update(&self, id: i64, entity: &T) -> DbResult<TypedRecord<T>> {
        entity.validate()?;
        let record = self.records.update(T::TABLE, id, entity.to_fields()?).await?;
        Ok(T::from_record(&record)?)
    }

    pub async fn delete(&self, id: i64) -> DbResult<TypedRecord<T>> {
        let record = self.records.delete(T::TABLE, id).await?;
        Ok(T::from_record(&record)?)
    }

    pub async fn get(&self, id: i64) -> DbResult<TypedRecord<T>> {
        let record = self.records.get(T::TABLE, id).await?;
        Ok(T::from_record(&record)?)
    }

    pub async fn list(&self) -> DbResult<Vec<TypedRecord<T>>> {
        self.records
            .list(T::TABLE)
            .await?
            .iter()
            .map(|r| T::from_record(r).map_err(DbError::from))
            .collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
