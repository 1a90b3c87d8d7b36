//! # Outbox Repository
//!
//! The durable, ordered log of sync tasks.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  RECORD MUTATION (create / update / delete)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. INSERT / UPDATE / DELETE records ...                       │   │
//! │  │                                                                 │   │
//! │  │  2. INSERT INTO sync_tasks (table_name, record_id, action,     │   │
//! │  │                             payload) VALUES (..., <snapshot>)  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← Both succeed or both fail                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            DRAIN WORKER (depot-sync)                            │   │
//! │  │                                                                 │   │
//! │  │  peek_pending()  → pending + in_flight, ORDER BY task_id       │   │
//! │  │  mark_in_flight  → call remote                                 │   │
//! │  │     ok        → mark_succeeded                                 │   │
//! │  │     retryable → reschedule(next_eligible_at)                   │   │
//! │  │     terminal  → mark_failed (dead letter)                      │   │
//! │  │     offline   → release (no attempt counted)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • A mutation is never committed without its task                      │
//! │  • Tasks survive restarts; unknown outcomes are redelivered            │
//! │  • Malformed rows are dead-lettered, never block the queue             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, info, warn};

use depot_core::{Fields, SyncAction, SyncTask, TaskCounts, TaskStatus};

use crate::error::{DbError, DbResult};

const TASK_COLUMNS: &str = "task_id, \
     CAST(table_name AS TEXT) AS table_name, \
     CAST(record_id AS TEXT) AS record_id, \
     CAST(action AS TEXT) AS action, \
     CAST(payload AS TEXT) AS payload, \
     CAST(status AS TEXT) AS status, \
     CAST(attempts AS TEXT) AS attempts, \
     CAST(created_at AS TEXT) AS created_at, \
     CAST(last_attempt_at AS TEXT) AS last_attempt_at, \
     CAST(next_eligible_at AS TEXT) AS next_eligible_at, \
     CAST(last_error AS TEXT) AS last_error";

// =============================================================================
// Row Mapping
// =============================================================================

/// Raw `sync_tasks` row. Everything except the primary key is selected as
/// nullable text so one bad row can't fail a whole query.
#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    task_id: i64,
    table_name: Option<String>,
    record_id: Option<String>,
    action: Option<String>,
    payload: Option<String>,
    status: Option<String>,
    attempts: Option<String>,
    created_at: Option<String>,
    last_attempt_at: Option<String>,
    next_eligible_at: Option<String>,
    last_error: Option<String>,
}

impl TryFrom<TaskRow> for SyncTask {
    type Error = DbError;

    fn try_from(row: TaskRow) -> DbResult<Self> {
        let id = row.task_id;
        let corrupt = |reason: String| DbError::corrupted(id, reason);

        let table = required(id, "table_name", row.table_name)?;
        let record_id = parse_int::<i64>(id, "record_id", row.record_id)?;
        let action = required(id, "action", row.action)?
            .parse::<SyncAction>()
            .map_err(|e| corrupt(e.to_string()))?;
        let status = required(id, "status", row.status)?
            .parse::<TaskStatus>()
            .map_err(|e| corrupt(e.to_string()))?;
        let payload: Fields = serde_json::from_str(&required(id, "payload", row.payload)?)
            .map_err(|e| corrupt(format!("payload is not a JSON object: {}", e)))?;
        let attempts = parse_int::<u32>(id, "attempts", row.attempts)?;
        let created_at = required(id, "created_at", row.created_at)?;

        Ok(SyncTask {
            task_id: id,
            table,
            record_id,
            action,
            payload,
            status,
            attempts,
            created_at: parse_time(id, "created_at", &created_at)?,
            last_attempt_at: parse_opt_time(id, "last_attempt_at", row.last_attempt_at)?,
            next_eligible_at: parse_opt_time(id, "next_eligible_at", row.next_eligible_at)?,
            last_error: row.last_error,
        })
    }
}

fn required(task_id: i64, column: &str, value: Option<String>) -> DbResult<String> {
    value.ok_or_else(|| DbError::corrupted(task_id, format!("{} is NULL", column)))
}

fn parse_int<T: std::str::FromStr>(task_id: i64, column: &str, value: Option<String>) -> DbResult<T> {
    let value = required(task_id, column, value)?;
    value
        .parse::<T>()
        .map_err(|_| DbError::corrupted(task_id, format!("{} = '{}'", column, value)))
}

fn parse_time(task_id: i64, column: &str, value: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::corrupted(task_id, format!("{} '{}': {}", column, value, e)))
}

fn parse_opt_time(
    task_id: i64,
    column: &str,
    value: Option<String>,
) -> DbResult<Option<DateTime<Utc>>> {
    value
        .map(|v| parse_time(task_id, column, &v))
        .transpose()
}

/// A `sync_tasks` row that could not be decoded into a [`SyncTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableTask {
    pub task_id: i64,
    /// `"queue corruption: ..."` once the row has been dead-lettered.
    pub last_error: Option<String>,
}

/// Result of [`OutboxRepository::scan_pending`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingScan {
    /// Decoded tasks still owed to the remote, in `task_id` order.
    pub tasks: Vec<SyncTask>,
    /// Rows dead-lettered by this scan because they didn't decode.
    pub corrupted: Vec<UnreadableTask>,
}

// =============================================================================
// Append (transaction-scoped)
// =============================================================================

/// Appends a pending task using the caller's transaction.
///
/// Only the record repository calls this, from inside the mutation's
/// transaction, so a task can't exist without its mutation (or vice versa).
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    table: &str,
    record_id: i64,
    action: SyncAction,
    payload_json: &str,
    now: DateTime<Utc>,
) -> DbResult<i64> {
    let task_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO sync_tasks (table_name, record_id, action, payload, status, attempts, created_at)
        VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5)
        RETURNING task_id
        "#,
    )
    .bind(table)
    .bind(record_id)
    .bind(action.as_str())
    .bind(payload_json)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    debug!(task_id, table, record_id, action = %action, "Sync task appended");
    Ok(task_id)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the drain side of the outbox.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Tasks still owed to the remote, strictly in `task_id` order.
    ///
    /// Includes `in_flight` tasks (a claim whose outcome is unknown is
    /// redelivered). Backoff is not applied here; callers check
    /// [`SyncTask::is_eligible`]. Rows that don't decode are dead-lettered
    /// and left out.
    pub async fn peek_pending(&self) -> DbResult<Vec<SyncTask>> {
        Ok(self.scan_pending().await?.tasks)
    }

    /// Like [`peek_pending`](Self::peek_pending), but also reports the rows
    /// it dead-lettered so the caller can raise an alert.
    pub async fn scan_pending(&self) -> DbResult<PendingScan> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_tasks WHERE status IN ('pending', 'in_flight') ORDER BY task_id ASC",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut scan = PendingScan::default();
        for row in rows {
            match SyncTask::try_from(row) {
                Ok(task) => scan.tasks.push(task),
                Err(DbError::Corrupted { task_id, reason }) => {
                    let last_error = self.dead_letter_corrupted(task_id, &reason).await?;
                    scan.corrupted.push(UnreadableTask {
                        task_id,
                        last_error: Some(last_error),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(scan)
    }

    /// Fetches a single task.
    pub async fn get(&self, task_id: i64) -> DbResult<SyncTask> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_tasks WHERE task_id = ?1",
            TASK_COLUMNS
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => SyncTask::try_from(row),
            None => Err(DbError::not_found("SyncTask", task_id)),
        }
    }

    /// All tasks ever recorded for one record, oldest first.
    pub async fn tasks_for_record(&self, table: &str, record_id: i64) -> DbResult<Vec<SyncTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_tasks WHERE table_name = ?1 AND record_id = ?2 ORDER BY task_id ASC",
            TASK_COLUMNS
        ))
        .bind(table)
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncTask::try_from).collect()
    }

    /// Claims a pending task: `pending → in_flight`, stamping the attempt time.
    pub async fn mark_in_flight(&self, task_id: i64) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_tasks SET
                status = 'in_flight',
                last_attempt_at = ?2
            WHERE task_id = ?1 AND status = 'pending'
            "#,
        )
        .bind(task_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncTask (pending)", task_id));
        }

        debug!(task_id, "Task claimed");
        Ok(())
    }

    /// Remote acknowledged the task: `in_flight → succeeded`.
    pub async fn mark_succeeded(&self, task_id: i64) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_tasks SET
                status = 'succeeded',
                next_eligible_at = NULL,
                last_error = NULL
            WHERE task_id = ?1 AND status = 'in_flight'
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncTask (in_flight)", task_id));
        }

        debug!(task_id, "Task succeeded");
        Ok(())
    }

    /// Dead-letters a task: `in_flight → failed`, counting the attempt.
    pub async fn mark_failed(&self, task_id: i64, error: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_tasks SET
                status = 'failed',
                attempts = attempts + 1,
                next_eligible_at = NULL,
                last_error = ?2
            WHERE task_id = ?1 AND status = 'in_flight'
            "#,
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncTask (in_flight)", task_id));
        }

        warn!(task_id, error, "Task dead-lettered");
        Ok(())
    }

    /// Schedules another attempt: `in_flight → pending`, attempts + 1, not
    /// eligible before `next_eligible_at`.
    pub async fn reschedule(
        &self,
        task_id: i64,
        next_eligible_at: DateTime<Utc>,
        error: &str,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_tasks SET
                status = 'pending',
                attempts = attempts + 1,
                next_eligible_at = ?2,
                last_error = ?3
            WHERE task_id = ?1 AND status = 'in_flight'
            "#,
        )
        .bind(task_id)
        .bind(next_eligible_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncTask (in_flight)", task_id));
        }

        debug!(task_id, %next_eligible_at, error, "Task rescheduled");
        Ok(())
    }

    /// Hands a claimed task back without counting an attempt.
    ///
    /// Used when connectivity drops while the remote call is outstanding.
    pub async fn release(&self, task_id: i64) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE sync_tasks SET status = 'pending' WHERE task_id = ?1 AND status = 'in_flight'",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncTask (in_flight)", task_id));
        }

        debug!(task_id, "Task released");
        Ok(())
    }

    /// Returns every `in_flight` task to `pending`. Run once at startup.
    pub async fn recover_in_flight(&self) -> DbResult<u64> {
        let result =
            sqlx::query("UPDATE sync_tasks SET status = 'pending' WHERE status = 'in_flight'")
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Puts a dead-lettered task back in rotation with a fresh retry budget.
    pub async fn retry_dead_letter(&self, task_id: i64) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_tasks SET
                status = 'pending',
                attempts = 0,
                next_eligible_at = NULL
            WHERE task_id = ?1 AND status = 'failed'
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncTask (failed)", task_id));
        }

        info!(task_id, "Dead-lettered task queued for retry");
        Ok(())
    }

    /// Dead-lettered tasks, oldest first.
    ///
    /// Rows too damaged to decode are listed by
    /// [`unreadable_dead_letters`](Self::unreadable_dead_letters) instead.
    pub async fn dead_letters(&self) -> DbResult<Vec<SyncTask>> {
        Ok(self.load_dead_letters().await?.0)
    }

    /// Dead-lettered rows that don't decode, with the error they were
    /// failed with.
    pub async fn unreadable_dead_letters(&self) -> DbResult<Vec<UnreadableTask>> {
        Ok(self.load_dead_letters().await?.1)
    }

    async fn load_dead_letters(&self) -> DbResult<(Vec<SyncTask>, Vec<UnreadableTask>)> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_tasks WHERE status = 'failed' ORDER BY task_id ASC",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        let mut unreadable = Vec::new();
        for row in rows {
            let task_id = row.task_id;
            let last_error = row.last_error.clone();
            match SyncTask::try_from(row) {
                Ok(task) => tasks.push(task),
                Err(DbError::Corrupted { .. }) => unreadable.push(UnreadableTask {
                    task_id,
                    last_error,
                }),
                Err(e) => return Err(e),
            }
        }
        Ok((tasks, unreadable))
    }

    /// Number of tasks per status.
    pub async fn count_by_status(&self) -> DbResult<TaskCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM sync_tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = TaskCounts::default();
        for (status, n) in rows {
            match status.parse::<TaskStatus>() {
                Ok(TaskStatus::Pending) => counts.pending = n,
                Ok(TaskStatus::InFlight) => counts.in_flight = n,
                Ok(TaskStatus::Succeeded) => counts.succeeded = n,
                Ok(TaskStatus::Failed) => counts.failed = n,
                Err(_) => warn!(status = %status, count = n, "Tasks with unknown status"),
            }
        }
        Ok(counts)
    }

    /// Deletes succeeded tasks whose last attempt is older than `older_than`.
    ///
    /// Returns the number of deleted tasks.
    pub async fn compact(&self, older_than: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_tasks
            WHERE status = 'succeeded'
            AND last_attempt_at < ?1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(deleted = result.rows_affected(), "Compacted succeeded tasks");
        }
        Ok(result.rows_affected())
    }

    async fn dead_letter_corrupted(&self, task_id: i64, reason: &str) -> DbResult<String> {
        error!(task_id, reason, "Corrupted sync task; dead-lettering");
        let last_error = format!("queue corruption: {}", reason);

        sqlx::query(
            r#"
            UPDATE sync_tasks SET
                status = 'failed',
                last_error = ?2
            WHERE task_id = ?1
            "#,
        )
        .bind(task_id)
        .bind(&last_error)
        .execute(&self.pool)
        .await?;

        Ok(last_error)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
