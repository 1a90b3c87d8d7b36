//! # Domain Types
//!
//! Records and the sync tasks that shadow every change to them.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐          ┌──────────────────────────────┐         │
//! │  │     Record      │ 1 ──── * │          SyncTask            │         │
//! │  │  ─────────────  │ mutation │  ──────────────────────────  │         │
//! │  │  table          │          │  task_id (global order)      │         │
//! │  │  id (per table) │          │  table, record_id            │         │
//! │  │  fields (JSON)  │          │  action  create|update|delete│         │
//! │  │  created_at     │          │  payload (snapshot)          │         │
//! │  │  updated_at     │          │  status, attempts            │         │
//! │  └─────────────────┘          │  next_eligible_at, last_error│         │
//! │                               └──────────────────────────────┘         │
//! │                                                                         │
//! │  Task lifecycle:                                                        │
//! │                                                                         │
//! │   pending ──claim──► in_flight ──ok──► succeeded                       │
//! │      ▲                   │                                              │
//! │      └──retryable fail───┤                                              │
//! │                          └──terminal / exhausted──► failed             │
//! │   failed ──manual retry──► pending                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;

/// Schema-less record payload: attribute name → JSON value.
pub type Fields = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Record
// =============================================================================

/// A business entity row in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Entity kind, e.g. "inventory".
    pub table: String,

    /// Unique within `table`, never reused.
    pub id: i64,

    /// Attribute payload.
    #[ts(type = "Record<string, unknown>")]
    pub fields: Fields,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Identifies a record across tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub table: String,
    pub id: i64,
}

impl RecordKey {
    pub fn new(table: impl Into<String>, id: i64) -> Self {
        RecordKey {
            table: table.into(),
            id,
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.table, self.id)
    }
}

// =============================================================================
// Sync Action
// =============================================================================

/// The kind of mutation a sync task replays on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    /// Storage representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

// =============================================================================
// Task Status
// =============================================================================

/// Delivery status of a sync task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for delivery (possibly backing off).
    Pending,
    /// Claimed by the drain worker; remote call outstanding.
    InFlight,
    /// Remote acknowledged. Kept for audit until compaction.
    Succeeded,
    /// Dead-lettered: non-retryable error or retries exhausted.
    Failed,
}

impl TaskStatus {
    /// Storage representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InFlight => "in_flight",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    /// Terminal tasks never re-enter the drain rotation on their own.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_flight" => Ok(TaskStatus::InFlight),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Sync Task
// =============================================================================

/// One durable intent to replay a local mutation on the remote.
///
/// The payload is a snapshot taken inside the mutation's transaction; later
/// changes to the same record append new tasks instead of editing this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    /// Global, monotonically increasing. Defines delivery order.
    pub task_id: i64,
    pub table: String,
    pub record_id: i64,
    pub action: SyncAction,
    #[ts(type = "Record<string, unknown>")]
    pub payload: Fields,
    pub status: TaskStatus,
    pub attempts: u32,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Not deliverable before this instant (backoff). `None` = immediately.
    #[ts(as = "Option<String>")]
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncTask {
    /// Returns the key of the record this task targets.
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(&self.table, self.record_id)
    }

    /// Whether backoff allows delivering this task at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.next_eligible_at {
            Some(at) => at <= now,
            None => true,
        }
    }

    /// Key the remote can use to drop duplicate deliveries.
    ///
    /// Delivery is at-least-once: a task whose outcome was lost in a crash is
    /// sent again after restart with the same key.
    pub fn idempotency_key(&self, origin_id: &str) -> String {
        format!("{}:{}", origin_id, self.task_id)
    }
}

// =============================================================================
// Status Counts
// =============================================================================

/// Number of outbox tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    pub pending: i64,
    pub in_flight: i64,
    pub succeeded: i64,
    pub failed: i64,
}

impl TaskCounts {
    /// Tasks still owed to the remote.
    pub fn outstanding(&self) -> i64 {
        self.pending + self.in_flight
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(next_eligible_at: Option<DateTime<Utc>>) -> SyncTask {
        SyncTask {
            task_id: 42,
            table: "inventory".to_string(),
            record_id: 1,
            action: SyncAction::Create,
            payload: Fields::new(),
            status: TaskStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
            next_eligible_at,
            last_error: None,
        }
    }

    #[test]
    fn test_status_round_trips_through_storage_form() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InFlight,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = "upsert".parse::<SyncAction>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownAction(a) if a == "upsert"));
    }

    #[test]
    fn test_eligibility() {
        let now = Utc::now();
        assert!(task(None).is_eligible(now));
        assert!(task(Some(now)).is_eligible(now));
        assert!(!task(Some(now + Duration::seconds(5))).is_eligible(now));
    }

    #[test]
    fn test_idempotency_key() {
        assert_eq!(task(None).idempotency_key("origin-a"), "origin-a:42");
    }

    #[test]
    fn test_record_key_display() {
        assert_eq!(RecordKey::new("sales", 9).to_string(), "sales/9");
    }

    #[test]
    fn test_outstanding_counts() {
        let counts = TaskCounts {
            pending: 3,
            in_flight: 1,
            succeeded: 10,
            failed: 2,
        };
        assert_eq!(counts.outstanding(), 4);
    }
}
