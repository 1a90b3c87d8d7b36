//! # Error Types
//!
//! Domain-specific error types for depot-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  depot-core errors (this file)                                         │
//! │  ├── CoreError        - Domain errors (unknown status, bad payload)    │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  depot-db errors (separate crate)                                      │
//! │  └── DbError          - Persistence failures, corrupted queue rows     │
//! │                                                                         │
//! │  depot-sync errors (separate crate)                                    │
//! │  ├── SyncError        - Engine/config failures                         │
//! │  └── RemoteError      - Remote adapter outcome (retryable or not)      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A persisted task carries an action string we don't know.
    ///
    /// ## When This Occurs
    /// - Row written by a newer build, then read by an older one
    /// - Manual edits of the database file
    #[error("Unknown sync action: '{0}'")]
    UnknownAction(String),

    /// A persisted task carries a status string we don't know.
    #[error("Unknown task status: '{0}'")]
    UnknownStatus(String),

    /// A record or task payload could not be (de)serialized.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Record fields don't match the typed entity bound to the table.
    ///
    /// ## When This Occurs
    /// - `stock` stored as a string for an `InventoryItem`
    /// - A required field (e.g. `name`) was removed by an untyped update
    #[error("Record {table}/{id} does not decode as {entity}: {reason}")]
    EntityDecode {
        table: String,
        id: i64,
        entity: &'static str,
        reason: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any write reaches the store.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g. table name with uppercase letters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
