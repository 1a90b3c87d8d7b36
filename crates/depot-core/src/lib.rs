//! # depot-core: Pure Domain Types for Depot
//!
//! Everything the record store and the sync engine agree on, with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Depot Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Host application (POS / inventory UI)              │   │
//! │  │    create / update / delete records, read sync status           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ depot-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  entity   │  │   error   │  │ validation│  │   │
//! │  │   │  Record   │  │ Inventory │  │ CoreError │  │  tables   │  │   │
//! │  │   │ SyncTask  │  │ Customer  │  │           │  │  fields   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          depot-db (record store + outbox) / depot-sync          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Records, sync tasks, task status and actions
//! - [`entity`] - Typed entities stored as records (inventory, customers, ...)
//! - [`error`] - Domain error types
//! - [`validation`] - Table name and field payload rules
//!
//! ## Example Usage
//!
//! ```rust
//! use depot_core::{SyncAction, TaskStatus};
//!
//! assert_eq!(SyncAction::Create.as_str(), "create");
//! assert!(TaskStatus::Succeeded.is_terminal());
//! assert!(!TaskStatus::Pending.is_terminal());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod entity;
pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use entity::{Customer, Entity, InventoryItem, SaleRecord, Supplier, TypedRecord};
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;
pub use validation::ValidationResult;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of a table name.
pub const MAX_TABLE_NAME_LEN: usize = 64;

/// Well-known entity tables used by the POS application.
///
/// Any table name passing [`validation::validate_table_name`] is accepted by
/// the store; these are the ones the typed entities bind to.
pub mod tables {
    pub const INVENTORY: &str = "inventory";
    pub const SALES: &str = "sales";
    pub const CUSTOMERS: &str = "customers";
    pub const SUPPLIERS: &str = "suppliers";
}
