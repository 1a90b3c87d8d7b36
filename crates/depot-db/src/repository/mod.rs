//! # Repository Module
//!
//! Database repositories for records and the outbox.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  Host application                      Drain worker (depot-sync)       │
//! │       │                                      │                          │
//! │       │ db.records().create(...)             │ db.outbox().peek_pending │
//! │       ▼                                      ▼                          │
//! │  RecordRepository ──append (same tx)──► OutboxRepository               │
//! │  TypedTable<T>                           mark_* / reschedule / release │
//! │       │                                      │                          │
//! │       ▼                                      ▼                          │
//! │  records, table_sequences              sync_tasks                      │
//! │                                                                         │
//! │  Only RecordRepository can append tasks; the outbox API is the drain   │
//! │  side of the queue.                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`RecordRepository`](records::RecordRepository) - Record CRUD + sync task enqueue
//! - [`TypedTable`](records::TypedTable) - Entity-typed view over a table
//! - [`OutboxRepository`](outbox::OutboxRepository) - Sync queue management

pub mod outbox;
pub mod records;
