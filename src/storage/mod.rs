//! Persistent alert storage
//!
//! Alerts live in a local SQLite database (WAL journal, synchronous NORMAL).
//! The store owns in-memory severity counters that stay consistent with row
//! mutations through a single write critical section, while counter reads
//! are lock-free.
//!
//! ## Module layout
//!
//! - [`schema`] - the `Alert` record, its enums, filters and counters
//! - [`sqlite`] - the `AlertStore` implementation
//! - [`error`] - storage error type

pub mod error;
pub mod schema;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use schema::{Alert, AlertCategory, AlertCounts, AlertFilter, AlertSeverity, AlertStatus};
pub use sqlite::AlertStore;
