//! Storage Layer - SQLite-backed persistence
//!
//! Every entity type gets its own table named after the lower-cased class.
//! Subclass tables share their `id` with the parent table, so one instance
//! is spread over one row per table in its lineage:
//! - collection(id, name, kind)
//! - shelf(id -> collection.id, levels)

pub mod query;
pub mod schema;
pub mod sqlite;

pub use query::Filter;
pub use sqlite::{DbStats, Row, SqliteStore};
