//! # Seedbed - declarative schema and seed data loader
//!
//! Turns one YAML document of class definitions and keyed records into live
//! SQLite tables and linked rows.
//!
//! Seedbed provides:
//! - A field resolver and schema builder that turn descriptor strings into entity types
//! - Joined-table inheritance with polymorphic discriminators and backref collections
//! - A reference-resolving, two-pass instance loader with forward references
//! - Reconciliation against rows already in the store, so loads are idempotent
//! - Scoped schemas that are torn down on exit, for ephemeral test fixtures
//! - A SQL export backend that renders the same schema as text

pub mod config;
pub mod document;
pub mod export;
pub mod loader;
pub mod schema;
pub mod storage;
pub mod ui;
pub mod value;

// Re-exports for convenient access
pub use document::{Document, DocumentLoader, FileLoader, Source};
pub use export::Exporter;
pub use loader::{Loader, Options, RefKey, Scope, Session};
pub use schema::{EntityType, FieldType, SchemaCatalog};
pub use storage::{Filter, Row, SqliteStore};
pub use value::Value;

/// Result type alias for Seedbed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Seedbed operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unsupported source format: {0}")]
    UnsupportedSourceFormat(String),

    #[error("{type_name} could not be found (field '{field}' on {class})")]
    UnresolvedFieldType {
        class: String,
        field: String,
        type_name: String,
    },

    #[error("Invalid arguments for {type_name}: {reason}")]
    InvalidFieldArguments { type_name: String, reason: String },

    #[error("Unknown parent class: {0}")]
    UnknownParentClass(String),

    #[error("Unknown class: {0}")]
    UnknownClass(String),

    #[error("{reference} not in file or database (relationship to {class})")]
    UnresolvedReference { class: String, reference: String },

    #[error("Too many results for {reference} ({candidates} matches for {class})")]
    AmbiguousReference {
        class: String,
        reference: String,
        candidates: usize,
    },

    #[error("Missing key field '{field}' in {class} record")]
    MissingKeyField { class: String, field: String },

    #[error("No Backref declared on {target} for relationship {class}.{field}")]
    MissingBackref {
        class: String,
        field: String,
        target: String,
    },

    #[error("Unknown attribute '{attribute}' on {class}")]
    UnknownAttribute { class: String, attribute: String },

    #[error("Cannot store {value} in {type_name} column '{field}'")]
    Coercion {
        field: String,
        type_name: String,
        value: String,
    },

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
