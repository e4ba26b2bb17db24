//! # Objstore - Schema-flexible object storage on a fixed relational layout
//!
//! Objects with a dynamic, per-class property set are persisted onto one
//! shared object table, one value table per primitive data type (EAV rows),
//! one relation table and optional append-only `_log` mirrors.
//!
//! Objstore provides:
//! - Batched multi-table loading of object containers
//! - Diff-based save reconciliation (no redundant value writes)
//! - Relation storage with multiplicity checks and inferred (chained) relationships
//! - Translation of class-scoped queries into physical queries
//! - SQLite-backed row access with optional audit logging

pub mod value;
pub mod schema;
pub mod object;
pub mod query;
pub mod storage;
pub mod engine;
pub mod audit;
pub mod config;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use value::{Value, ValueComparer, DbValueComparer};
pub use schema::{Class, DataSchema, DataType, Property, PropertyLocation, Relationship};
pub use object::{ObjectContainer, ObjectRelation};
pub use query::{Condition, Query, SortDirection};
pub use storage::{RowStore, SqliteRowStore};
pub use engine::ObjectStorage;
pub use audit::{AuditLog, NoAuditLog, TableAuditLog};
pub use config::StorageConfig;

/// Result type alias for Objstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Objstore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Schema or configuration does not match the data being processed
    #[error("Schema inconsistency: {0}")]
    SchemaInconsistency(String),

    #[error("Object id={object_id} doesn't exist")]
    ConcurrencyViolation { object_id: i64 },

    #[error("{relationship} doesn't allow multiplicity")]
    ConstraintViolation { relationship: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Object ID is required for {0}")]
    MissingObjectId(&'static str),

    #[error("Cannot convert {value} to {data_type}")]
    ValueConversion { data_type: &'static str, value: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}
