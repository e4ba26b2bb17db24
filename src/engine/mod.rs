//! Object storage engine
//!
//! `ObjectStorage` ties the schema, the row store and the audit sink together:
//! - `load` assembles object containers from the object and value tables
//! - `insert` / `update` / `delete` reconcile containers against stored rows
//! - `add_relations` / `remove_relations` / `load_relations` manage edges
//! - `get_object_ids` / `get_objects_count` run class-scoped queries
//!
//! The engine keeps no state between calls. Multi-table writes are not atomic
//! here; wrap calls in a store transaction when that matters.

mod load;
mod query;
mod relations;
mod save;

pub use save::{diff_multi, diff_single, ValueDiff, ValueRow};

use std::sync::Arc;

use crate::audit::{AuditLog, NoAuditLog};
use crate::config::StorageConfig;
use crate::query::QueryTranslator;
use crate::schema::DataSchema;
use crate::storage::RowStore;
use crate::value::{DbValueComparer, ValueComparer};
use crate::Result;

static NO_AUDIT: NoAuditLog = NoAuditLog;

pub struct ObjectStorage<S: RowStore> {
    store: S,
    schema: Arc<DataSchema>,
    config: StorageConfig,
    audit: Box<dyn AuditLog>,
    comparer: Box<dyn ValueComparer>,
}

impl<S: RowStore> ObjectStorage<S> {
    pub fn new(store: S, schema: Arc<DataSchema>, config: StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            schema,
            config,
            audit: Box::new(NoAuditLog),
            comparer: Box::new(DbValueComparer),
        })
    }

    /// Attach an audit sink; entries are written only while `logging` is on
    pub fn with_audit_log(mut self, audit: impl AuditLog + 'static) -> Self {
        self.audit = Box::new(audit);
        self
    }

    /// Replace the comparer used by save diffing and the sort fallback
    pub fn with_value_comparer(mut self, comparer: impl ValueComparer + 'static) -> Self {
        self.comparer = Box::new(comparer);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn schema(&self) -> &Arc<DataSchema> {
        &self.schema
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn translator(&self) -> QueryTranslator<'_> {
        QueryTranslator::new(&self.schema, &self.config)
    }

    fn audit(&self) -> &dyn AuditLog {
        if self.config.logging {
            self.audit.as_ref()
        } else {
            &NO_AUDIT
        }
    }

    fn comparer(&self) -> &dyn ValueComparer {
        self.comparer.as_ref()
    }

    /// Object-ID batch size for value-table queries over `property_count` properties
    fn value_batch_size(&self, property_count: usize) -> usize {
        let batch = self.config.batch_size;
        batch.saturating_sub(property_count).max(batch / 2).max(1)
    }

    /// Batch size for relation loads, where an ID may match either endpoint
    fn relation_batch_size(&self) -> usize {
        (self.config.batch_size / 2).max(1)
    }
}
