//! Object containers and materialized relations
//!
//! An `ObjectContainer` is one entity instance: its class, an ID once it has
//! been inserted, and a sparse property map holding only properties that were
//! loaded or explicitly set.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::schema::{Class, Relationship};
use crate::value::Value;
use crate::{Error, Result};

/// One entity instance keyed by class and ID.
#[derive(Debug, Clone)]
pub struct ObjectContainer {
    id: Option<i64>,
    class: Arc<Class>,
    values: BTreeMap<String, Value>,
}

impl ObjectContainer {
    /// Create a new, not yet stored object
    pub fn new(class: Arc<Class>) -> Self {
        Self {
            id: None,
            class,
            values: BTreeMap::new(),
        }
    }

    /// Container for an object that already exists in storage
    pub fn with_id(class: Arc<Class>, id: i64) -> Self {
        Self {
            id: Some(id),
            class,
            values: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Set a property value; the property must be bound to the container's class
    pub fn set(&mut self, property_id: &str, value: impl Into<Value>) -> Result<()> {
        if self.class.location(property_id).is_none() {
            return Err(Error::SchemaInconsistency(format!(
                "property {} is not defined for class {}",
                property_id, self.class.id
            )));
        }
        self.values.insert(property_id.to_string(), value.into());
        Ok(())
    }

    pub fn get(&self, property_id: &str) -> Option<&Value> {
        self.values.get(property_id)
    }

    pub fn remove(&mut self, property_id: &str) -> Option<Value> {
        self.values.remove(property_id)
    }

    pub fn contains(&self, property_id: &str) -> bool {
        self.values.contains_key(property_id)
    }

    /// Present properties, ordered by property ID
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    /// Store a value read from storage; location was already resolved by the caller
    pub(crate) fn put(&mut self, property_id: &str, value: Value) {
        self.values.insert(property_id.to_string(), value);
    }

    /// Append an element of a multivalue property read from storage
    pub(crate) fn push_element(&mut self, property_id: &str, value: Value) {
        match self.values.entry(property_id.to_string()).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(items) => items.push(value),
            other => *other = Value::List(vec![std::mem::take(other), value]),
        }
    }
}

/// A materialized edge `(subject, relationship, object)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRelation {
    pub subject_id: i64,
    pub relationship: Arc<Relationship>,
    pub object_id: i64,
}

impl ObjectRelation {
    pub fn new(subject_id: i64, relationship: Arc<Relationship>, object_id: i64) -> Self {
        Self {
            subject_id,
            relationship,
            object_id,
        }
    }
}
