//! Schema registry - classes, properties and relationships
//!
//! The schema is built once and shared by reference. Property locations
//! (inline column, value table or derived) are resolved per class at build
//! time, so storage code only ever matches on a `PropertyLocation`.

pub mod class;
pub mod data_type;
pub mod relationship;

pub use class::{Class, ClassProperty, DerivedLocation, ObjectLocation, Property, PropertyLocation, SourceLocation};
pub use data_type::DataType;
pub use relationship::{Predicate, Relationship, RelationshipKind};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::{Error, Result};

/// Immutable schema with lookups by stable ID and by compact ID.
#[derive(Debug, Default)]
pub struct DataSchema {
    classes: Vec<Arc<Class>>,
    class_by_id: HashMap<String, Arc<Class>>,
    class_by_compact_id: HashMap<i64, Arc<Class>>,
    property_by_id: HashMap<String, Arc<Property>>,
    property_by_compact_id: HashMap<i64, Arc<Property>>,
    relationships: Vec<Arc<Relationship>>,
    relationship_by_id: HashMap<String, Arc<Relationship>>,
}

impl DataSchema {
    pub fn builder() -> DataSchemaBuilder {
        DataSchemaBuilder::default()
    }

    pub fn classes(&self) -> &[Arc<Class>] {
        &self.classes
    }

    pub fn find_class(&self, id: &str) -> Option<&Arc<Class>> {
        self.class_by_id.get(id)
    }

    pub fn find_class_by_compact_id(&self, compact_id: i64) -> Option<&Arc<Class>> {
        self.class_by_compact_id.get(&compact_id)
    }

    pub fn find_property(&self, id: &str) -> Option<&Arc<Property>> {
        self.property_by_id.get(id)
    }

    pub fn find_property_by_compact_id(&self, compact_id: i64) -> Option<&Arc<Property>> {
        self.property_by_compact_id.get(&compact_id)
    }

    pub fn relationships(&self) -> &[Arc<Relationship>] {
        &self.relationships
    }

    pub fn find_relationship(&self, id: &str) -> Option<&Arc<Relationship>> {
        self.relationship_by_id.get(id)
    }

    /// Find the direct relationship for a stored edge seen from `subject`
    pub fn find_direct_relationship(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        reversed: bool,
    ) -> Option<&Arc<Relationship>> {
        self.relationships.iter().find(|r| {
            r.subject == subject
                && r.object == object
                && r.is_reversed() == reversed
                && r.predicate().is_some_and(|p| p.class_id == predicate)
        })
    }

    /// Inline object-table columns declared by any class (excluding `id`)
    pub fn inline_columns(&self) -> Vec<(String, DataType)> {
        let mut seen = BTreeSet::new();
        let mut columns = Vec::new();
        for class in &self.classes {
            for cp in class.class_properties() {
                if let PropertyLocation::TableColumn(column) = &cp.location {
                    if cp.property.primary_key || column == "id" || column == "compact_class_id" {
                        continue;
                    }
                    if seen.insert(column.clone()) {
                        columns.push((column.clone(), cp.property.data_type));
                    }
                }
            }
        }
        columns
    }
}

/// Declared location of a class property, before resolution
#[derive(Debug, Clone)]
pub enum LocationDecl {
    Column(String),
    ValueTable,
    Derived { from: String, derive_type: String },
}

#[derive(Debug, Clone)]
struct ClassDecl {
    id: String,
    compact_id: i64,
    name: String,
    object_location: ObjectLocation,
    bindings: Vec<(String, LocationDecl)>,
}

#[derive(Debug, Clone)]
enum RelationshipDecl {
    Direct {
        id: String,
        subject: String,
        predicate: String,
        object: String,
        reversed: bool,
        multiplicity: bool,
    },
    Inferred {
        id: String,
        chain: Vec<String>,
    },
}

/// Builder for `DataSchema`; `build` resolves and validates everything at once.
#[derive(Debug, Default)]
pub struct DataSchemaBuilder {
    classes: Vec<ClassDecl>,
    properties: Vec<Property>,
    relationships: Vec<RelationshipDecl>,
    unbound: Vec<String>,
}

impl DataSchemaBuilder {
    /// Declare a class stored in the object table
    pub fn class(self, id: &str, compact_id: i64) -> Self {
        self.class_at(id, compact_id, ObjectLocation::ObjectTable)
    }

    pub fn class_at(mut self, id: &str, compact_id: i64, object_location: ObjectLocation) -> Self {
        self.classes.push(ClassDecl {
            id: id.to_string(),
            compact_id,
            name: id.to_string(),
            object_location,
            bindings: Vec::new(),
        });
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Bind a property to a class at the given location
    pub fn bind(mut self, class_id: &str, property_id: &str, location: LocationDecl) -> Self {
        if let Some(class) = self.classes.iter_mut().find(|c| c.id == class_id) {
            class.bindings.push((property_id.to_string(), location));
        } else {
            self.unbound.push(format!("{}.{}", class_id, property_id));
        }
        self
    }

    pub fn bind_value(self, class_id: &str, property_id: &str) -> Self {
        self.bind(class_id, property_id, LocationDecl::ValueTable)
    }

    pub fn bind_column(self, class_id: &str, property_id: &str, column: &str) -> Self {
        self.bind(class_id, property_id, LocationDecl::Column(column.to_string()))
    }

    pub fn bind_derived(self, class_id: &str, property_id: &str, from: &str, derive_type: &str) -> Self {
        self.bind(
            class_id,
            property_id,
            LocationDecl::Derived {
                from: from.to_string(),
                derive_type: derive_type.to_string(),
            },
        )
    }

    /// Declare a direct relationship `subject -[predicate]-> object`
    pub fn relationship(
        mut self,
        id: &str,
        subject: &str,
        predicate: &str,
        object: &str,
        reversed: bool,
        multiplicity: bool,
    ) -> Self {
        self.relationships.push(RelationshipDecl::Direct {
            id: id.to_string(),
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            reversed,
            multiplicity,
        });
        self
    }

    /// Declare an inferred relationship composed of direct relationships
    pub fn inferred(mut self, id: &str, chain: &[&str]) -> Self {
        self.relationships.push(RelationshipDecl::Inferred {
            id: id.to_string(),
            chain: chain.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> Result<DataSchema> {
        if let Some(binding) = self.unbound.first() {
            return Err(Error::SchemaInconsistency(format!("binding {} refers to an unknown class", binding)));
        }
        let mut schema = DataSchema::default();

        for property in self.properties {
            let property = Arc::new(property);
            if schema.property_by_compact_id.insert(property.compact_id, property.clone()).is_some() {
                return Err(Error::SchemaInconsistency(format!(
                    "duplicate property compact ID {}",
                    property.compact_id
                )));
            }
            schema.property_by_id.insert(property.id.clone(), property);
        }

        for decl in &self.classes {
            let class = Arc::new(Class {
                id: decl.id.clone(),
                compact_id: decl.compact_id,
                name: decl.name.clone(),
                object_location: decl.object_location,
                properties: resolve_locations(&schema, decl)?,
            });
            if schema.class_by_compact_id.insert(class.compact_id, class.clone()).is_some() {
                return Err(Error::SchemaInconsistency(format!(
                    "duplicate class compact ID {}",
                    class.compact_id
                )));
            }
            schema.class_by_id.insert(class.id.clone(), class.clone());
            schema.classes.push(class);
        }

        // direct relationships first, inferred chains refer to them
        let (direct, inferred): (Vec<_>, Vec<_>) = self
            .relationships
            .into_iter()
            .partition(|r| matches!(r, RelationshipDecl::Direct { .. }));

        for decl in direct.into_iter().chain(inferred) {
            let relationship = match decl {
                RelationshipDecl::Direct { id, subject, predicate, object, reversed, multiplicity } => {
                    let predicate_class = schema.find_class(&predicate).ok_or_else(|| {
                        Error::SchemaInconsistency(format!("relationship {}: unknown predicate class {}", id, predicate))
                    })?;
                    for class_id in [&subject, &object] {
                        if schema.find_class(class_id).is_none() {
                            return Err(Error::SchemaInconsistency(format!(
                                "relationship {}: unknown class {}",
                                id, class_id
                            )));
                        }
                    }
                    Relationship {
                        kind: RelationshipKind::Direct {
                            predicate: Predicate {
                                class_id: predicate_class.id.clone(),
                                compact_id: predicate_class.compact_id,
                            },
                            reversed,
                            multiplicity,
                        },
                        id,
                        subject,
                        object,
                    }
                }
                RelationshipDecl::Inferred { id, chain } => resolve_chain(&schema, id, &chain)?,
            };
            let relationship = Arc::new(relationship);
            schema.relationship_by_id.insert(relationship.id.clone(), relationship.clone());
            schema.relationships.push(relationship);
        }

        Ok(schema)
    }
}

fn resolve_locations(schema: &DataSchema, decl: &ClassDecl) -> Result<Vec<ClassProperty>> {
    let lookup = |property_id: &str| {
        schema.find_property(property_id).cloned().ok_or_else(|| {
            Error::SchemaInconsistency(format!("class {}: unknown property {}", decl.id, property_id))
        })
    };

    let mut resolved = Vec::with_capacity(decl.bindings.len());
    for (property_id, location) in &decl.bindings {
        let property = lookup(property_id)?;
        let location = match location {
            LocationDecl::Column(column) => PropertyLocation::TableColumn(column.clone()),
            LocationDecl::ValueTable => PropertyLocation::ValueTable,
            LocationDecl::Derived { from, derive_type } => {
                let source = lookup(from)?;
                let source_decl = decl
                    .bindings
                    .iter()
                    .find(|(id, _)| id == from)
                    .map(|(_, loc)| loc)
                    .ok_or_else(|| {
                        Error::SchemaInconsistency(format!(
                            "class {}: derived property {} refers to unbound property {}",
                            decl.id, property_id, from
                        ))
                    })?;
                let source_location = match source_decl {
                    LocationDecl::Column(column) => SourceLocation::TableColumn(column.clone()),
                    LocationDecl::ValueTable => SourceLocation::ValueTable,
                    LocationDecl::Derived { .. } => {
                        return Err(Error::SchemaInconsistency(format!(
                            "class {}: derived property {} is derived from derived property {}",
                            decl.id, property_id, from
                        )));
                    }
                };
                PropertyLocation::Derived(DerivedLocation {
                    source,
                    source_location,
                    derive_type: derive_type.clone(),
                })
            }
        };
        resolved.push(ClassProperty { property, location });
    }
    Ok(resolved)
}

fn resolve_chain(schema: &DataSchema, id: String, chain: &[String]) -> Result<Relationship> {
    if chain.is_empty() {
        return Err(Error::SchemaInconsistency(format!("inferred relationship {} has an empty chain", id)));
    }
    let mut resolved: Vec<Arc<Relationship>> = Vec::with_capacity(chain.len());
    for step_id in chain {
        let step = schema.find_relationship(step_id).ok_or_else(|| {
            Error::SchemaInconsistency(format!("inferred relationship {}: unknown relationship {}", id, step_id))
        })?;
        if step.is_inferred() {
            return Err(Error::SchemaInconsistency(format!(
                "inferred relationship {}: {} is itself inferred",
                id, step_id
            )));
        }
        if let Some(prev) = resolved.last() {
            if prev.object != step.subject {
                return Err(Error::SchemaInconsistency(format!(
                    "inferred relationship {}: {} does not continue from {}",
                    id, step_id, prev.id
                )));
            }
        }
        resolved.push(step.clone());
    }
    Ok(Relationship {
        subject: resolved[0].subject.clone(),
        object: resolved[resolved.len() - 1].object.clone(),
        kind: RelationshipKind::Inferred { chain: resolved },
        id,
    })
}
