//! Classes, properties and resolved property locations

use std::fmt;
use std::sync::Arc;

use super::DataType;

/// Where the objects of a class are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectLocation {
    /// Rows in the shared object table; supports insert/update
    ObjectTable,
    /// Stored elsewhere (views, external sources); read-only for this layer
    External,
}

/// A typed field of a class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Property {
    /// Stable identifier (used in queries and containers)
    pub id: String,
    /// Dense surrogate used as the physical storage key
    pub compact_id: i64,
    pub name: String,
    pub data_type: DataType,
    pub multivalue: bool,
    pub primary_key: bool,
}

impl Property {
    pub fn new(id: impl Into<String>, compact_id: i64, data_type: DataType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            compact_id,
            data_type,
            multivalue: false,
            primary_key: false,
        }
    }

    pub fn multivalue(mut self) -> Self {
        self.multivalue = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Physical location of a property value for one class.
///
/// Resolved once when the schema is built.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyLocation {
    /// Inline column of the object table
    TableColumn(String),
    /// EAV row in the value table of the property's data type
    ValueTable,
    /// Computed from another property of the same class
    Derived(DerivedLocation),
}

/// A derived property: `derive_type` is a template applied to the source field.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedLocation {
    pub source: Arc<Property>,
    pub source_location: SourceLocation,
    /// Expression template, `{0}` stands for the source field reference
    pub derive_type: String,
}

/// Location a derived property reads from; never itself derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    TableColumn(String),
    ValueTable,
}

/// A property bound to a class together with its resolved location
#[derive(Debug, Clone)]
pub struct ClassProperty {
    pub property: Arc<Property>,
    pub location: PropertyLocation,
}

/// Schema type of an object.
#[derive(Debug)]
pub struct Class {
    pub id: String,
    pub compact_id: i64,
    pub name: String,
    pub object_location: ObjectLocation,
    pub(crate) properties: Vec<ClassProperty>,
}

impl Class {
    pub fn is_object_table(&self) -> bool {
        self.object_location == ObjectLocation::ObjectTable
    }

    /// Properties bound to this class, with their locations
    pub fn class_properties(&self) -> &[ClassProperty] {
        &self.properties
    }

    pub fn properties(&self) -> impl Iterator<Item = &Arc<Property>> {
        self.properties.iter().map(|cp| &cp.property)
    }

    pub fn property(&self, property_id: &str) -> Option<&Arc<Property>> {
        self.class_property(property_id).map(|cp| &cp.property)
    }

    pub fn location(&self, property_id: &str) -> Option<&PropertyLocation> {
        self.class_property(property_id).map(|cp| &cp.location)
    }

    pub fn class_property(&self, property_id: &str) -> Option<&ClassProperty> {
        self.properties.iter().find(|cp| cp.property.id == property_id)
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Class {}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
