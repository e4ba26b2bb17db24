//! Relationships between classes
//!
//! A direct relationship is stored as relation-table rows keyed by its
//! predicate class. An inferred relationship is never stored: it is the
//! composition of an ordered chain of direct relationships.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Predicate class of a direct relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub class_id: String,
    pub compact_id: i64,
}

#[derive(Debug)]
pub enum RelationshipKind {
    Direct {
        predicate: Predicate,
        /// Subject of this relationship is the physical `object_id`
        reversed: bool,
        /// More than one edge per subject allowed
        multiplicity: bool,
    },
    Inferred {
        chain: Vec<Arc<Relationship>>,
    },
}

/// Directed association between a subject class and an object class.
#[derive(Debug)]
pub struct Relationship {
    pub id: String,
    /// Subject class ID
    pub subject: String,
    /// Object class ID
    pub object: String,
    pub kind: RelationshipKind,
}

impl Relationship {
    pub fn predicate(&self) -> Option<&Predicate> {
        match &self.kind {
            RelationshipKind::Direct { predicate, .. } => Some(predicate),
            RelationshipKind::Inferred { .. } => None,
        }
    }

    pub fn is_reversed(&self) -> bool {
        matches!(self.kind, RelationshipKind::Direct { reversed: true, .. })
    }

    pub fn allows_multiplicity(&self) -> bool {
        match self.kind {
            RelationshipKind::Direct { multiplicity, .. } => multiplicity,
            RelationshipKind::Inferred { .. } => true,
        }
    }

    pub fn is_inferred(&self) -> bool {
        matches!(self.kind, RelationshipKind::Inferred { .. })
    }

    /// Relationships an inferred relationship is composed of; empty for direct ones
    pub fn chain(&self) -> &[Arc<Relationship>] {
        match &self.kind {
            RelationshipKind::Inferred { chain } => chain,
            RelationshipKind::Direct { .. } => &[],
        }
    }

    /// Physical (subject, object) columns of the relation table for this relationship
    pub fn subject_columns(&self) -> (&'static str, &'static str) {
        if self.is_reversed() {
            ("object_id", "subject_id")
        } else {
            ("subject_id", "object_id")
        }
    }
}

impl PartialEq for Relationship {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Relationship {}

impl Hash for Relationship {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RelationshipKind::Direct { predicate, reversed, .. } => {
                let arrow = if *reversed { "<-" } else { "->" };
                write!(f, "Relationship {} ({} -[{}]{} {})", self.id, self.subject, predicate.class_id, arrow, self.object)
            }
            RelationshipKind::Inferred { chain } => {
                let ids: Vec<&str> = chain.iter().map(|r| r.id.as_str()).collect();
                write!(f, "Relationship {} ({} -[{}]-> {})", self.id, self.subject, ids.join(" / "), self.object)
            }
        }
    }
}
