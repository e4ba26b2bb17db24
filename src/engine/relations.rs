//! Relation engine - stored edges and inferred relationship chains
//!
//! A stored edge is one relation-table row `(subject_id, object_id, predicate)`.
//! For a reversed relationship the logical subject lives in `object_id`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use super::ObjectStorage;
use crate::audit::RelationLogEntry;
use crate::object::{ObjectContainer, ObjectRelation};
use crate::query::{Condition, Query, QueryField};
use crate::schema::Relationship;
use crate::storage::{Row, RowChange, RowStore};
use crate::{Error, Result};

/// Physical row key of an edge: (subject_id, object_id, predicate compact ID)
type EdgeKey = (i64, i64, i64);

/// Partial chain results: (root subject ID, ID reached so far)
type ChainEdges = Vec<(i64, i64)>;

fn edge_key(relation: &ObjectRelation) -> Result<EdgeKey> {
    let relationship = &relation.relationship;
    let predicate = relationship.predicate().ok_or_else(|| {
        Error::UnsupportedOperation(format!("storing edges of inferred {}", relationship))
    })?;
    if relationship.is_reversed() {
        Ok((relation.object_id, relation.subject_id, predicate.compact_id))
    } else {
        Ok((relation.subject_id, relation.object_id, predicate.compact_id))
    }
}

fn edge_condition(key: &EdgeKey) -> Condition {
    Condition::and(vec![
        Condition::eq("subject_id", key.0),
        Condition::eq("object_id", key.1),
        Condition::eq("predicate_class_compact_id", key.2),
    ])
}

fn row_key(row: &Row) -> Option<EdgeKey> {
    Some((
        row.get_i64("subject_id")?,
        row.get_i64("object_id")?,
        row.get_i64("predicate_class_compact_id")?,
    ))
}

impl<S: RowStore> ObjectStorage<S> {
    /// Store edges that do not exist yet.
    ///
    /// Multiplicity is checked for every new edge before anything is written.
    pub fn add_relations(&self, relations: &[ObjectRelation]) -> Result<()> {
        if relations.is_empty() {
            return Ok(());
        }
        let keys = relations.iter().map(edge_key).collect::<Result<Vec<_>>>()?;
        let existing = self.existing_edges(&keys)?;

        let mut pending: Vec<(EdgeKey, &ObjectRelation)> = Vec::new();
        for (key, relation) in keys.into_iter().zip(relations) {
            if existing.contains_key(&key) || pending.iter().any(|(k, _)| *k == key) {
                continue;
            }
            let relationship = &relation.relationship;
            if !relationship.allows_multiplicity() {
                let (subject_column, _) = relationship.subject_columns();
                let query = Query::new(self.config.relation_table.as_str()).filter(Condition::and(vec![
                    Condition::eq(subject_column, relation.subject_id),
                    Condition::eq("predicate_class_compact_id", key.2),
                ]));
                let conflicting = pending
                    .iter()
                    .any(|(_, p)| p.relationship == *relationship && p.subject_id == relation.subject_id);
                if conflicting || self.store.count(&query)? > 0 {
                    return Err(Error::ConstraintViolation {
                        relationship: relationship.to_string(),
                    });
                }
            }
            pending.push((key, relation));
        }
        if pending.is_empty() {
            return Ok(());
        }

        let mut changes = Vec::with_capacity(pending.len());
        for ((subject_id, object_id, predicate), _) in &pending {
            self.audit().log_relation(&RelationLogEntry {
                subject_id: *subject_id,
                object_id: *object_id,
                predicate_class_compact_id: *predicate,
                deleted: false,
            })?;
            changes.push(RowChange::Insert(
                Row::new()
                    .with("subject_id", *subject_id)
                    .with("object_id", *object_id)
                    .with("predicate_class_compact_id", *predicate),
            ));
        }
        self.store.apply(&self.config.relation_table, &changes)?;
        debug!(added = changes.len(), "Added relations");
        Ok(())
    }

    /// Remove stored edges; edges that do not exist are ignored
    pub fn remove_relations(&self, relations: &[ObjectRelation]) -> Result<()> {
        if relations.is_empty() {
            return Ok(());
        }
        let keys = relations.iter().map(edge_key).collect::<Result<Vec<_>>>()?;
        let existing = self.existing_edges(&keys)?;
        if existing.is_empty() {
            return Ok(());
        }

        let mut changes = Vec::new();
        for (key, row_ids) in &existing {
            for id in row_ids {
                self.audit().log_relation(&RelationLogEntry {
                    subject_id: key.0,
                    object_id: key.1,
                    predicate_class_compact_id: key.2,
                    deleted: true,
                })?;
                changes.push(RowChange::Delete { id: *id });
            }
        }
        self.store.apply(&self.config.relation_table, &changes)?;
        debug!(removed = changes.len(), "Removed relations");
        Ok(())
    }

    /// Stored rows matching any of `keys`, one query per relation batch
    fn existing_edges(&self, keys: &[EdgeKey]) -> Result<HashMap<EdgeKey, Vec<i64>>> {
        let mut existing: HashMap<EdgeKey, Vec<i64>> = HashMap::new();
        for batch in keys.chunks(self.relation_batch_size()) {
            let query = Query::new(self.config.relation_table.as_str())
                .filter(Condition::or(batch.iter().map(edge_condition).collect()));
            for row in self.store.load_rows(&query)? {
                if let (Some(key), Some(id)) = (row_key(&row), row.get_i64("id")) {
                    let ids = existing.entry(key).or_default();
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(existing)
    }

    /// Edges of which the given objects are the subject.
    ///
    /// `relationships = None` loads every direct relationship. Objects without
    /// an ID are ignored.
    pub fn load_relations(
        &self,
        objects: &[ObjectContainer],
        relationships: Option<&[Arc<Relationship>]>,
    ) -> Result<Vec<ObjectRelation>> {
        let mut classes: HashMap<i64, String> = HashMap::new();
        let mut ids = Vec::new();
        for object in objects {
            if let Some(id) = object.id() {
                if classes.insert(id, object.class().id.clone()).is_none() {
                    ids.push(id);
                }
            }
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (direct, inferred): (Vec<Arc<Relationship>>, Vec<Arc<Relationship>>) = match relationships {
            Some(requested) => requested.iter().cloned().partition(|r| !r.is_inferred()),
            None => (
                self.schema.relationships().iter().filter(|r| !r.is_inferred()).cloned().collect(),
                Vec::new(),
            ),
        };

        let mut relations = Vec::new();
        if !direct.is_empty() {
            relations.extend(self.load_direct_relations(&ids, &mut classes, &direct)?);
        }

        let mut cache: HashMap<Vec<String>, ChainEdges> = HashMap::new();
        for relationship in &inferred {
            let roots: Vec<i64> = ids
                .iter()
                .copied()
                .filter(|id| classes.get(id).is_some_and(|c| *c == relationship.subject))
                .collect();
            for (root, end) in self.walk_chain(relationship, &roots, &mut cache)? {
                relations.push(ObjectRelation::new(root, relationship.clone(), end));
            }
        }
        Ok(relations)
    }

    fn load_direct_relations(
        &self,
        ids: &[i64],
        classes: &mut HashMap<i64, String>,
        requested: &[Arc<Relationship>],
    ) -> Result<Vec<ObjectRelation>> {
        let mut forward = BTreeSet::new();
        let mut reverse = BTreeSet::new();
        for relationship in requested {
            if let Some(predicate) = relationship.predicate() {
                if relationship.is_reversed() {
                    reverse.insert(predicate.compact_id);
                } else {
                    forward.insert(predicate.compact_id);
                }
            }
        }
        let forward: Vec<i64> = forward.into_iter().collect();
        let reverse: Vec<i64> = reverse.into_iter().collect();
        let requested: HashSet<&str> = requested.iter().map(|r| r.id.as_str()).collect();

        let mut relations = Vec::new();
        for batch in ids.chunks(self.relation_batch_size()) {
            let query = Query::new(self.config.relation_table.as_str()).filter(Condition::or(vec![
                Condition::and(vec![
                    Condition::in_list("subject_id", batch),
                    Condition::in_list("predicate_class_compact_id", &forward),
                ]),
                Condition::and(vec![
                    Condition::in_list("object_id", batch),
                    Condition::in_list("predicate_class_compact_id", &reverse),
                ]),
            ]));
            let rows: Vec<EdgeKey> = self.store.load_rows(&query)?.iter().filter_map(row_key).collect();

            let unknown: BTreeSet<i64> = rows
                .iter()
                .flat_map(|(s, o, _)| [*s, *o])
                .filter(|id| !classes.contains_key(id))
                .collect();
            self.resolve_classes(&unknown, classes)?;

            let in_batch: HashSet<i64> = batch.iter().copied().collect();
            for (subject_id, object_id, predicate) in rows {
                let mut candidates = Vec::with_capacity(2);
                if in_batch.contains(&subject_id) && forward.contains(&predicate) {
                    candidates.push((subject_id, object_id, false));
                }
                if in_batch.contains(&object_id) && reverse.contains(&predicate) {
                    candidates.push((object_id, subject_id, true));
                }

                for (subject, object, reversed) in candidates {
                    match self.resolve_relationship(classes, subject, predicate, object, reversed) {
                        Some(relationship) if requested.contains(relationship.id.as_str()) => {
                            relations.push(ObjectRelation::new(subject, relationship.clone(), object));
                        }
                        Some(_) => {}
                        None => info!(
                            subject_id = subject,
                            object_id = object,
                            predicate,
                            reversed,
                            "Skipping edge with no matching relationship"
                        ),
                    }
                }
            }
        }
        Ok(relations)
    }

    /// Look up the class IDs of `ids` in the object table
    fn resolve_classes(&self, ids: &BTreeSet<i64>, classes: &mut HashMap<i64, String>) -> Result<()> {
        let ids: Vec<i64> = ids.iter().copied().collect();
        for batch in ids.chunks(self.config.batch_size) {
            let query = Query::new(self.config.object_table.as_str())
                .fields(vec![QueryField::new("id"), QueryField::new("compact_class_id")])
                .filter(Condition::in_list("id", batch));
            for row in self.store.load_rows(&query)? {
                let Some(id) = row.get_i64("id") else {
                    continue;
                };
                let compact_class_id = row.get_i64("compact_class_id").unwrap_or_default();
                match self.schema.find_class_by_compact_id(compact_class_id) {
                    Some(class) => {
                        classes.insert(id, class.id.clone());
                    }
                    None => info!(object_id = id, compact_class_id, "Relation endpoint of unknown class"),
                }
            }
        }
        Ok(())
    }

    fn resolve_relationship(
        &self,
        classes: &HashMap<i64, String>,
        subject: i64,
        predicate: i64,
        object: i64,
        reversed: bool,
    ) -> Option<&Arc<Relationship>> {
        let predicate = self.schema.find_class_by_compact_id(predicate)?;
        self.schema
            .find_direct_relationship(classes.get(&subject)?, &predicate.id, classes.get(&object)?, reversed)
    }

    /// Walk an inferred chain from `roots`, reusing cached prefixes
    fn walk_chain(
        &self,
        relationship: &Relationship,
        roots: &[i64],
        cache: &mut HashMap<Vec<String>, ChainEdges>,
    ) -> Result<ChainEdges> {
        let mut edges: ChainEdges = roots.iter().map(|id| (*id, *id)).collect();
        let mut prefix = Vec::new();

        for step in relationship.chain() {
            prefix.push(step.id.clone());
            if let Some(cached) = cache.get(&prefix) {
                edges = cached.clone();
                continue;
            }

            let frontier: BTreeSet<i64> = edges.iter().map(|(_, current)| *current).collect();
            let mut next: HashMap<i64, Vec<i64>> = HashMap::new();
            for (from, to) in self.follow_relationship(step, &frontier)? {
                next.entry(from).or_default().push(to);
            }

            let mut seen = HashSet::new();
            let mut joined = Vec::new();
            for (root, current) in &edges {
                for to in next.get(current).map(Vec::as_slice).unwrap_or(&[]) {
                    if seen.insert((*root, *to)) {
                        joined.push((*root, *to));
                    }
                }
            }
            edges = joined;
            cache.insert(prefix.clone(), edges.clone());
        }
        Ok(edges)
    }

    /// Logical (subject, object) pairs of a direct relationship starting at `ids`
    fn follow_relationship(&self, step: &Relationship, ids: &BTreeSet<i64>) -> Result<Vec<(i64, i64)>> {
        let Some(predicate) = step.predicate() else {
            return Err(Error::SchemaInconsistency(format!("{} is not a direct relationship", step)));
        };
        let (subject_column, object_column) = step.subject_columns();
        let ids: Vec<i64> = ids.iter().copied().collect();

        let mut pairs = Vec::new();
        for batch in ids.chunks(self.config.batch_size) {
            let query = Query::new(self.config.relation_table.as_str())
                .fields(vec![QueryField::new(subject_column), QueryField::new(object_column)])
                .filter(Condition::and(vec![
                    Condition::in_list(subject_column, batch),
                    Condition::eq("predicate_class_compact_id", predicate.compact_id),
                ]));
            for row in self.store.load_rows(&query)? {
                if let (Some(from), Some(to)) = (row.get_i64(subject_column), row.get_i64(object_column)) {
                    pairs.push((from, to));
                }
            }
        }
        Ok(pairs)
    }
}
