//! Class-scoped queries: object IDs, counts and relation sources

use std::sync::Arc;

use tracing::info;

use super::ObjectStorage;
use crate::query::{Condition, Query, SortDirection, SortField};
use crate::schema::{Class, Property};
use crate::storage::RowStore;
use crate::value::{compare_values, Value};
use crate::{Error, Result};

impl<S: RowStore> ObjectStorage<S> {
    fn query_class(&self, query: &Query) -> Result<&Arc<Class>> {
        self.schema
            .find_class(&query.table)
            .ok_or_else(|| Error::SchemaInconsistency(format!("Unknown class: {}", query.table)))
    }

    /// IDs of the objects matching a class-scoped query, sorted and paged.
    ///
    /// Sorting on properties outside the object table happens in memory after
    /// loading the sort properties, and only then is the page cut.
    pub fn get_object_ids(&self, query: &Query) -> Result<Vec<i64>> {
        let class = self.query_class(query)?;
        let translator = self.translator();
        let condition = translator.class_condition(class, query.condition.as_ref())?;

        let base = Query::new(self.config.object_table.as_str()).field("id").filter(condition);

        let sort = if query.sort.is_empty() {
            Some(vec![SortField::asc("id")])
        } else {
            translator.translate_sort(class, &query.sort)?
        };

        if let Some(sort) = sort {
            let mut physical = base;
            physical.sort = sort;
            physical.start_record = query.start_record;
            physical.record_count = query.record_count;
            return self.load_ids(&physical);
        }

        let mut ids = self.load_ids(&base)?;
        self.sort_in_memory(class, &query.sort, &mut ids)?;
        let page = ids.into_iter().skip(query.start_record);
        Ok(match query.record_count {
            Some(count) => page.take(count).collect(),
            None => page.collect(),
        })
    }

    /// Number of objects matching a class-scoped query (paging ignored)
    pub fn get_objects_count(&self, query: &Query) -> Result<usize> {
        let class = self.query_class(query)?;
        let condition = self.translator().class_condition(class, query.condition.as_ref())?;
        self.store
            .count(&Query::new(self.config.object_table.as_str()).filter(condition))
    }

    /// Raw `(subject_id, object_id)` pairs of a direct relationship.
    ///
    /// The condition may reference the virtual columns `subject_id` and `object_id`.
    pub fn load_relations_by_query(
        &self,
        relationship_id: &str,
        condition: Option<&Condition>,
    ) -> Result<Vec<(i64, i64)>> {
        let relationship = self
            .schema
            .find_relationship(relationship_id)
            .ok_or_else(|| Error::SchemaInconsistency(format!("Unknown relationship: {}", relationship_id)))?;

        let mut logical = Query::new(relationship_id);
        logical.condition = condition.cloned();
        let physical = self.translator().relation_query(relationship, &logical)?;

        let mut pairs = Vec::new();
        for row in self.store.load_rows(&physical)? {
            if let (Some(subject), Some(object)) = (row.get_i64("subject_id"), row.get_i64("object_id")) {
                pairs.push((subject, object));
            }
        }
        Ok(pairs)
    }

    fn load_ids(&self, query: &Query) -> Result<Vec<i64>> {
        Ok(self
            .store
            .load_values(query)?
            .iter()
            .filter_map(Value::as_i64)
            .collect())
    }

    /// Stable multi-key sort of `ids` by loaded property values
    fn sort_in_memory(&self, class: &Class, sort: &[SortField], ids: &mut [i64]) -> Result<()> {
        let mut properties: Vec<Arc<Property>> = Vec::new();
        for key in sort.iter().filter(|k| k.field != "id") {
            let property = class.property(&key.field).ok_or_else(|| {
                Error::SchemaInconsistency(format!("property {} is not defined for class {}", key.field, class.id))
            })?;
            properties.push(property.clone());
        }

        let objects = self.load(ids, Some(properties.as_slice()))?;
        for id in ids.iter() {
            if !objects.contains_key(id) {
                info!(object_id = id, "Object vanished before sorting, ordered as null");
            }
        }

        let comparer = self.comparer();
        ids.sort_by(|a, b| {
            for key in sort {
                let (left, right) = if key.field == "id" {
                    (Some(Value::Integer(*a)), Some(Value::Integer(*b)))
                } else {
                    (
                        objects.get(a).and_then(|o| o.get(&key.field)).cloned(),
                        objects.get(b).and_then(|o| o.get(&key.field)).cloned(),
                    )
                };
                let ordering = compare_values(comparer, left.as_ref(), right.as_ref());
                let ordering = match key.direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRelation;
    use crate::query::{CompareOp, Operand};
    use crate::testing::{self, insert_company, insert_contact, new_object};

    fn contact(storage: &testing::TestStorage, name: &str, code: &str, birthday: &str) -> i64 {
        let mut contact = new_object(storage, "contacts");
        contact.set("name", name).unwrap();
        contact.set("code", code).unwrap();
        contact.set("birthday", birthday).unwrap();
        storage.insert(&mut contact).unwrap()
    }

    #[test]
    fn test_value_table_sort_pages_after_sorting() {
        let storage = testing::open_storage();
        let d = insert_contact(&storage, "Dave");
        let b = insert_contact(&storage, "Bob");
        let a = insert_contact(&storage, "Ann");
        let c = insert_contact(&storage, "Cid");
        insert_company(&storage, "Acme");

        storage.store().reset();
        let ids = storage
            .get_object_ids(&Query::new("contacts").sort_by(SortField::asc("name")).page(0, 2))
            .unwrap();
        assert_eq!(ids, vec![a, b]);
        // the physical ID query was not paged
        let physical = &storage.store().queries_on("objects")[0];
        assert!(!physical.is_paged());

        let ids = storage
            .get_object_ids(&Query::new("contacts").sort_by(SortField::desc("name")).page(1, 2))
            .unwrap();
        assert_eq!(ids, vec![c, b]);
        assert_eq!(storage.get_object_ids(&Query::new("contacts")).unwrap(), vec![d, b, a, c]);
    }

    #[test]
    fn test_column_sort_pushed_down() {
        let storage = testing::open_storage();
        let x = contact(&storage, "X", "b", "1990-01-01");
        let y = contact(&storage, "Y", "a", "1985-01-01");

        storage.store().reset();
        let ids = storage
            .get_object_ids(&Query::new("contacts").sort_by(SortField::asc("code")).page(0, 1))
            .unwrap();
        assert_eq!(ids, vec![y]);
        assert_eq!(storage.store().queries.borrow().len(), 1);

        let ids = storage
            .get_object_ids(&Query::new("contacts").sort_by(SortField::desc("code")))
            .unwrap();
        assert_eq!(ids, vec![x, y]);
    }

    #[test]
    fn test_conditions_on_every_location() {
        let storage = testing::open_storage();
        let ada = contact(&storage, "Ada", "ab", "1990-05-17");
        let bob = contact(&storage, "Bob", "cd", "1985-02-01");
        let mut empty = new_object(&storage, "contacts");
        empty.set("code", "ef").unwrap();
        let nameless = storage.insert(&mut empty).unwrap();

        let ids = |condition: Condition| storage.get_object_ids(&Query::new("contacts").filter(condition)).unwrap();

        assert_eq!(ids(Condition::eq("name", "Bob")), vec![bob]);
        assert_eq!(ids(Condition::eq("code", "ab")), vec![ada]);
        assert_eq!(ids(Condition::eq("code_upper", "CD")), vec![bob]);
        assert_eq!(ids(Condition::eq("birthday_year", 1990)), vec![ada]);
        assert_eq!(ids(Condition::compare("birthday", CompareOp::Lt, "1989-01-01")), vec![bob]);
        assert_eq!(ids(Condition::compare("name", CompareOp::Like, "A%")), vec![ada]);
        assert_eq!(ids(Condition::is_null("name")), vec![nameless]);
        assert_eq!(ids(Condition::in_list("id", &[ada, nameless])), vec![ada, nameless]);
        assert_eq!(
            ids(Condition::or(vec![Condition::eq("name", "Ada"), Condition::eq("code", "cd")])),
            vec![ada, bob]
        );
        assert_eq!(ids(Condition::eq("name", "Ada").negate()), vec![bob, nameless]);

        let count = storage
            .get_objects_count(&Query::new("contacts").filter(Condition::eq("code", "ab").negate()).page(0, 1))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(storage.get_objects_count(&Query::new("companies")).unwrap(), 0);
    }

    #[test]
    fn test_null_comparison_matches_missing_values() {
        let storage = testing::open_storage();
        let ada = contact(&storage, "Ada", "ab", "1990-05-17");
        let mut empty = new_object(&storage, "contacts");
        empty.set("code", "ef").unwrap();
        let nameless = storage.insert(&mut empty).unwrap();
        let mut blank = new_object(&storage, "contacts");
        blank.set("name", "Cy").unwrap();
        let codeless = storage.insert(&mut blank).unwrap();

        let ids = |condition: Condition| storage.get_object_ids(&Query::new("contacts").filter(condition)).unwrap();

        // value table, derived over a value table and inline column agree with IS NULL
        assert_eq!(ids(Condition::eq("name", Value::Null)), ids(Condition::is_null("name")));
        assert_eq!(ids(Condition::eq("name", Value::Null)), vec![nameless]);
        assert_eq!(ids(Condition::eq("name", "")), vec![nameless]);
        assert_eq!(ids(Condition::eq("birthday_year", Value::Null)), vec![nameless, codeless]);
        assert_eq!(ids(Condition::eq("code", Value::Null)), vec![codeless]);

        assert_eq!(
            ids(Condition::compare("name", CompareOp::NotEq, Value::Null)),
            vec![ada, codeless]
        );
        assert_eq!(ids(Condition::compare("code", CompareOp::NotEq, Value::Null)), vec![ada, nameless]);
    }

    #[test]
    fn test_query_errors() {
        let storage = testing::open_storage();
        assert!(matches!(
            storage.get_object_ids(&Query::new("planets")),
            Err(Error::SchemaInconsistency(_))
        ));
        assert!(matches!(
            storage.get_objects_count(&Query::new("contacts").filter(Condition::eq("title", "x"))),
            Err(Error::SchemaInconsistency(_))
        ));
        let both_values = Condition::Compare(Operand::field("name"), CompareOp::Eq, Operand::field("birthday"));
        assert!(matches!(
            storage.get_object_ids(&Query::new("contacts").filter(both_values)),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_relationship_as_query_source() {
        let storage = testing::open_storage();
        let acme = insert_company(&storage, "Acme");
        let ada = insert_contact(&storage, "Ada");
        let bob = insert_contact(&storage, "Bob");
        let employee = storage.schema().find_relationship("contact_employee").unwrap().clone();
        storage
            .add_relations(&[
                ObjectRelation::new(ada, employee.clone(), acme),
                ObjectRelation::new(bob, employee, acme),
            ])
            .unwrap();

        let mut pairs = storage.load_relations_by_query("contact_employee", None).unwrap();
        pairs.sort();
        assert_eq!(pairs, vec![(ada, acme), (bob, acme)]);

        // reversed: subject_id is the company
        let pairs = storage
            .load_relations_by_query("company_employees", Some(&Condition::eq("object_id", bob)))
            .unwrap();
        assert_eq!(pairs, vec![(acme, bob)]);

        assert!(matches!(
            storage.load_relations_by_query("contact_country", None),
            Err(Error::UnsupportedOperation(_))
        ));
        assert!(matches!(
            storage.load_relations_by_query("nope", None),
            Err(Error::SchemaInconsistency(_))
        ));
        assert!(matches!(
            storage.load_relations_by_query("contact_employee", Some(&Condition::eq("title", "x"))),
            Err(Error::SchemaInconsistency(_))
        ));
    }
}
