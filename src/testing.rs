//! Test fixtures: a small CRM-like schema and an in-memory storage

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::audit::TableAuditLog;
use crate::config::StorageConfig;
use crate::engine::ObjectStorage;
use crate::object::ObjectContainer;
use crate::query::Query;
use crate::schema::{DataSchema, DataType, ObjectLocation, Property};
use crate::storage::{Row, RowChange, RowStore, SqliteRowStore};
use crate::Result;

pub const COMPANIES: i64 = 1;
pub const CONTACTS: i64 = 2;
pub const COUNTRIES: i64 = 3;
pub const EMPLOYEE: i64 = 4;
pub const LOCATED_IN: i64 = 5;

pub const TITLE: i64 = 2;
pub const NAME: i64 = 3;
pub const IS_PRIMARY: i64 = 4;
pub const BIRTHDAY: i64 = 5;
pub const TAGS: i64 = 7;

pub fn schema() -> Arc<DataSchema> {
    let mut builder = DataSchema::builder()
        .class("companies", COMPANIES)
        .class("contacts", CONTACTS)
        .class("countries", COUNTRIES)
        .class("employee", EMPLOYEE)
        .class("located_in", LOCATED_IN)
        .class_at("reports", 6, ObjectLocation::External)
        .property(Property::new("id", 1, DataType::Integer).primary_key())
        .property(Property::new("title", TITLE, DataType::String))
        .property(Property::new("name", NAME, DataType::String))
        .property(Property::new("is_primary", IS_PRIMARY, DataType::Boolean))
        .property(Property::new("birthday", BIRTHDAY, DataType::Date))
        .property(Property::new("birthday_year", 6, DataType::Integer))
        .property(Property::new("tags", TAGS, DataType::String).multivalue())
        .property(Property::new("score", 8, DataType::Decimal))
        .property(Property::new("code", 9, DataType::String))
        .property(Property::new("code_upper", 10, DataType::String));

    for class in ["companies", "contacts", "countries", "reports"] {
        builder = builder.bind_column(class, "id", "id");
    }

    builder
        .bind_value("companies", "title")
        .bind_value("countries", "title")
        .bind_value("reports", "title")
        .bind_value("contacts", "name")
        .bind_value("contacts", "is_primary")
        .bind_value("contacts", "birthday")
        .bind_derived("contacts", "birthday_year", "birthday", "CAST(strftime('%Y', {0}) AS INTEGER)")
        .bind_value("contacts", "tags")
        .bind_value("contacts", "score")
        .bind_column("contacts", "code", "code")
        .bind_derived("contacts", "code_upper", "code", "upper({0})")
        .relationship("contact_employee", "contacts", "employee", "companies", false, false)
        .relationship("company_employees", "companies", "employee", "contacts", true, true)
        .relationship("company_located_in", "companies", "located_in", "countries", false, true)
        .inferred("contact_country", &["contact_employee", "company_located_in"])
        .inferred("contact_colleagues", &["contact_employee", "company_employees"])
        .build()
        .unwrap()
        .into()
}

/// Ordered journal of (table, number of rows written) per write call
pub type WriteJournal = Rc<RefCell<Vec<(String, usize)>>>;

/// Row store wrapper recording every read and write it forwards
pub struct RecordingStore<S> {
    inner: S,
    pub queries: RefCell<Vec<Query>>,
    pub writes: WriteJournal,
}

impl<S: RowStore> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self::with_journal(inner, WriteJournal::default())
    }

    /// Record writes into a journal shared with other stores
    pub fn with_journal(inner: S, writes: WriteJournal) -> Self {
        Self {
            inner,
            queries: RefCell::new(Vec::new()),
            writes,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn reset(&self) {
        self.queries.borrow_mut().clear();
        self.writes.borrow_mut().clear();
    }

    /// Queries issued against `table`
    pub fn queries_on(&self, table: &str) -> Vec<Query> {
        self.queries.borrow().iter().filter(|q| q.table == table).cloned().collect()
    }

    pub fn writes_on(&self, table: &str) -> Vec<usize> {
        self.writes.borrow().iter().filter(|(t, _)| t == table).map(|(_, n)| *n).collect()
    }
}

impl<S: RowStore> RowStore for RecordingStore<S> {
    fn for_each_row(&self, query: &Query, f: &mut dyn FnMut(Row) -> Result<()>) -> Result<()> {
        self.queries.borrow_mut().push(query.clone());
        self.inner.for_each_row(query, f)
    }

    fn count(&self, query: &Query) -> Result<usize> {
        self.queries.borrow_mut().push(query.clone());
        self.inner.count(query)
    }

    fn insert_row(&self, table: &str, row: &Row) -> Result<i64> {
        self.writes.borrow_mut().push((table.to_string(), 1));
        self.inner.insert_row(table, row)
    }

    fn apply(&self, table: &str, changes: &[RowChange]) -> Result<()> {
        self.writes.borrow_mut().push((table.to_string(), changes.len()));
        self.inner.apply(table, changes)
    }
}

pub type TestStorage = ObjectStorage<RecordingStore<SqliteRowStore>>;

/// In-memory storage with the full layout and table audit logging attached.
///
/// Audit rows go through a store sharing the engine store's write journal,
/// so `writes` holds log and data writes in the order they happened.
pub fn open_storage() -> TestStorage {
    open_storage_with(StorageConfig::default())
}

pub fn open_storage_with(config: StorageConfig) -> TestStorage {
    let schema = schema();
    let sqlite = SqliteRowStore::open_in_memory().unwrap();
    sqlite.create_layout(&config, Some(&schema)).unwrap();
    let store = RecordingStore::new(sqlite.clone());
    let audit = TableAuditLog::new(RecordingStore::with_journal(sqlite, store.writes.clone()), &config);
    ObjectStorage::new(store, schema, config)
        .unwrap()
        .with_audit_log(audit)
}

/// Tables written since the last reset, in write order
pub fn write_order(storage: &TestStorage) -> Vec<String> {
    storage.store().writes.borrow().iter().map(|(table, _)| table.clone()).collect()
}

/// Rows currently in `table`
pub fn row_count(storage: &TestStorage, table: &str) -> usize {
    storage.store().inner().count(&Query::new(table)).unwrap()
}

/// Total rows across every `_log` table
pub fn log_rows(storage: &TestStorage) -> usize {
    let config = storage.config();
    let mut tables = vec![config.object_log_table.clone(), config.relation_log_table.clone()];
    tables.extend(config.value_log_tables.values().cloned());
    tables.iter().map(|t| row_count(storage, t)).sum()
}

pub fn new_object(storage: &TestStorage, class_id: &str) -> ObjectContainer {
    ObjectContainer::new(storage.schema().find_class(class_id).unwrap().clone())
}

/// Insert a company with a title and return its ID
pub fn insert_company(storage: &TestStorage, title: &str) -> i64 {
    let mut company = new_object(storage, "companies");
    company.set("title", title).unwrap();
    storage.insert(&mut company).unwrap()
}

pub fn insert_contact(storage: &TestStorage, name: &str) -> i64 {
    let mut contact = new_object(storage, "contacts");
    contact.set("name", name).unwrap();
    storage.insert(&mut contact).unwrap()
}
