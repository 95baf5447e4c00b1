//! In-memory destination store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{matches_all, MemoryTable};
use crate::core::{lock, Condition, LocalRecord, LocalStore, Record, TypeCatalog};
use crate::error::{ImportError, Result};

/// Destination store held in memory.
///
/// Records of catalog types are kept per base type, so a `Page` and a
/// `SiteTree` never share an id. Raw operations on a catalog type's table see
/// the flattened records; every other table is a plain [`MemoryTable`].
pub struct MemoryLocalStore {
    catalog: Arc<TypeCatalog>,
    records: Mutex<HashMap<String, BTreeMap<i64, LocalRecord>>>,
    tables: Mutex<HashMap<String, MemoryTable>>,
    created: Mutex<HashMap<String, Vec<String>>>,
    live: Mutex<HashSet<(String, i64)>>,
    executed: Mutex<Vec<String>>,
}

impl MemoryLocalStore {
    /// Create an empty store for the given types.
    pub fn new(catalog: Arc<TypeCatalog>) -> Self {
        Self {
            catalog,
            records: Mutex::new(HashMap::new()),
            tables: Mutex::new(HashMap::new()),
            created: Mutex::new(HashMap::new()),
            live: Mutex::new(HashSet::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Builder: declare a plain table.
    pub fn with_table(self, table: &str, columns: &[&str]) -> Self {
        lock(&self.tables).insert(
            table.to_string(),
            MemoryTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        self
    }

    /// Store a record directly, assigning an id when it has none.
    pub fn seed(&self, mut record: LocalRecord) -> Result<i64> {
        self.store_new(&mut record)
    }

    /// Every record of a type and its subtypes, ordered by id.
    pub fn records(&self, class: &str) -> Vec<LocalRecord> {
        let base = self.catalog.base_type(class);
        lock(&self.records)
            .get(base)
            .map(|records| {
                records
                    .values()
                    .filter(|r| self.catalog.is_a(&r.class_name, class))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rows of a plain table.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        lock(&self.tables)
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Check whether a record was published.
    pub fn is_published(&self, class: &str, id: i64) -> bool {
        let base = self.catalog.base_type(class).to_string();
        lock(&self.live).contains(&(base, id))
    }

    /// Statements passed to `execute` and truncations performed.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    fn store_new(&self, record: &mut LocalRecord) -> Result<i64> {
        let base = self.catalog.base_type(&record.class_name).to_string();
        let mut records = lock(&self.records);
        let of_base = records.entry(base).or_default();
        if record.id <= 0 {
            record.id = of_base.keys().next_back().copied().unwrap_or(0) + 1;
        } else if of_base.contains_key(&record.id) {
            return Err(ImportError::local(
                format!("Duplicate entry '{}' for key 'PRIMARY'", record.id),
                format!("inserting {}", record.class_name),
            ));
        }
        of_base.insert(record.id, record.clone());
        Ok(record.id)
    }

    fn record_to_row(record: &LocalRecord) -> Record {
        let mut row = record.fields.clone();
        row.set("ID", record.id);
        row.set("ClassName", record.class_name.clone());
        row
    }

    fn row_to_record(&self, table: &str, row: &Record) -> LocalRecord {
        let class = self.catalog.resolve_class(table, row.class_name()).to_string();
        let mut record = LocalRecord::new(class);
        record.id = row.id();
        for (name, value) in row.iter() {
            if name != "ID" && name != "ClassName" {
                record.fields.set(name.clone(), value.clone());
            }
        }
        record
    }

    fn log(&self, statement: String) {
        debug!("memory local: {}", statement);
        lock(&self.executed).push(statement);
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, class: &str, id: i64) -> Result<Option<LocalRecord>> {
        let base = self.catalog.base_type(class);
        Ok(lock(&self.records)
            .get(base)
            .and_then(|records| records.get(&id))
            .filter(|r| self.catalog.is_a(&r.class_name, class))
            .cloned())
    }

    async fn find(&self, class: &str, conditions: &[Condition]) -> Result<Vec<LocalRecord>> {
        let mut found = Vec::new();
        for record in self.records(class) {
            let keep = matches_all(|c| record.field(c), conditions)
                .map_err(|e| ImportError::local(e, format!("finding {}", class)))?;
            if keep {
                found.push(record);
            }
        }
        Ok(found)
    }

    async fn insert(&self, record: &mut LocalRecord) -> Result<i64> {
        self.store_new(record)
    }

    async fn update(&self, record: &LocalRecord) -> Result<()> {
        let base = self.catalog.base_type(&record.class_name).to_string();
        let mut records = lock(&self.records);
        let slot = records
            .get_mut(&base)
            .and_then(|r| r.get_mut(&record.id))
            .ok_or_else(|| {
                ImportError::local(
                    format!("no {} record with id {}", base, record.id),
                    "updating record",
                )
            })?;
        *slot = record.clone();
        Ok(())
    }

    async fn publish(&self, record: &LocalRecord) -> Result<()> {
        let base = self.catalog.base_type(&record.class_name).to_string();
        lock(&self.live).insert((base, record.id));
        Ok(())
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        self.log(format!("TRUNCATE TABLE {}", table));
        if let Some(stage) = table.strip_suffix("_Live") {
            if self.catalog.contains(stage) {
                let base = self.catalog.base_type(stage).to_string();
                let records = lock(&self.records);
                let of_base = records.get(&base);
                lock(&self.live).retain(|(b, id)| {
                    *b != base
                        || !of_base
                            .and_then(|r| r.get(id))
                            .is_some_and(|r| self.catalog.is_a(&r.class_name, stage))
                });
                return Ok(());
            }
        }
        if self.catalog.contains(table) {
            let base = self.catalog.base_type(table).to_string();
            if let Some(records) = lock(&self.records).get_mut(&base) {
                records.retain(|_, r| !self.catalog.is_a(&r.class_name, table));
            }
            return Ok(());
        }
        match lock(&self.tables).get_mut(table) {
            Some(t) => {
                t.rows.clear();
                Ok(())
            }
            None => Err(ImportError::local(
                format!("table '{}' doesn't exist", table),
                "truncating table",
            )),
        }
    }

    async fn select_rows(&self, table: &str, conditions: &[Condition]) -> Result<Vec<Record>> {
        if self.catalog.contains(table) {
            let records = self.find(table, conditions).await?;
            return Ok(records.iter().map(Self::record_to_row).collect());
        }
        let tables = lock(&self.tables);
        let Some(t) = tables.get(table) else {
            return Err(ImportError::local(
                format!("table '{}' doesn't exist", table),
                "selecting rows",
            ));
        };
        let mut rows = Vec::new();
        for row in &t.rows {
            let keep = matches_all(|c| row.get(c).cloned(), conditions)
                .map_err(|e| ImportError::local(e, format!("selecting from {}", table)))?;
            if keep {
                rows.push(row.clone());
            }
        }
        rows.sort_by_key(Record::id);
        Ok(rows)
    }

    async fn insert_row(&self, table: &str, row: &Record) -> Result<i64> {
        if self.catalog.contains(table) {
            let mut record = self.row_to_record(table, row);
            return self.store_new(&mut record);
        }
        let mut tables = lock(&self.tables);
        let t = tables.get_mut(table).ok_or_else(|| {
            ImportError::local(format!("table '{}' doesn't exist", table), "inserting row")
        })?;
        let id = if row.id() > 0 { row.id() } else { t.next_id() };
        t.rows.push(row.clone().with("ID", id));
        Ok(id)
    }

    async fn update_row(&self, table: &str, id: i64, values: &Record) -> Result<()> {
        if self.catalog.contains(table) {
            let Some(mut record) = self.get(table, id).await? else {
                return Err(ImportError::local(
                    format!("no {} record with id {}", table, id),
                    "updating row",
                ));
            };
            for (name, value) in values.iter() {
                match name.as_str() {
                    "ID" => {}
                    "ClassName" => {
                        if let Some(class) = value.as_str() {
                            record.class_name = class.to_string();
                        }
                    }
                    _ => record.fields.set(name.clone(), value.clone()),
                }
            }
            return self.update(&record).await;
        }
        let mut tables = lock(&self.tables);
        let row = tables
            .get_mut(table)
            .and_then(|t| t.rows.iter_mut().find(|r| r.id() == id))
            .ok_or_else(|| {
                ImportError::local(format!("no row {} in '{}'", id, table), "updating row")
            })?;
        for (name, value) in values.iter() {
            row.set(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.log(sql.to_string());
        Ok(0)
    }

    async fn field_list(&self, table: &str) -> Result<Vec<String>> {
        let created = lock(&self.created).get(table).cloned().unwrap_or_default();
        if let Some(def) = self.catalog.get(table) {
            let mut fields = vec!["ID".to_string()];
            if def.parent.is_none() {
                fields.push("ClassName".to_string());
            }
            fields.extend(def.own_columns());
            fields.extend(created);
            return Ok(fields);
        }
        Ok(lock(&self.tables)
            .get(table)
            .map(MemoryTable::field_list)
            .unwrap_or_default())
    }

    async fn create_field(&self, table: &str, field: &str, spec: &str) -> Result<()> {
        self.log(format!("ALTER TABLE {} ADD {} {}", table, field, spec));
        if self.catalog.contains(table) {
            lock(&self.created)
                .entry(table.to_string())
                .or_default()
                .push(field.to_string());
            return Ok(());
        }
        match lock(&self.tables).get_mut(table) {
            Some(t) => {
                t.add_column(field);
                Ok(())
            }
            None => Err(ImportError::local(
                format!("table '{}' doesn't exist", table),
                "creating field",
            )),
        }
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
