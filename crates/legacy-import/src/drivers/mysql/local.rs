//! MySQL destination store.
//!
//! A record of type `NewsPage` lives in three tables (`SiteTree`, `Page`,
//! `NewsPage`) sharing one `ID`. Reads left-join every data table of the
//! requested type; writes split the record's fields by the columns each
//! table actually has.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::Pool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::{connect, quote_ident, render_select, Session, Side};
use crate::config::DatabaseConfig;
use crate::core::{Condition, LocalRecord, LocalStore, Record, SelectQuery, TypeCatalog, Value};
use crate::error::Result;
use crate::mapping::IdentityMap;

/// Destination database reached through a mysql_async pool.
pub struct MysqlLocalStore {
    session: Session,
    catalog: Arc<TypeCatalog>,
    columns: RwLock<HashMap<String, Vec<String>>>,
}

impl MysqlLocalStore {
    /// Connect using configuration.
    pub async fn new(config: &DatabaseConfig, catalog: Arc<TypeCatalog>) -> Result<Self> {
        let pool = connect(config, Side::Local).await?;
        Ok(Self::from_pool(pool, catalog))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool, catalog: Arc<TypeCatalog>) -> Self {
        Self {
            session: Session::new(pool, Side::Local),
            catalog,
            columns: RwLock::new(HashMap::new()),
        }
    }

    /// Get a clone of the underlying connection pool.
    pub fn pool(&self) -> Pool {
        self.session.pool().clone()
    }

    /// Cached column list of a table.
    async fn columns(&self, table: &str) -> Result<Vec<String>> {
        if let Some(columns) = self.columns.read().await.get(table) {
            return Ok(columns.clone());
        }
        let columns = self.session.field_list(table).await?;
        self.columns
            .write()
            .await
            .insert(table.to_string(), columns.clone());
        Ok(columns)
    }

    /// Select over every data table of `class`, restricted to its subtypes.
    fn query_for(&self, class: &str) -> SelectQuery {
        let base = self.catalog.base_type(class).to_string();
        let mut query = SelectQuery::from(base.clone());
        for table in self.catalog.data_tables_for(class) {
            if table != base {
                query = query.join_on_id(table);
            }
        }
        if class != base {
            let classes = self
                .catalog
                .descendants(class)
                .into_iter()
                .map(Value::from)
                .collect();
            query = query.filter(Condition::In(format!("{}.ClassName", base), classes));
        }
        query
    }

    fn to_local(&self, class: &str, row: Record) -> LocalRecord {
        let concrete = self.catalog.resolve_class(class, row.class_name()).to_string();
        let mut record = LocalRecord::new(concrete);
        record.id = row.id();
        for (name, value) in row.iter() {
            if name != "ID" && name != "ClassName" {
                record.fields.set(name.clone(), value.clone());
            }
        }
        record
    }

    /// Split a record's fields across the tables of its ancestry.
    async fn split(&self, record: &LocalRecord) -> Result<Vec<(String, Record)>> {
        let ancestry: Vec<String> = self
            .catalog
            .ancestry(&record.class_name)
            .into_iter()
            .map(String::from)
            .collect();
        let mut parts = Vec::with_capacity(ancestry.len());
        let mut placed = Vec::new();

        for (depth, table) in ancestry.iter().enumerate() {
            let columns = self.columns(table).await?;
            let mut values = Record::new();
            for (name, value) in record.fields.iter() {
                if let Some(column) = columns.iter().find(|c| c.eq_ignore_ascii_case(name)) {
                    if column != "ID" && column != "ClassName" {
                        values.set(column.clone(), value.clone());
                        placed.push(name.clone());
                    }
                }
            }
            if depth == 0 && columns.iter().any(|c| c == "ClassName") {
                values.set("ClassName", record.class_name.clone());
            }
            parts.push((table.clone(), values));
        }

        for name in record.fields.names() {
            if !placed.contains(name) {
                trace!("{} has no column for {}", record.class_name, name);
            }
        }
        Ok(parts)
    }
}

#[async_trait]
impl LocalStore for MysqlLocalStore {
    async fn get(&self, class: &str, id: i64) -> Result<Option<LocalRecord>> {
        Ok(self
            .find(class, &[Condition::eq("ID", id)])
            .await?
            .into_iter()
            .next())
    }

    async fn find(&self, class: &str, conditions: &[Condition]) -> Result<Vec<LocalRecord>> {
        let query = self
            .query_for(class)
            .filters(conditions.iter().cloned())
            .order_by("ID");
        let rows = self.session.select(&query).await?;
        Ok(rows.into_iter().map(|row| self.to_local(class, row)).collect())
    }

    async fn count(&self, class: &str) -> Result<u64> {
        let (inner, params) = render_select(&self.query_for(class));
        let sql = format!("SELECT COUNT(*) FROM ({}) AS q", inner);
        let mut conn = self.session.conn().await?;
        let count: Option<i64> = conn
            .exec_first(&sql, params)
            .await
            .map_err(|e| self.session.error(e, format!("counting {}", class)))?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn insert(&self, record: &mut LocalRecord) -> Result<i64> {
        let mut parts = self.split(record).await?.into_iter();
        let Some((base, mut values)) = parts.next() else {
            return Ok(0);
        };

        let base_columns = self.columns(&base).await?;
        let now = Value::DateTime(IdentityMap::now());
        for stamp in ["Created", "LastEdited"] {
            if base_columns.iter().any(|c| c == stamp) && !values.contains(stamp) {
                values.set(stamp, now.clone());
            }
        }
        if record.id > 0 {
            values.set("ID", record.id);
        }

        let id = self.session.insert_row(&base, &values).await?;
        record.id = id;
        for (table, values) in parts {
            self.session
                .insert_row(&table, &values.with("ID", id))
                .await?;
        }
        debug!("Inserted {}", record.label());
        Ok(id)
    }

    async fn update(&self, record: &LocalRecord) -> Result<()> {
        for (table, values) in self.split(record).await? {
            self.session.upsert_row(&table, record.id, &values).await?;
        }
        Ok(())
    }

    async fn publish(&self, record: &LocalRecord) -> Result<()> {
        for table in self.catalog.ancestry(&record.class_name) {
            let live = format!("{}_Live", table);
            if self.columns(&live).await?.is_empty() {
                continue;
            }
            let sql = format!(
                "REPLACE INTO {} SELECT * FROM {} WHERE {} = {}",
                quote_ident(&live),
                quote_ident(table),
                quote_ident("ID"),
                record.id
            );
            self.session.execute(&sql).await?;
        }
        Ok(())
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        self.session
            .execute(&format!("TRUNCATE TABLE {}", quote_ident(table)))
            .await
            .map(|_| ())
    }

    async fn select_rows(&self, table: &str, conditions: &[Condition]) -> Result<Vec<Record>> {
        let query = SelectQuery::from(table)
            .filters(conditions.iter().cloned())
            .order_by("ID");
        self.session.select(&query).await
    }

    async fn insert_row(&self, table: &str, row: &Record) -> Result<i64> {
        self.session.insert_row(table, row).await
    }

    async fn update_row(&self, table: &str, id: i64, values: &Record) -> Result<()> {
        self.session.update_row(table, id, values).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.session.execute(sql).await
    }

    async fn field_list(&self, table: &str) -> Result<Vec<String>> {
        self.session.field_list(table).await
    }

    async fn create_field(&self, table: &str, field: &str, spec: &str) -> Result<()> {
        self.session.create_field(table, field, spec).await?;
        self.columns.write().await.remove(table);
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        self.session.test_connection().await
    }

    fn backend_type(&self) -> &'static str {
        "mysql"
    }
}
