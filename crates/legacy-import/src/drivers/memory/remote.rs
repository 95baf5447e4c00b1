//! In-memory legacy database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use super::{bare_column, compare_values, matches_all, MemoryTable};
use crate::core::{lock, Record, RemoteRecord, RemoteSource, SelectQuery, Value};
use crate::error::{ImportError, Result};

/// Legacy database held in memory.
///
/// Joins merge rows that share the join column; when both tables carry the
/// same column the first non-null value wins, as with the MySQL backend.
#[derive(Default)]
pub struct MemoryRemote {
    tables: Mutex<HashMap<String, MemoryTable>>,
    scalars: Mutex<HashMap<String, Value>>,
    executed: Mutex<Vec<String>>,
}

impl MemoryRemote {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a table with rows.
    pub fn with_table(self, table: &str, rows: Vec<Record>) -> Self {
        lock(&self.tables).entry(table.to_string()).or_default().rows = rows;
        self
    }

    /// Builder: canned answer for a scalar query.
    pub fn with_scalar(self, sql: &str, value: impl Into<Value>) -> Self {
        lock(&self.scalars).insert(sql.to_string(), value.into());
        self
    }

    /// Append a row to a table, creating it if needed.
    pub fn insert(&self, table: &str, row: Record) {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .rows
            .push(row);
    }

    /// Replace a row by `ID`.
    pub fn replace(&self, table: &str, row: Record) {
        let mut tables = lock(&self.tables);
        let entry = tables.entry(table.to_string()).or_default();
        match entry.rows.iter_mut().find(|r| r.id() == row.id()) {
            Some(existing) => *existing = row,
            None => entry.rows.push(row),
        }
    }

    /// Every row of a table.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        lock(&self.tables)
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Statements passed to `execute`.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }
}

#[async_trait]
impl RemoteSource for MemoryRemote {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<RemoteRecord>> {
        let tables = lock(&self.tables);
        let Some(base) = tables.get(&query.table) else {
            return Err(ImportError::remote(
                format!("table '{}' doesn't exist", query.table),
                "memory select",
            ));
        };

        let mut rows = Vec::new();
        for base_row in &base.rows {
            let mut row = base_row.clone();
            for join in &query.joins {
                let key = base_row.get(&join.base_column).cloned().unwrap_or(Value::Null);
                let joined = tables.get(&join.table).and_then(|t| {
                    t.rows.iter().find(|r| {
                        r.get(&join.join_column)
                            .is_some_and(|v| v.matches(&key))
                    })
                });
                if let Some(joined) = joined {
                    for (name, value) in joined.iter() {
                        row.merge(name.clone(), value.clone());
                    }
                }
            }

            let keep = matches_all(|c| row.get(c).cloned(), &query.conditions)
                .map_err(|e| ImportError::remote(e, format!("selecting from {}", query.table)))?;
            if keep {
                rows.push(row);
            }
        }

        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| {
                query
                    .order_by
                    .iter()
                    .map(|c| compare_values(a.get(bare_column(c)), b.get(bare_column(c))))
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }

        if !query.columns.is_empty() {
            rows = rows
                .into_iter()
                .map(|row| {
                    query
                        .columns
                        .iter()
                        .map(|c| {
                            let name = bare_column(c).to_string();
                            let value = row.get(&name).cloned().unwrap_or(Value::Null);
                            (name, value)
                        })
                        .collect()
                })
                .collect();
        }

        Ok(rows)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        debug!("memory remote: {}", sql);
        lock(&self.executed).push(sql.to_string());
        Ok(0)
    }

    async fn value(&self, sql: &str) -> Result<Option<Value>> {
        Ok(lock(&self.scalars).get(sql).cloned())
    }

    async fn update_row(&self, table: &str, id: i64, values: &Record) -> Result<()> {
        let mut tables = lock(&self.tables);
        let row = tables
            .get_mut(table)
            .and_then(|t| t.rows.iter_mut().find(|r| r.id() == id))
            .ok_or_else(|| {
                ImportError::remote(
                    format!("no row {} in '{}'", id, table),
                    "memory update_row",
                )
            })?;
        for (name, value) in values.iter() {
            row.set(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn field_list(&self, table: &str) -> Result<Vec<String>> {
        Ok(lock(&self.tables)
            .get(table)
            .map(MemoryTable::field_list)
            .unwrap_or_default())
    }

    async fn create_field(&self, table: &str, field: &str, spec: &str) -> Result<()> {
        debug!("memory remote: ALTER TABLE {} ADD {} {}", table, field, spec);
        let mut tables = lock(&self.tables);
        let entry = tables.get_mut(table).ok_or_else(|| {
            ImportError::remote(format!("table '{}' doesn't exist", table), "create_field")
        })?;
        entry.add_column(field);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Condition;

    fn remote() -> MemoryRemote {
        MemoryRemote::new()
            .with_table(
                "SiteTree",
                vec![
                    Record::new().with("ID", 2).with("ClassName", "Page").with("Title", "B"),
                    Record::new().with("ID", 1).with("ClassName", "Page").with("Title", "A"),
                ],
            )
            .with_table(
                "Page",
                vec![Record::new().with("ID", 1).with("Summary", "first")],
            )
    }

    #[tokio::test]
    async fn test_select_joins_and_orders() {
        let rows = remote()
            .select(&SelectQuery::from("SiteTree").join_on_id("Page").order_by("ID"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id(), 1);
        assert_eq!(rows[0].get_str("Summary"), Some("first"));
        assert!(!rows[1].contains("Summary"));
    }

    #[tokio::test]
    async fn test_select_filters_and_projects() {
        let rows = remote()
            .select(
                &SelectQuery::from("SiteTree")
                    .columns(["ID"])
                    .filter(Condition::eq("Title", "B")),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![Record::new().with("ID", 2)]);
    }

    #[tokio::test]
    async fn test_missing_table_is_error() {
        let result = remote().select(&SelectQuery::from("Nope")).await;
        assert!(matches!(result, Err(ImportError::Remote { .. })));
        assert!(remote().field_list("Nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_row_and_fields() {
        let remote = remote();
        remote
            .create_field("SiteTree", "_ImportedID", "INT")
            .await
            .unwrap();
        remote
            .update_row("SiteTree", 1, &Record::new().with("_ImportedID", 9))
            .await
            .unwrap();
        let fields = remote.field_list("SiteTree").await.unwrap();
        assert!(fields.contains(&"_ImportedID".to_string()));
        let rows = remote
            .select(&SelectQuery::from("SiteTree").filter_eq("_ImportedID", 9))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
