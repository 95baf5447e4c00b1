//! Legacy-column mapping storage.
//!
//! Keeps mappings on the content tables themselves: `_ImportedID` and
//! `_ImportedDate` on the remote base table, `LegacyID` on the local one.
//! The object type name is the local table. The remote table defaults to the
//! same name and is replaced by the one given to `prepare`, so a type read
//! from a renamed legacy table keeps its columns there.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::backend::MappingStore;
use super::LegacyMapping;
use crate::core::{
    ensure_local_column, ensure_remote_column, lock, Condition, LocalStore, Record,
    RemoteSource, SelectQuery, Value,
};
use crate::error::Result;

/// Remote column holding the local id.
pub const IMPORTED_ID: &str = "_ImportedID";
/// Remote column holding the last sync time.
pub const IMPORTED_DATE: &str = "_ImportedDate";
/// Local column holding the remote id.
pub const LEGACY_ID: &str = "LegacyID";

/// Mapping store over bookkeeping columns on both databases.
pub struct ColumnMappingStore {
    remote: Arc<dyn RemoteSource>,
    local: Arc<dyn LocalStore>,
    remote_tables: Mutex<HashMap<String, String>>,
}

impl ColumnMappingStore {
    pub fn new(remote: Arc<dyn RemoteSource>, local: Arc<dyn LocalStore>) -> Self {
        Self {
            remote,
            local,
            remote_tables: Mutex::new(HashMap::new()),
        }
    }

    /// Remote table holding the bookkeeping columns of a type.
    fn remote_table(&self, object_type: &str) -> String {
        lock(&self.remote_tables)
            .get(object_type)
            .cloned()
            .unwrap_or_else(|| object_type.to_string())
    }

    fn mapping_from_remote(object_type: &str, row: &Record) -> Option<LegacyMapping> {
        let local_id = row.get_i64(IMPORTED_ID);
        if local_id <= 0 {
            return None;
        }
        Some(LegacyMapping {
            object_type: object_type.to_string(),
            local_id,
            remote_id: row.id(),
            imported_date: row.get(IMPORTED_DATE).and_then(Value::as_datetime),
        })
    }

    async fn remote_rows(&self, object_type: &str, condition: Condition) -> Result<Vec<Record>> {
        self.remote
            .select(
                &SelectQuery::from(self.remote_table(object_type))
                    .columns(["ID", IMPORTED_ID, IMPORTED_DATE])
                    .filter(condition)
                    .order_by("ID"),
            )
            .await
    }

    async fn reset_remote(&self, object_type: &str, id: i64) -> Result<()> {
        let values = Record::new()
            .with(IMPORTED_ID, 0)
            .with(IMPORTED_DATE, Value::Null);
        self.remote
            .update_row(&self.remote_table(object_type), id, &values)
            .await
    }

    async fn reset_local(&self, table: &str, id: i64) -> Result<()> {
        self.local
            .update_row(table, id, &Record::new().with(LEGACY_ID, 0))
            .await
    }
}

#[async_trait]
impl MappingStore for ColumnMappingStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn prepare(&self, object_type: &str, remote_table: &str) -> Result<()> {
        lock(&self.remote_tables).insert(object_type.to_string(), remote_table.to_string());
        ensure_remote_column(
            self.remote.as_ref(),
            remote_table,
            IMPORTED_ID,
            "INT NOT NULL DEFAULT 0",
        )
        .await?;
        ensure_remote_column(
            self.remote.as_ref(),
            remote_table,
            IMPORTED_DATE,
            "DATETIME NULL",
        )
        .await?;
        ensure_local_column(
            self.local.as_ref(),
            object_type,
            LEGACY_ID,
            "INT NOT NULL DEFAULT 0",
        )
        .await?;
        Ok(())
    }

    async fn find_by_remote(
        &self,
        object_type: &str,
        remote_id: i64,
    ) -> Result<Option<LegacyMapping>> {
        let rows = self
            .remote_rows(object_type, Condition::eq("ID", remote_id))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| Self::mapping_from_remote(object_type, row)))
    }

    async fn find_by_local(
        &self,
        object_type: &str,
        local_id: i64,
    ) -> Result<Option<LegacyMapping>> {
        let rows = self
            .remote_rows(object_type, Condition::eq(IMPORTED_ID, local_id))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| Self::mapping_from_remote(object_type, row)))
    }

    async fn upsert(&self, mapping: &LegacyMapping) -> Result<()> {
        let remote_values = Record::new()
            .with(IMPORTED_ID, mapping.local_id)
            .with(IMPORTED_DATE, Value::from(mapping.imported_date));
        self.remote
            .update_row(
                &self.remote_table(&mapping.object_type),
                mapping.remote_id,
                &remote_values,
            )
            .await?;
        self.local
            .update_row(
                &mapping.object_type,
                mapping.local_id,
                &Record::new().with(LEGACY_ID, mapping.remote_id),
            )
            .await
    }

    async fn delete(&self, object_type: &str, local_id: i64, remote_id: i64) -> Result<()> {
        let mut stale = self
            .remote_rows(object_type, Condition::eq(IMPORTED_ID, local_id))
            .await?;
        stale.extend(
            self.remote_rows(object_type, Condition::eq("ID", remote_id))
                .await?,
        );
        for row in stale {
            let Some(mapping) = Self::mapping_from_remote(object_type, &row) else {
                continue;
            };
            self.reset_remote(object_type, mapping.remote_id).await?;
            self.reset_local(object_type, mapping.local_id).await?;
        }
        Ok(())
    }

    async fn list(&self, object_type: &str) -> Result<Vec<LegacyMapping>> {
        let rows = self
            .remote_rows(object_type, Condition::ne(IMPORTED_ID, 0))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| Self::mapping_from_remote(object_type, row))
            .collect())
    }

    async fn clear(&self, object_type: &str) -> Result<u64> {
        let mappings = self.list(object_type).await?;
        for mapping in &mappings {
            self.reset_remote(object_type, mapping.remote_id).await?;
            self.reset_local(object_type, mapping.local_id).await?;
        }
        Ok(mappings.len() as u64)
    }

    fn backend_type(&self) -> &'static str {
        "columns"
    }
}
