//! MySQL side-table mapping storage.
//!
//! Stores every mapping in one `_LegacyMapping` table in the local database.
//! The unique keys on `(ObjectType, LocalID)` and `(ObjectType, RemoteID)`
//! back the one-to-one invariant at the schema level.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use mysql_async::prelude::*;
use mysql_async::{params, Pool, Row as MySqlRow};

use super::backend::MappingStore;
use super::LegacyMapping;
use crate::drivers::mysql::quote_ident;
use crate::error::{ImportError, Result};

/// MySQL side-table mapping store.
pub struct MysqlMappingStore {
    pool: Pool,
    table: String,
}

impl MysqlMappingStore {
    /// Create a store over the given table in the pool's database.
    pub fn new(pool: Pool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    async fn conn(&self, context: &str) -> Result<mysql_async::Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| ImportError::local(e, context.to_string()))
    }

    fn row_to_mapping(row: MySqlRow) -> LegacyMapping {
        LegacyMapping {
            object_type: row.get("ObjectType").unwrap_or_default(),
            local_id: row.get::<Option<i64>, _>("LocalID").flatten().unwrap_or(0),
            remote_id: row.get::<Option<i64>, _>("RemoteID").flatten().unwrap_or(0),
            imported_date: row
                .get::<Option<NaiveDateTime>, _>("ImportedDate")
                .flatten(),
        }
    }

    async fn find_one(
        &self,
        column: &str,
        object_type: &str,
        id: i64,
    ) -> Result<Option<LegacyMapping>> {
        let mut conn = self.conn("getting MySQL connection for mapping lookup").await?;
        let sql = format!(
            "SELECT ObjectType, LocalID, RemoteID, ImportedDate FROM {}
             WHERE ObjectType = ? AND {} = ? LIMIT 1",
            quote_ident(&self.table),
            column
        );
        let row: Option<MySqlRow> = conn
            .exec_first(&sql, (object_type, id))
            .await
            .map_err(|e| ImportError::local(e, format!("looking up mapping by {}", column)))?;
        Ok(row.map(Self::row_to_mapping))
    }
}

#[async_trait]
impl MappingStore for MysqlMappingStore {
    async fn init_schema(&self) -> Result<()> {
        let mut conn = self.conn("getting MySQL mapping connection").await?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                ObjectType VARCHAR(100) NOT NULL,
                LocalID INT NOT NULL,
                RemoteID INT NOT NULL,
                ImportedDate DATETIME NULL,
                UNIQUE KEY uq_local (ObjectType, LocalID),
                UNIQUE KEY uq_remote (ObjectType, RemoteID)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            quote_ident(&self.table)
        );
        conn.query_drop(&sql)
            .await
            .map_err(|e| ImportError::local(e, "creating legacy mapping table"))?;
        Ok(())
    }

    async fn find_by_remote(
        &self,
        object_type: &str,
        remote_id: i64,
    ) -> Result<Option<LegacyMapping>> {
        self.find_one("RemoteID", object_type, remote_id).await
    }

    async fn find_by_local(
        &self,
        object_type: &str,
        local_id: i64,
    ) -> Result<Option<LegacyMapping>> {
        self.find_one("LocalID", object_type, local_id).await
    }

    async fn upsert(&self, mapping: &LegacyMapping) -> Result<()> {
        let mut conn = self.conn("getting MySQL connection for mapping upsert").await?;
        let sql = format!(
            "INSERT INTO {} (ObjectType, LocalID, RemoteID, ImportedDate)
             VALUES (:object_type, :local_id, :remote_id, :imported_date)
             ON DUPLICATE KEY UPDATE ImportedDate = VALUES(ImportedDate)",
            quote_ident(&self.table)
        );
        conn.exec_drop(
            &sql,
            params! {
                "object_type" => &mapping.object_type,
                "local_id" => mapping.local_id,
                "remote_id" => mapping.remote_id,
                "imported_date" => mapping.imported_date,
            },
        )
        .await
        .map_err(|e| {
            ImportError::local(
                e,
                format!(
                    "saving mapping {} local {} remote {}",
                    mapping.object_type, mapping.local_id, mapping.remote_id
                ),
            )
        })?;
        Ok(())
    }

    async fn delete(&self, object_type: &str, local_id: i64, remote_id: i64) -> Result<()> {
        let mut conn = self.conn("getting MySQL connection for mapping delete").await?;
        let sql = format!(
            "DELETE FROM {} WHERE ObjectType = ? AND (LocalID = ? OR RemoteID = ?)",
            quote_ident(&self.table)
        );
        conn.exec_drop(&sql, (object_type, local_id, remote_id))
            .await
            .map_err(|e| ImportError::local(e, format!("deleting {} mapping", object_type)))?;
        Ok(())
    }

    async fn list(&self, object_type: &str) -> Result<Vec<LegacyMapping>> {
        let mut conn = self.conn("getting MySQL connection for mapping list").await?;
        let sql = format!(
            "SELECT ObjectType, LocalID, RemoteID, ImportedDate FROM {}
             WHERE ObjectType = ? ORDER BY RemoteID",
            quote_ident(&self.table)
        );
        let rows: Vec<MySqlRow> = conn
            .exec(&sql, (object_type,))
            .await
            .map_err(|e| ImportError::local(e, format!("listing {} mappings", object_type)))?;
        Ok(rows.into_iter().map(Self::row_to_mapping).collect())
    }

    async fn clear(&self, object_type: &str) -> Result<u64> {
        let mut conn = self.conn("getting MySQL connection for mapping clear").await?;
        let sql = format!(
            "DELETE FROM {} WHERE ObjectType = ?",
            quote_ident(&self.table)
        );
        conn.exec_drop(&sql, (object_type,))
            .await
            .map_err(|e| ImportError::local(e, format!("clearing {} mappings", object_type)))?;
        Ok(conn.affected_rows())
    }

    fn backend_type(&self) -> &'static str {
        "mysql"
    }
}
