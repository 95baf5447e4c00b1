//! Collaborator traits for the legacy database and the destination store.
//!
//! The engine never talks to a database directly. Importers and helpers are
//! handed an `Arc<dyn RemoteSource>` and an `Arc<dyn LocalStore>` at
//! construction, so the same reconciliation code runs against MySQL in
//! production and the in-memory backends in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! let remote: Arc<dyn RemoteSource> = Arc::new(MysqlRemote::new(&config.remote).await?);
//! let rows = remote.select(&SelectQuery::from("SiteTree").order_by("ID")).await?;
//! ```

use async_trait::async_trait;

use super::query::{Condition, SelectQuery};
use super::value::{LocalRecord, Record, RemoteRecord, Value};
use crate::error::Result;

/// Read access to the legacy database, plus the few writes needed to keep
/// bookkeeping columns on it.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Run a structured select and return every matching row.
    async fn select(&self, query: &SelectQuery) -> Result<Vec<RemoteRecord>>;

    /// Count the rows a select would return.
    async fn count(&self, query: &SelectQuery) -> Result<u64> {
        Ok(self.select(query).await?.len() as u64)
    }

    /// Execute a raw statement and return the number of affected rows.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// First column of the first row of a raw query.
    async fn value(&self, sql: &str) -> Result<Option<Value>>;

    /// Update columns of one row by `ID`.
    async fn update_row(&self, table: &str, id: i64, values: &Record) -> Result<()>;

    /// Column names of a table; empty if the table does not exist.
    async fn field_list(&self, table: &str) -> Result<Vec<String>>;

    /// Add a column to a table.
    async fn create_field(&self, table: &str, field: &str, spec: &str) -> Result<()>;

    /// Check the connection.
    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}

/// Typed record storage in the destination database.
///
/// Typed operations (`get`, `find`, `insert`, `update`) take content type
/// names and include subtypes; raw operations (`select_rows`, `insert_row`,
/// `update_row`) address a single table.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Fetch a record of `class` (or a subtype) by id.
    async fn get(&self, class: &str, id: i64) -> Result<Option<LocalRecord>>;

    /// All records of `class` and its subtypes matching every condition,
    /// ordered by id.
    async fn find(&self, class: &str, conditions: &[Condition]) -> Result<Vec<LocalRecord>>;

    /// First record of `class` matching every condition.
    async fn find_first(
        &self,
        class: &str,
        conditions: &[Condition],
    ) -> Result<Option<LocalRecord>> {
        Ok(self.find(class, conditions).await?.into_iter().next())
    }

    /// Number of records of `class` and its subtypes.
    async fn count(&self, class: &str) -> Result<u64> {
        Ok(self.find(class, &[]).await?.len() as u64)
    }

    /// Insert a new record and assign its id.
    ///
    /// A record that already carries a non-zero id keeps it.
    async fn insert(&self, record: &mut LocalRecord) -> Result<i64>;

    /// Write every field of an existing record.
    async fn update(&self, record: &LocalRecord) -> Result<()>;

    /// Insert unsaved records, update saved ones.
    async fn save(&self, record: &mut LocalRecord) -> Result<()> {
        if record.is_saved() {
            self.update(record).await
        } else {
            self.insert(record).await.map(|_| ())
        }
    }

    /// Copy a record to its published stage.
    async fn publish(&self, record: &LocalRecord) -> Result<()>;

    /// Remove every row of a table.
    async fn truncate(&self, table: &str) -> Result<()>;

    /// Raw rows of one table matching every condition, ordered by `ID`.
    async fn select_rows(&self, table: &str, conditions: &[Condition]) -> Result<Vec<Record>>;

    /// First raw row of one table matching every condition.
    async fn find_row(&self, table: &str, conditions: &[Condition]) -> Result<Option<Record>> {
        Ok(self.select_rows(table, conditions).await?.into_iter().next())
    }

    /// Insert a raw row and return its id.
    async fn insert_row(&self, table: &str, row: &Record) -> Result<i64>;

    /// Update columns of one raw row by `ID`.
    async fn update_row(&self, table: &str, id: i64, values: &Record) -> Result<()>;

    /// Execute a raw statement and return the number of affected rows.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Column names of a table; empty if the table does not exist.
    async fn field_list(&self, table: &str) -> Result<Vec<String>>;

    /// Add a column to a table.
    async fn create_field(&self, table: &str, field: &str, spec: &str) -> Result<()>;

    /// Check the connection.
    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}

/// Add `field` to `table` unless it already exists.
///
/// Returns true when the column was created.
pub async fn ensure_remote_column(
    remote: &dyn RemoteSource,
    table: &str,
    field: &str,
    spec: &str,
) -> Result<bool> {
    let fields = remote.field_list(table).await?;
    if fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
        return Ok(false);
    }
    remote.create_field(table, field, spec).await?;
    Ok(true)
}

/// Add `field` to a local `table` unless it already exists.
pub async fn ensure_local_column(
    local: &dyn LocalStore,
    table: &str,
    field: &str,
    spec: &str,
) -> Result<bool> {
    let fields = local.field_list(table).await?;
    if fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
        return Ok(false);
    }
    local.create_field(table, field, spec).await?;
    Ok(true)
}
