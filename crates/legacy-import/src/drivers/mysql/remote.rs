//! MySQL legacy database.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::Pool;

use super::{connect, render_select, Session, Side};
use crate::config::DatabaseConfig;
use crate::core::{Record, RemoteRecord, RemoteSource, SelectQuery, Value};
use crate::error::Result;

/// Legacy database reached through a mysql_async pool.
pub struct MysqlRemote {
    session: Session,
}

impl MysqlRemote {
    /// Connect using configuration.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = connect(config, Side::Remote).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            session: Session::new(pool, Side::Remote),
        }
    }

    /// Get a clone of the underlying connection pool.
    pub fn pool(&self) -> Pool {
        self.session.pool().clone()
    }
}

#[async_trait]
impl RemoteSource for MysqlRemote {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<RemoteRecord>> {
        self.session.select(query).await
    }

    async fn count(&self, query: &SelectQuery) -> Result<u64> {
        let (inner, params) = render_select(query);
        let sql = format!("SELECT COUNT(*) FROM ({}) AS q", inner);
        let mut conn = self.session.conn().await?;
        let count: Option<i64> = conn
            .exec_first(&sql, params)
            .await
            .map_err(|e| self.session.error(e, format!("counting {}", query.table)))?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.session.execute(sql).await
    }

    async fn value(&self, sql: &str) -> Result<Option<Value>> {
        self.session.value(sql).await
    }

    async fn update_row(&self, table: &str, id: i64, values: &Record) -> Result<()> {
        self.session.update_row(table, id, values).await
    }

    async fn field_list(&self, table: &str) -> Result<Vec<String>> {
        self.session.field_list(table).await
    }

    async fn create_field(&self, table: &str, field: &str, spec: &str) -> Result<()> {
        self.session.create_field(table, field, spec).await
    }

    async fn test_connection(&self) -> Result<()> {
        self.session.test_connection().await
    }

    fn backend_type(&self) -> &'static str {
        "mysql"
    }
}
