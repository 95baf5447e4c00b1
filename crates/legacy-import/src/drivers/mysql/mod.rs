//! MySQL/MariaDB backends.
//!
//! This module provides MySQL implementations of the collaborator traits:
//! - [`MysqlRemote`]: the legacy database
//! - [`MysqlLocalStore`]: the destination database, with records split
//!   across the tables of their class ancestry
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod convert;
mod local;
mod remote;

pub use local::MysqlLocalStore;
pub use remote::MysqlRemote;

use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::core::{Condition, Record, SelectQuery, Value};
use crate::error::{ImportError, Result};

pub(crate) use convert::{row_to_record, to_mysql};

/// Maximum connections per pool; the engine is a single writer.
const MAX_CONNECTIONS: usize = 4;

/// Which database a connection belongs to, for error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Remote,
    Local,
}

impl Side {
    fn error(self, e: impl ToString, context: impl Into<String>) -> ImportError {
        match self {
            Side::Remote => ImportError::remote(e, context),
            Side::Local => ImportError::local(e, context),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Side::Remote => "remote",
            Side::Local => "local",
        }
    }
}

/// Quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Create a connection pool and verify it with `SELECT 1`.
pub async fn connect(config: &DatabaseConfig, side: Side) -> Result<Pool> {
    let ssl_opts = match config.ssl_mode.to_lowercase().as_str() {
        "disable" => {
            warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
            None
        }
        "prefer" => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
        "require" => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
        "verify-ca" | "verify_ca" => Some(SslOpts::default()),
        "verify-full" | "verify_identity" => Some(SslOpts::default()),
        _ => {
            warn!(
                "Unknown ssl_mode '{}', defaulting to Preferred",
                config.ssl_mode
            );
            Some(SslOpts::default().with_danger_accept_invalid_certs(true))
        }
    };

    let mut builder = OptsBuilder::default()
        .ip_or_hostname(&config.host)
        .tcp_port(config.port)
        .db_name(Some(&config.database))
        .user(Some(&config.user))
        .pass(Some(&config.password))
        // Use utf8mb4 for full Unicode support
        .init(vec!["SET NAMES utf8mb4"]);

    if let Some(ssl) = ssl_opts {
        builder = builder.ssl_opts(ssl);
    }

    let constraints = PoolConstraints::new(1, MAX_CONNECTIONS)
        .ok_or_else(|| ImportError::Config("invalid MySQL pool constraints".into()))?;
    let opts: Opts = builder
        .pool_opts(PoolOpts::new().with_constraints(constraints))
        .into();
    let pool = Pool::new(opts);

    let mut conn = pool
        .get_conn()
        .await
        .map_err(|e| side.error(e, format!("creating MySQL {} pool", side.label())))?;
    conn.query_drop("SELECT 1")
        .await
        .map_err(|e| side.error(e, format!("testing MySQL {} connection", side.label())))?;
    drop(conn);

    info!(
        "Connected to MySQL {}: {}:{}/{}",
        side.label(),
        config.host,
        config.port,
        config.database
    );
    Ok(pool)
}

/// Qualify a column reference: `ID` belongs to the base table, `t.c` is split.
fn column_ref(base: &str, column: &str) -> String {
    match column.split_once('.') {
        Some((table, col)) => format!("{}.{}", quote_ident(table), quote_ident(col)),
        None if column == "ID" => format!("{}.{}", quote_ident(base), quote_ident("ID")),
        None => quote_ident(column),
    }
}

/// Render conditions as a WHERE clause body plus positional parameters.
pub(crate) fn render_conditions(
    base: &str,
    conditions: &[Condition],
    params: &mut Vec<mysql_async::Value>,
) -> Vec<String> {
    conditions
        .iter()
        .map(|condition| match condition {
            Condition::Eq(column, Value::Null) | Condition::IsNull(column) => {
                format!("{} IS NULL", column_ref(base, column))
            }
            Condition::Eq(column, value) => {
                params.push(to_mysql(value));
                format!("{} = ?", column_ref(base, column))
            }
            Condition::Ne(column, value) => {
                params.push(to_mysql(value));
                format!("{} <> ?", column_ref(base, column))
            }
            Condition::In(_, values) if values.is_empty() => "1 = 0".to_string(),
            Condition::In(column, values) => {
                params.extend(values.iter().map(to_mysql));
                format!(
                    "{} IN ({})",
                    column_ref(base, column),
                    vec!["?"; values.len()].join(", ")
                )
            }
            Condition::Raw(sql) => format!("({})", sql),
        })
        .collect()
}

/// Render a structured select with positional parameters.
pub(crate) fn render_select(query: &SelectQuery) -> (String, Vec<mysql_async::Value>) {
    let base = &query.table;
    let columns = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query
            .columns
            .iter()
            .map(|c| column_ref(base, c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", columns, quote_ident(base));
    for join in &query.joins {
        sql.push_str(&format!(
            " LEFT JOIN {t} ON {t}.{jc} = {b}.{bc}",
            t = quote_ident(&join.table),
            jc = quote_ident(&join.join_column),
            b = quote_ident(base),
            bc = quote_ident(&join.base_column),
        ));
    }

    let mut params = Vec::new();
    let clauses = render_conditions(base, &query.conditions, &mut params);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if !query.order_by.is_empty() {
        let order: Vec<String> = query.order_by.iter().map(|c| column_ref(base, c)).collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    (sql, params)
}

/// Pool plus the side it belongs to; shared plumbing of both backends.
#[derive(Clone)]
pub(crate) struct Session {
    pool: Pool,
    side: Side,
}

impl Session {
    pub fn new(pool: Pool, side: Side) -> Self {
        Self { pool, side }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn error(&self, e: impl ToString, context: impl Into<String>) -> ImportError {
        self.side.error(e, context)
    }

    pub async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| self.error(e, format!("getting MySQL {} connection", self.side.label())))
    }

    pub async fn select(&self, query: &SelectQuery) -> Result<Vec<Record>> {
        let (sql, params) = render_select(query);
        let mut conn = self.conn().await?;
        let rows: Vec<mysql_async::Row> = conn
            .exec(&sql, params)
            .await
            .map_err(|e| self.error(e, format!("selecting from {}", query.table)))?;
        Ok(rows.into_iter().map(row_to_record).collect())
    }

    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        conn.query_drop(sql)
            .await
            .map_err(|e| self.error(e, format!("executing: {}", sql)))?;
        Ok(conn.affected_rows())
    }

    pub async fn value(&self, sql: &str) -> Result<Option<Value>> {
        let mut conn = self.conn().await?;
        let row: Option<mysql_async::Row> = conn
            .query_first(sql)
            .await
            .map_err(|e| self.error(e, format!("querying: {}", sql)))?;
        Ok(row
            .and_then(|r| r.as_ref(0).cloned())
            .map(convert::from_mysql))
    }

    /// Insert a row and return its id (explicit or auto-increment).
    pub async fn insert_row(&self, table: &str, row: &Record) -> Result<i64> {
        let columns: Vec<String> = row.names().map(|c| quote_ident(c)).collect();
        let params: Vec<mysql_async::Value> = row.iter().map(|(_, v)| to_mysql(v)).collect();
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} () VALUES ()", quote_ident(table))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };
        let mut conn = self.conn().await?;
        conn.exec_drop(&sql, params)
            .await
            .map_err(|e| self.error(e, format!("inserting into {}", table)))?;
        let id = match row.get("ID").and_then(Value::as_i64) {
            Some(id) if id > 0 => id,
            _ => conn.last_insert_id().unwrap_or(0) as i64,
        };
        Ok(id)
    }

    /// Insert or update a row keyed by `ID`.
    pub async fn upsert_row(&self, table: &str, id: i64, values: &Record) -> Result<()> {
        let mut columns = vec![quote_ident("ID")];
        let mut params = vec![mysql_async::Value::from(id)];
        let mut updates = Vec::new();
        for (name, value) in values.iter() {
            if name == "ID" {
                continue;
            }
            let quoted = quote_ident(name);
            updates.push(format!("{q} = VALUES({q})", q = quoted));
            columns.push(quoted);
            params.push(to_mysql(value));
        }
        let sql = if updates.is_empty() {
            format!(
                "INSERT IGNORE INTO {} ({}) VALUES (?)",
                quote_ident(table),
                columns.join(", ")
            )
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                quote_ident(table),
                columns.join(", "),
                vec!["?"; columns.len()].join(", "),
                updates.join(", ")
            )
        };
        let mut conn = self.conn().await?;
        conn.exec_drop(&sql, params)
            .await
            .map_err(|e| self.error(e, format!("writing {} #{}", table, id)))?;
        Ok(())
    }

    pub async fn update_row(&self, table: &str, id: i64, values: &Record) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let assignments: Vec<String> = values
            .names()
            .map(|c| format!("{} = ?", quote_ident(c)))
            .collect();
        let mut params: Vec<mysql_async::Value> =
            values.iter().map(|(_, v)| to_mysql(v)).collect();
        params.push(mysql_async::Value::from(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(table),
            assignments.join(", "),
            quote_ident("ID")
        );
        let mut conn = self.conn().await?;
        conn.exec_drop(&sql, params)
            .await
            .map_err(|e| self.error(e, format!("updating {} #{}", table, id)))?;
        Ok(())
    }

    pub async fn field_list(&self, table: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.exec(
            "SELECT COLUMN_NAME FROM information_schema.COLUMNS
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
             ORDER BY ORDINAL_POSITION",
            (table,),
        )
        .await
        .map_err(|e| self.error(e, format!("listing columns of {}", table)))
    }

    pub async fn create_field(&self, table: &str, field: &str, spec: &str) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} ADD {} {}",
            quote_ident(table),
            quote_ident(field),
            spec
        );
        info!("Adding column {}.{} ({})", table, field, self.side.label());
        self.execute(&sql).await.map(|_| ())
    }

    pub async fn test_connection(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| self.error(e, "testing MySQL connection"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("SiteTree"), "`SiteTree`");
        assert_eq!(quote_ident("odd`name"), "`odd``name`");
    }

    #[test]
    fn test_render_select() {
        let query = SelectQuery::from("SiteTree")
            .join_on_id("Page")
            .filter(Condition::In(
                "ClassName".into(),
                vec![Value::from("Page"), Value::from("NewsPage")],
            ))
            .filter_eq("ParentID", 0)
            .filter(Condition::Raw("ShowInMenus = 1".into()))
            .order_by("ID")
            .limit(10);
        let (sql, params) = render_select(&query);
        assert_eq!(
            sql,
            "SELECT * FROM `SiteTree` LEFT JOIN `Page` ON `Page`.`ID` = `SiteTree`.`ID` \
             WHERE `ClassName` IN (?, ?) AND `ParentID` = ? AND (ShowInMenus = 1) \
             ORDER BY `SiteTree`.`ID` LIMIT 10"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_render_null_and_empty_in() {
        let query = SelectQuery::from("File")
            .columns(["ID", "Filename"])
            .filter_eq("ParentID", Value::Null)
            .filter(Condition::In("ID".into(), vec![]));
        let (sql, params) = render_select(&query);
        assert_eq!(
            sql,
            "SELECT `File`.`ID`, `Filename` FROM `File` WHERE `ParentID` IS NULL AND 1 = 0"
        );
        assert!(params.is_empty());
    }
}
