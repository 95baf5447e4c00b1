//! Structured select specification understood by every backend.

use super::value::Value;

/// A single WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value`
    Eq(String, Value),
    /// `column <> value`
    Ne(String, Value),
    /// `column IN (values)`
    In(String, Vec<Value>),
    /// `column IS NULL`
    IsNull(String),
    /// Raw SQL fragment, passed through untouched by SQL backends.
    Raw(String),
}

impl Condition {
    /// Equality condition.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(column.into(), value.into())
    }

    /// Inequality condition.
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Ne(column.into(), value.into())
    }
}

/// `LEFT JOIN table ON table.ID = base.ID`
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Joined table.
    pub table: String,
    /// Column on the base table.
    pub base_column: String,
    /// Column on the joined table.
    pub join_column: String,
}

/// Select specification: table, joins, conditions and ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    /// Base table.
    pub table: String,

    /// Projected columns; empty means every column of every table.
    pub columns: Vec<String>,

    /// Left joins onto the base table.
    pub joins: Vec<Join>,

    /// Conditions, combined with AND.
    pub conditions: Vec<Condition>,

    /// Ordering columns (ascending).
    pub order_by: Vec<String>,

    /// Row limit.
    pub limit: Option<u64>,
}

impl SelectQuery {
    /// Select every column from a table.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Restrict the projection.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Left join a table that shares the base table's `ID`.
    pub fn join_on_id(mut self, table: impl Into<String>) -> Self {
        self.joins.push(Join {
            table: table.into(),
            base_column: "ID".into(),
            join_column: "ID".into(),
        });
        self
    }

    /// Add a condition.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add an equality condition.
    pub fn filter_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Condition::eq(column, value))
    }

    /// Add several conditions.
    pub fn filters(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    /// Order by a column, ascending.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    /// Limit the number of rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Tables addressed by this query, base table first.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.table.as_str()).chain(self.joins.iter().map(|j| j.table.as_str()))
    }
}
