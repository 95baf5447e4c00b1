//! In-memory backends for tests and dry runs.
//!
//! - [`MemoryRemote`]: tables of rows keyed by name
//! - [`MemoryLocalStore`]: typed records with subtype-aware lookups
//!
//! Conditions are evaluated with the same NULL semantics as SQL: NULL never
//! equals anything and `<>` against NULL is false. Raw SQL conditions cannot
//! be evaluated and are rejected.

mod local;
mod remote;

pub use local::MemoryLocalStore;
pub use remote::MemoryRemote;

use std::cmp::Ordering;

use crate::core::{Condition, Record, Value};

/// One raw table: declared columns plus rows.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl MemoryTable {
    pub fn add_column(&mut self, column: &str) {
        if !self.columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            self.columns.push(column.to_string());
        }
    }

    /// Columns declared or seen on any row.
    pub fn field_list(&self) -> Vec<String> {
        let mut columns = self.columns.clone();
        for row in &self.rows {
            for name in row.names() {
                if !columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                    columns.push(name.clone());
                }
            }
        }
        columns
    }

    pub fn next_id(&self) -> i64 {
        self.rows.iter().map(Record::id).max().unwrap_or(0) + 1
    }
}

/// Strip a `table.` qualifier from a column reference.
pub(crate) fn bare_column(column: &str) -> &str {
    column
        .rsplit_once('.')
        .map(|(_, c)| c)
        .unwrap_or(column)
        .trim_matches('`')
}

/// Evaluate conditions against a row accessor.
///
/// Fails with a message when a condition cannot be evaluated in memory.
pub(crate) fn matches_all<F>(lookup: F, conditions: &[Condition]) -> Result<bool, String>
where
    F: Fn(&str) -> Option<Value>,
{
    for condition in conditions {
        let ok = match condition {
            Condition::Eq(column, Value::Null) | Condition::IsNull(column) => {
                lookup(bare_column(column)).map_or(true, |v| v.is_null())
            }
            Condition::Eq(column, expected) => lookup(bare_column(column))
                .is_some_and(|v| v.matches(expected)),
            Condition::Ne(column, expected) => lookup(bare_column(column))
                .is_some_and(|v| !v.is_null() && !v.matches(expected)),
            Condition::In(column, values) => lookup(bare_column(column))
                .is_some_and(|v| values.iter().any(|candidate| v.matches(candidate))),
            Condition::Raw(sql) => {
                return Err(format!(
                    "raw condition '{}' cannot be evaluated in memory",
                    sql
                ))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Order two values the way MySQL orders mixed numeric and text columns.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) if !matches!(a, Value::Text(_)) || !matches!(b, Value::Text(_)) => {
                x.cmp(&y)
            }
            _ => a.key_string().cmp(&b.key_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Record {
        Record::new()
            .with("ID", 3)
            .with("Title", "Home")
            .with("ParentID", 0)
            .with("Summary", Value::Null)
    }

    fn eval(conditions: &[Condition]) -> bool {
        let r = row();
        matches_all(|c| r.get(c).cloned(), conditions).unwrap()
    }

    #[test]
    fn test_condition_semantics() {
        assert!(eval(&[Condition::eq("Title", "Home")]));
        assert!(eval(&[Condition::eq("SiteTree.ParentID", 0)]));
        assert!(!eval(&[Condition::eq("Title", "home")]));
        assert!(eval(&[Condition::IsNull("Summary".into())]));
        assert!(eval(&[Condition::IsNull("Missing".into())]));
        assert!(!eval(&[Condition::ne("Summary", "x")]));
        assert!(eval(&[Condition::In(
            "ID".into(),
            vec![Value::Int(1), Value::Int(3)]
        )]));
    }

    #[test]
    fn test_raw_condition_rejected() {
        let r = row();
        let result = matches_all(|c| r.get(c).cloned(), &[Condition::Raw("1=1".into())]);
        assert!(result.is_err());
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(
            compare_values(Some(&Value::Int(9)), Some(&Value::Int(10))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&Value::Null), Some(&Value::Int(1))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&Value::Text("b".into())), Some(&Value::Text("a".into()))),
            Ordering::Greater
        );
    }
}
