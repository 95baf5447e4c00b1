//! Field values and records exchanged between the legacy and local stores.
//!
//! Both databases are addressed through the same small value model so that
//! the matcher and field copier never need to know which driver produced a row.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

/// Timestamp format used when values round-trip through text.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// Any integer column (tinyint through bigint).
    Int(i64),

    /// Floating point or decimal column.
    Float(f64),

    /// Character data, including HTML content.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// Date or datetime column, no timezone.
    DateTime(NaiveDateTime),
}

impl Value {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Interpret the value as an integer id or count.
    ///
    /// Text is parsed when it holds an integer; everything else that is not
    /// numeric yields `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow the value as a string slice if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as a timestamp.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::Text(s) => NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok(),
            _ => None,
        }
    }

    /// True for NULL, zero, false and empty strings.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Int(v) => *v == 0,
            Value::Float(f) => *f == 0.0,
            Value::Text(s) => s.is_empty() || s == "0",
            Value::Bytes(b) => b.is_empty(),
            Value::DateTime(_) => false,
        }
    }

    /// Normalized comparison key, or `None` for NULL.
    ///
    /// Drivers disagree on column types (an enum may arrive as text on one side
    /// and an integer on the other), so natural keys compare by their textual
    /// form. NULL never matches anything.
    pub fn key_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { "1".into() } else { "0".into() }),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(f) if f.fract() == 0.0 => Some(format!("{}", *f as i64)),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::DateTime(dt) => Some(dt.format(DATETIME_FORMAT).to_string()),
        }
    }

    /// True when both values are non-NULL and share the same key.
    pub fn matches(&self, other: &Value) -> bool {
        match (self.key_string(), other.key_string()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Convert a scalar from YAML configuration.
    pub fn from_yaml(value: &serde_yaml::Value) -> Value {
        match value {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(*b),
            serde_yaml::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or(Value::Null),
            serde_yaml::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(serde_yaml::to_string(other).unwrap_or_default()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Field name to value map for one row.
///
/// Remote rows are produced once and only read afterwards; local rows are
/// mutated by the field copier and helpers before a single save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a field value, replacing any previous one.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Builder form of [`Record::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Merge a column from a joined table.
    ///
    /// Ancestor and descendant tables share the `ID` column and frequently
    /// carry NULLs for rows of other subclasses, so the first non-null value
    /// seen for a name wins.
    pub fn merge(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        match self.fields.get(&field) {
            Some(existing) if !existing.is_null() => {}
            _ => {
                self.fields.insert(field, value);
            }
        }
    }

    /// Remove a field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Check whether a field is present.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Integer value of a field, `0` when missing or not numeric.
    pub fn get_i64(&self, field: &str) -> i64 {
        self.get(field).and_then(Value::as_i64).unwrap_or(0)
    }

    /// Text value of a field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// The row's `ID` column.
    pub fn id(&self) -> i64 {
        self.get_i64("ID")
    }

    /// The row's `ClassName` discriminator, if any.
    pub fn class_name(&self) -> Option<&str> {
        self.get_str("ClassName").filter(|s| !s.is_empty())
    }

    /// Iterate over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Field names in name order.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A remote row is read-only once fetched.
pub type RemoteRecord = Record;

/// A record in the destination store.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    /// Concrete type of the record.
    pub class_name: String,

    /// Local identifier, `0` until the record is first saved.
    pub id: i64,

    /// Field values, excluding `ID` and `ClassName`.
    pub fields: Record,
}

impl LocalRecord {
    /// Create an unsaved record of the given type.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            id: 0,
            fields: Record::new(),
        }
    }

    /// Check if the record has been saved.
    pub fn is_saved(&self) -> bool {
        self.id > 0
    }

    /// Get a field value, including the synthetic `ID` and `ClassName` columns.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "ID" => Some(Value::Int(self.id)),
            "ClassName" => Some(Value::Text(self.class_name.clone())),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Human label for log lines.
    pub fn label(&self) -> String {
        self.fields
            .get_str("Title")
            .or_else(|| self.fields.get_str("Name"))
            .map(|t| format!("{} #{} \"{}\"", self.class_name, self.id, t))
            .unwrap_or_else(|| format!("{} #{}", self.class_name, self.id))
    }
}
