//! Conversion between engine values and `mysql_async` values.

use chrono::NaiveDate;
use mysql_async::Row;

use crate::core::{Record, Value};

/// Convert an engine value to a MySQL parameter.
pub(crate) fn to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int(i) => mysql_async::Value::from(*i),
        Value::Float(f) => mysql_async::Value::from(*f),
        Value::Text(s) => mysql_async::Value::from(s.as_str()),
        Value::Bytes(b) => mysql_async::Value::from(b.as_slice()),
        Value::DateTime(dt) => mysql_async::Value::from(*dt),
    }
}

/// Convert a MySQL value to an engine value.
///
/// Text protocol results arrive as bytes; they become text when they are
/// valid UTF-8 so that numeric and date accessors can parse them.
pub(crate) fn from_mysql(value: mysql_async::Value) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Int(i) => Value::Int(i),
        mysql_async::Value::UInt(u) => Value::Int(u as i64),
        mysql_async::Value::Float(f) => Value::Float(f64::from(f)),
        mysql_async::Value::Double(d) => Value::Float(d),
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::Text(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Date(year, month, day, hour, minute, second, micros) => {
            // Zero dates ("0000-00-00") have no chrono representation
            NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
                .and_then(|d| {
                    d.and_hms_micro_opt(
                        u32::from(hour),
                        u32::from(minute),
                        u32::from(second),
                        micros,
                    )
                })
                .map(Value::DateTime)
                .unwrap_or(Value::Null)
        }
        mysql_async::Value::Time(negative, days, hours, minutes, seconds, _) => {
            let hours = days * 24 + u32::from(hours);
            Value::Text(format!(
                "{}{:02}:{:02}:{:02}",
                if negative { "-" } else { "" },
                hours,
                minutes,
                seconds
            ))
        }
    }
}

/// Convert a result row into a record.
///
/// Joined tables repeat columns such as `ID`; the first non-null value wins.
pub(crate) fn row_to_record(row: Row) -> Record {
    let mut record = Record::new();
    for (index, column) in row.columns_ref().iter().enumerate() {
        let value = row
            .as_ref(index)
            .cloned()
            .map(from_mysql)
            .unwrap_or(Value::Null);
        record.merge(column.name_str().into_owned(), value);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_protocol_values() {
        assert_eq!(
            from_mysql(mysql_async::Value::Bytes(b"42".to_vec())).as_i64(),
            Some(42)
        );
        let date = from_mysql(mysql_async::Value::Bytes(b"2015-06-01 12:00:00".to_vec()));
        assert!(date.as_datetime().is_some());
    }

    #[test]
    fn test_binary_protocol_values() {
        assert_eq!(from_mysql(mysql_async::Value::UInt(7)), Value::Int(7));
        let dt = from_mysql(mysql_async::Value::Date(2015, 6, 1, 12, 0, 0, 0));
        assert_eq!(
            dt.as_datetime()
                .map(|d| d.format(crate::core::DATETIME_FORMAT).to_string()),
            Some("2015-06-01 12:00:00".to_string())
        );
        assert_eq!(
            from_mysql(mysql_async::Value::Date(0, 0, 0, 0, 0, 0, 0)),
            Value::Null
        );
    }

    #[test]
    fn test_round_trip_null() {
        assert_eq!(from_mysql(to_mysql(&Value::Null)), Value::Null);
    }
}
