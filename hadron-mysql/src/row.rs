//! Row decoding for MySQL.

use mysql_async::{Row, Value};
use serde_json::{Map, Value as JsonValue};

/// Trait for converting a MySQL row to a Rust type.
pub trait FromMysqlRow: Sized {
    /// Convert a MySQL row to this type.
    fn from_row(row: &Row) -> Result<Self, FromMysqlRowError>;
}

/// Error type for row deserialization.
#[derive(Debug)]
pub struct FromMysqlRowError {
    /// The error message.
    pub message: String,
    /// The column that caused the error, if known.
    pub column: Option<String>,
}

impl FromMysqlRowError {
    /// Create a new error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            column: None,
        }
    }

    /// Create a new error with a column name.
    pub fn with_column(message: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            column: Some(column.into()),
        }
    }
}

impl std::fmt::Display for FromMysqlRowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref column) = self.column {
            write!(f, "column '{}': {}", column, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for FromMysqlRowError {}

/// Decodes a row into a JSON object keyed by column name.
impl FromMysqlRow for JsonValue {
    fn from_row(row: &Row) -> Result<Self, FromMysqlRowError> {
        let mut map = Map::new();

        for (i, column) in row.columns_ref().iter().enumerate() {
            let name = column.name_str().to_string();
            let value = row
                .as_ref(i)
                .cloned()
                .ok_or_else(|| FromMysqlRowError::with_column("value already taken", &name))?;
            map.insert(name, value_to_json(value));
        }

        Ok(JsonValue::Object(map))
    }
}

/// Convert a MySQL value to JSON.
///
/// Text-protocol results arrive as bytes; those become strings, so callers
/// comparing numbers should go through `mysql_async::from_value_opt`.
pub fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::NULL => JsonValue::Null,
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => JsonValue::String(s),
            Err(e) => JsonValue::String(format!("<binary {} bytes>", e.into_bytes().len())),
        },
        Value::Int(i) => JsonValue::Number(i.into()),
        Value::UInt(u) => JsonValue::Number(u.into()),
        Value::Float(f) => serde_json::Number::from_f64(f64::from(f))
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Double(d) => serde_json::Number::from_f64(d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Date(year, month, day, hour, minute, second, micro) => JsonValue::String(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            year, month, day, hour, minute, second, micro
        )),
        Value::Time(is_neg, days, hours, minutes, seconds, micro) => {
            let sign = if is_neg { "-" } else { "" };
            JsonValue::String(format!(
                "{}{}:{:02}:{:02}.{:06}",
                sign,
                days * 24 + u32::from(hours),
                minutes,
                seconds,
                micro
            ))
        }
    }
}
