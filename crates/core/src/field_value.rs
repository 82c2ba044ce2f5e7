use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A single column value of a cached or remote row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

/// A row keyed by column name. Column order is stable so encoded rows compare byte-for-byte.
pub type Row = BTreeMap<String, FieldValue>;

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            FieldValue::Timestamp(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Milliseconds since the epoch for any value the backend uses as a point in
    /// time: native timestamps, integer millis and RFC 3339 text.
    pub fn as_epoch_ms(&self) -> Option<i64> {
        match self {
            FieldValue::Timestamp(ms) | FieldValue::Integer(ms) => Some(*ms),
            FieldValue::Text(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis()),
            _ => None,
        }
    }

    /// Flags arrive as booleans, 0/1 or text depending on the path they took.
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Boolean(b) => *b,
            FieldValue::Integer(n) => *n != 0,
            FieldValue::Text(s) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "t" | "1")
            }
            _ => false,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// Build a row from `(column, value)` pairs.
pub fn row<K, V, I>(pairs: I) -> Row
where
    K: Into<String>,
    V: Into<FieldValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

pub fn encode_row(row: &Row) -> Result<Vec<u8>, CoreError> {
    rmp_serde::to_vec(row).map_err(|e| CoreError::Serialization(e.to_string()))
}

pub fn decode_row(bytes: &[u8]) -> Result<Row, CoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Text value of `field`, if present and textual.
pub fn text_field<'a>(row: &'a Row, field: &str) -> Option<&'a str> {
    row.get(field).and_then(FieldValue::as_text)
}
