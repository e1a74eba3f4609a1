use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{PgSessionError, Result};

/// Represents a SQL parameter value in a transport-agnostic way.
///
/// Every variant except [`SqlValue::Null`] and [`SqlValue::Binary`] is sent
/// in text format using its canonical string representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    /// Text supplied as raw bytes. Must be valid UTF-8 without interior NULs.
    RawText(Vec<u8>),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    /// Opaque bytes sent in binary format, as-is.
    Binary(Bytes),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

fn float_text(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        value.to_string()
    }
}

impl SqlValue {
    /// Canonical text form of a non-binary value. `None` for NULL and binary values.
    pub(crate) fn to_text(&self) -> Option<std::result::Result<String, String>> {
        let text = match self {
            SqlValue::Null | SqlValue::Binary(_) => return None,
            SqlValue::Text(s) => s.clone(),
            SqlValue::RawText(raw) => {
                return Some(
                    String::from_utf8(raw.clone())
                        .map_err(|e| format!("value is not valid UTF-8: {}", e)),
                )
            }
            SqlValue::Int16(i) => i.to_string(),
            SqlValue::Int32(i) => i.to_string(),
            SqlValue::Int64(i) => i.to_string(),
            SqlValue::Float32(f) => {
                if f.is_finite() {
                    f.to_string()
                } else {
                    float_text(f64::from(*f))
                }
            }
            SqlValue::Float64(f) => float_text(*f),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Uuid(u) => u.hyphenated().to_string(),
            SqlValue::Timestamp(ts) => ts.to_rfc3339(),
        };
        Some(Ok(text))
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i16> for SqlValue {
    fn from(value: i16) -> Self {
        SqlValue::Int16(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int32(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int64(value)
    }
}

impl From<f32> for SqlValue {
    fn from(value: f32) -> Self {
        SqlValue::Float32(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float64(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl From<Bytes> for SqlValue {
    fn from(value: Bytes) -> Self {
        SqlValue::Binary(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Binary(Bytes::from(value))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

/// Parameters handed over by the query layer.
///
/// Only positional parameters (`$1`, `$2`, ...) reach the transport. Named
/// parameters must be translated to positional ones before execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<SqlValue>),
    Named(Vec<(String, SqlValue)>),
}

impl Params {
    /// Returns the positional values, rejecting named parameters.
    pub fn positional(&self) -> Result<&[SqlValue]> {
        match self {
            Params::None => Ok(&[]),
            Params::Positional(values) => Ok(values),
            Params::Named(_) => Err(PgSessionError::Unsupported(
                "named parameters must be translated to positional parameters".to_string(),
            )),
        }
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

impl From<Vec<SqlValue>> for Params {
    fn from(values: Vec<SqlValue>) -> Self {
        Params::Positional(values)
    }
}

impl From<&[SqlValue]> for Params {
    fn from(values: &[SqlValue]) -> Self {
        Params::Positional(values.to_vec())
    }
}

impl<const N: usize> From<[SqlValue; N]> for Params {
    fn from(values: [SqlValue; N]) -> Self {
        Params::Positional(values.into())
    }
}

impl From<Vec<(String, SqlValue)>> for Params {
    fn from(values: Vec<(String, SqlValue)>) -> Self {
        Params::Named(values)
    }
}
