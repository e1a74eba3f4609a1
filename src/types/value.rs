use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{PgSessionError, Result};

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// Text-format columns, string-like binary types and UUIDs.
    Text(String),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    /// Arbitrary-precision decimal rendered exactly.
    Numeric(String),
    /// Dates, times and timestamps relative to the Unix epoch.
    Timestamp(DateTime<Utc>),
    /// Values of types without a decoder, untouched.
    Bytes(Bytes),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Numeric(s) => Some(s),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Text(_) => "text",
            Value::Int16(_) => "int2",
            Value::Int32(_) => "int4",
            Value::Int64(_) => "int8",
            Value::Float32(_) => "float4",
            Value::Float64(_) => "float8",
            Value::Bool(_) => "bool",
            Value::Numeric(_) => "numeric",
            Value::Timestamp(_) => "timestamp",
            Value::Bytes(_) => "bytes",
        }
    }
}

/// Typed extraction from a decoded [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value, target: &str) -> Result<T> {
    Err(PgSessionError::conversion(format!(
        "cannot read {} value as {}",
        value.kind(),
        target
    )))
}

macro_rules! from_int {
    ($ty:ty, $name:literal) => {
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                let out = match value {
                    Value::Int16(v) => <$ty>::try_from(*v).ok(),
                    Value::Int32(v) => <$ty>::try_from(*v).ok(),
                    Value::Int64(v) => <$ty>::try_from(*v).ok(),
                    Value::Text(s) => s.trim().parse().ok(),
                    _ => return mismatch(value, $name),
                };
                out.ok_or_else(|| {
                    PgSessionError::conversion(format!("{:?} is out of range for {}", value, $name))
                })
            }
        }
    };
}

from_int!(i16, "i16");
from_int!(i32, "i32");
from_int!(i64, "i64");

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float32(v) => Ok(f64::from(*v)),
            Value::Float64(v) => Ok(*v),
            Value::Int16(v) => Ok(f64::from(*v)),
            Value::Int32(v) => Ok(f64::from(*v)),
            Value::Text(s) | Value::Numeric(s) => s
                .parse()
                .map_err(|_| PgSessionError::conversion(format!("{:?} is not a float", s))),
            _ => mismatch(value, "f64"),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float32(v) => Ok(*v),
            Value::Text(s) => s
                .parse()
                .map_err(|_| PgSessionError::conversion(format!("{:?} is not a float", s))),
            _ => mismatch(value, "f32"),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Text(s) => match s.as_str() {
                "t" | "true" => Ok(true),
                "f" | "false" => Ok(false),
                _ => mismatch(value, "bool"),
            },
            _ => mismatch(value, "bool"),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Numeric(s) => Ok(s.clone()),
            Value::Int16(v) => Ok(v.to_string()),
            Value::Int32(v) => Ok(v.to_string()),
            Value::Int64(v) => Ok(v.to_string()),
            Value::Float32(v) => Ok(v.to_string()),
            Value::Float64(v) => Ok(v.to_string()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::Timestamp(ts) => Ok(ts.to_rfc3339()),
            _ => mismatch(value, "String"),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(*ts),
            _ => mismatch(value, "timestamp"),
        }
    }
}

impl FromValue for Bytes {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            _ => mismatch(value, "bytes"),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}
