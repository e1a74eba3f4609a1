use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::codec::cursor::ByteCursor;
use crate::codec::numeric::decode_numeric;
use crate::error::{PgSessionError, Result};
use crate::types::{oid, Column, Format, PgResult, Value};

/// Seconds between the Unix epoch and the server's reference epoch (2000-01-01).
pub(crate) const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;
const SECS_PER_DAY: i64 = 86_400;
const MICROS_PER_SEC: i64 = 1_000_000;

/// Decodes one non-null column value.
///
/// `raw` is `None` when the transport handed back no data for a column
/// that is not flagged NULL.
pub fn decode_value(column: &Column, raw: Option<&[u8]>) -> Result<Value> {
    let raw = raw.ok_or_else(|| {
        PgSessionError::conversion(format!("no data for non-null column {:?}", column.name))
    })?;

    if column.format == Format::Text {
        return std::str::from_utf8(raw)
            .map(|text| Value::Text(text.to_string()))
            .map_err(|e| PgSessionError::conversion(format!("invalid UTF-8 in column value: {}", e)));
    }

    match column.type_oid {
        oid::INT2 => fixed(raw, 2, "int2")?.read_i16().map(Value::Int16),
        oid::INT4 => fixed(raw, 4, "int4")?.read_i32().map(Value::Int32),
        oid::INT8 => fixed(raw, 8, "int8")?.read_i64().map(Value::Int64),
        oid::FLOAT4 => fixed(raw, 4, "float4")?
            .read_u32()
            .map(|bits| Value::Float32(f32::from_bits(bits))),
        oid::FLOAT8 => fixed(raw, 8, "float8")?
            .read_u64()
            .map(|bits| Value::Float64(f64::from_bits(bits))),
        oid::BOOL => fixed(raw, 1, "bool")?.read_u8().map(|b| Value::Bool(b != 0)),
        oid::CHAR | oid::BPCHAR | oid::VARCHAR | oid::TEXT | oid::NAME | oid::JSON | oid::XML => {
            decode_string(raw).map(Value::Text)
        }
        oid::DATE => {
            let days = ByteCursor::new(raw).read_i32()?;
            let secs = i64::from(days)
                .checked_mul(SECS_PER_DAY)
                .and_then(|s| s.checked_add(PG_EPOCH_OFFSET_SECS));
            secs.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
                .map(Value::Timestamp)
                .ok_or_else(|| out_of_range("date", i64::from(days)))
        }
        oid::TIME | oid::TIMETZ | oid::TIMESTAMP | oid::TIMESTAMPTZ => {
            let micros = ByteCursor::new(raw).read_i64()?;
            PG_EPOCH_OFFSET_SECS
                .checked_mul(MICROS_PER_SEC)
                .and_then(|offset| offset.checked_add(micros))
                .and_then(DateTime::<Utc>::from_timestamp_micros)
                .map(Value::Timestamp)
                .ok_or_else(|| out_of_range("timestamp", micros))
        }
        oid::UUID => ByteCursor::new(raw)
            .read_array::<16>()
            .map(|bytes| Value::Text(Uuid::from_bytes(bytes).hyphenated().to_string())),
        oid::NUMERIC => decode_numeric(raw).map(Value::Numeric),
        _ => Ok(Value::Bytes(Bytes::copy_from_slice(raw))),
    }
}

/// Decodes row `row` of a result handle.
pub(crate) fn decode_row(result: &PgResult, columns: &[Column], row: usize) -> Result<Vec<Value>> {
    columns
        .iter()
        .enumerate()
        .map(|(col, column)| {
            if result.is_null(row, col) {
                Ok(Value::Null)
            } else {
                decode_value(column, result.field_value(row, col))
            }
        })
        .collect()
}

/// UTF-8 string up to the first NUL, if any.
fn decode_string(raw: &[u8]) -> Result<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_string)
        .map_err(|e| PgSessionError::conversion(format!("invalid UTF-8 in column value: {}", e)))
}

/// Cursor over a fixed-width value; any other length is an error.
fn fixed<'a>(raw: &'a [u8], width: usize, kind: &str) -> Result<ByteCursor<'a>> {
    if raw.len() != width {
        return Err(PgSessionError::conversion(format!(
            "{} value has {} byte(s), expected {}",
            kind,
            raw.len(),
            width
        )));
    }
    Ok(ByteCursor::new(raw))
}

fn out_of_range(kind: &str, value: i64) -> PgSessionError {
    PgSessionError::conversion(format!("{} value {} is out of range", kind, value))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};

    use super::*;
    use crate::codec::numeric::tests::encode_numeric;
    use crate::codec::ParamBuffers;
    use crate::types::{Oid, SqlValue};

    fn binary(type_oid: Oid) -> Column {
        Column {
            name: "v".to_string(),
            type_oid,
            format: Format::Binary,
        }
    }

    fn decode(type_oid: Oid, raw: &[u8]) -> Result<Value> {
        decode_value(&binary(type_oid), Some(raw))
    }

    #[test]
    fn test_integers_round_trip() {
        for v in [i16::MIN, -1, 0, 1, i16::MAX] {
            assert_eq!(decode(oid::INT2, &v.to_be_bytes()).unwrap(), Value::Int16(v));
        }
        for v in [i32::MIN, -40_000, 0, 7, i32::MAX] {
            assert_eq!(decode(oid::INT4, &v.to_be_bytes()).unwrap(), Value::Int32(v));
        }
        for v in [i64::MIN, -1, 0, 1 << 40, i64::MAX] {
            assert_eq!(decode(oid::INT8, &v.to_be_bytes()).unwrap(), Value::Int64(v));
        }
    }

    #[test]
    fn test_floats_reinterpret_bits() {
        assert_eq!(
            decode(oid::FLOAT4, &1.5f32.to_bits().to_be_bytes()).unwrap(),
            Value::Float32(1.5)
        );
        assert_eq!(
            decode(oid::FLOAT8, &(-0.1f64).to_bits().to_be_bytes()).unwrap(),
            Value::Float64(-0.1)
        );
        match decode(oid::FLOAT8, &f64::NAN.to_bits().to_be_bytes()).unwrap() {
            Value::Float64(f) => assert!(f.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bool_nonzero_is_true() {
        assert_eq!(decode(oid::BOOL, &[0]).unwrap(), Value::Bool(false));
        assert_eq!(decode(oid::BOOL, &[1]).unwrap(), Value::Bool(true));
        assert_eq!(decode(oid::BOOL, &[0x7f]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_string_types_stop_at_nul() {
        assert_eq!(
            decode(oid::VARCHAR, b"hello").unwrap(),
            Value::Text("hello".to_string())
        );
        assert_eq!(
            decode(oid::JSON, b"{\"a\":1}\0junk").unwrap(),
            Value::Text("{\"a\":1}".to_string())
        );
        assert!(decode(oid::TEXT, &[0xc3, 0x28]).is_err());
    }

    #[test]
    fn test_text_format_is_always_a_string() {
        let column = Column {
            name: "n".to_string(),
            type_oid: oid::INT4,
            format: Format::Text,
        };
        assert_eq!(
            decode_value(&column, Some(&b"42"[..])).unwrap(),
            Value::Text("42".to_string())
        );
    }

    #[test]
    fn test_text_format_keeps_embedded_nul() {
        let column = Column {
            name: "s".to_string(),
            type_oid: oid::TEXT,
            format: Format::Text,
        };
        assert_eq!(
            decode_value(&column, Some(&b"ab\0cd"[..])).unwrap(),
            Value::Text("ab\0cd".to_string())
        );
        assert!(decode_value(&column, Some(&[0xc3, 0x28][..])).is_err());
    }

    #[test]
    fn test_integers_survive_binary_parameter_path() {
        fn through_buffers(type_oid: Oid, bytes: Vec<u8>) -> Value {
            let buffers = ParamBuffers::encode(&[SqlValue::Binary(bytes.into())]).unwrap();
            let wire = buffers.wire_params();
            assert_eq!(wire[0].format(), Format::Binary);
            decode_value(&binary(type_oid), wire[0].value()).unwrap()
        }

        for v in [i16::MIN, -1, 0, 1, i16::MAX] {
            assert_eq!(through_buffers(oid::INT2, v.to_be_bytes().to_vec()), Value::Int16(v));
        }
        for v in [i32::MIN, -1, 0, 1, i32::MAX] {
            assert_eq!(through_buffers(oid::INT4, v.to_be_bytes().to_vec()), Value::Int32(v));
        }
        for v in [i64::MIN, -1, 0, 1, i64::MAX] {
            assert_eq!(through_buffers(oid::INT8, v.to_be_bytes().to_vec()), Value::Int64(v));
        }
    }

    #[test]
    fn test_fixed_width_length_must_match() {
        assert!(decode(oid::INT4, &[0, 0, 0, 0, 0, 0, 0, 1]).is_err());
        assert!(decode(oid::INT2, &[0, 1, 2]).is_err());
        assert!(decode(oid::FLOAT4, &1.0f64.to_bits().to_be_bytes()).is_err());
        assert!(decode(oid::BOOL, &[1, 0]).is_err());
        // timetz carries a zone offset after the time.
        assert!(decode(oid::TIMETZ, &[0; 12]).is_ok());
    }

    #[test]
    fn test_reference_epoch() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(decode(oid::DATE, &0i32.to_be_bytes()).unwrap(), Value::Timestamp(epoch));
        assert_eq!(
            decode(oid::TIMESTAMP, &0i64.to_be_bytes()).unwrap(),
            Value::Timestamp(epoch)
        );
        assert_eq!(
            decode(oid::TIMESTAMPTZ, &0i64.to_be_bytes()).unwrap(),
            Value::Timestamp(epoch)
        );
    }

    #[test]
    fn test_dates_and_timestamps() {
        let before = decode(oid::DATE, &(-1i32).to_be_bytes()).unwrap();
        let expected = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(before, Value::Timestamp(expected));

        let micros: i64 = 86_400 * 1_000_000 + 1_500_000;
        let expected = Utc.with_ymd_and_hms(2000, 1, 2, 0, 0, 1).unwrap()
            + chrono::Duration::microseconds(500_000);
        assert_eq!(
            decode(oid::TIMESTAMP, &micros.to_be_bytes()).unwrap(),
            Value::Timestamp(expected)
        );

        assert!(decode(oid::TIMESTAMP, &i64::MAX.to_be_bytes()).is_err());
    }

    #[test]
    fn test_uuid_canonical_form() {
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(
            decode(oid::UUID, id.as_bytes()).unwrap(),
            Value::Text("67e55044-10b1-426f-9247-bb680e5fe0c8".to_string())
        );
        assert!(decode(oid::UUID, &[0; 15]).is_err());
    }

    #[test]
    fn test_numeric_dispatch() {
        assert_eq!(
            decode(oid::NUMERIC, &encode_numeric("-0.03")).unwrap(),
            Value::Numeric("-0.03".to_string())
        );
    }

    #[test]
    fn test_unknown_type_returns_raw_bytes() {
        assert_eq!(
            decode(oid::BYTEA, &[1, 2, 3]).unwrap(),
            Value::Bytes(Bytes::from_static(&[1, 2, 3]))
        );
        assert_eq!(
            decode(99_999, &[9]).unwrap(),
            Value::Bytes(Bytes::from_static(&[9]))
        );
    }

    #[test]
    fn test_conversion_failures() {
        assert!(matches!(
            decode(oid::INT8, &[0, 0, 0, 1]),
            Err(PgSessionError::DataConversion(_))
        ));
        assert!(matches!(
            decode_value(&binary(oid::INT4), None),
            Err(PgSessionError::DataConversion(_))
        ));
        assert!(decode(oid::BOOL, &[]).is_err());
    }
}
