//! Binary `numeric` decoding.
//!
//! The payload is four big-endian 16-bit header fields (digit-group count,
//! weight of the first group as a power of 10000, sign, display scale)
//! followed by the base-10000 digit groups, most significant first.

use crate::codec::cursor::ByteCursor;
use crate::error::{PgSessionError, Result};

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

const NBASE: u16 = 10000;

/// Decodes a binary `numeric` value to its exact decimal string.
pub(crate) fn decode_numeric(raw: &[u8]) -> Result<String> {
    let mut cursor = ByteCursor::new(raw);
    let ndigits = cursor.read_i16()?;
    let weight = cursor.read_i16()?;
    let sign = cursor.read_u16()?;
    let dscale = usize::from(cursor.read_u16()?);

    let negative = match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS => false,
        NUMERIC_NEG => true,
        other => {
            return Err(PgSessionError::conversion(format!(
                "invalid numeric sign 0x{:04x}",
                other
            )))
        }
    };

    if ndigits <= 0 {
        return Ok("0".to_string());
    }

    let mut digits = Vec::with_capacity(ndigits as usize);
    for _ in 0..ndigits {
        let digit = cursor.read_u16()?;
        if digit >= NBASE {
            return Err(PgSessionError::conversion(format!(
                "numeric digit group {} out of range",
                digit
            )));
        }
        digits.push(digit);
    }
    let mut groups = digits.into_iter();

    // Groups left of the decimal point. Trailing zero groups are elided on
    // the wire, so missing ones are filled in up to the weight.
    let mut int_part = String::new();
    for _ in 0..=i32::from(weight) {
        match groups.next() {
            Some(d) if int_part.is_empty() => int_part.push_str(&d.to_string()),
            Some(d) => int_part.push_str(&format!("{:04}", d)),
            None => int_part.push_str("0000"),
        }
    }
    if int_part.is_empty() {
        int_part.push('0');
    }

    let mut frac_part = String::new();
    if dscale > 0 {
        // Leading zero groups between the point and the first stored group.
        for _ in 0..(-i32::from(weight) - 1).max(0) {
            frac_part.push_str("0000");
        }
        for d in groups {
            frac_part.push_str(&format!("{:04}", d));
        }
        if frac_part.len() < dscale {
            frac_part.push_str(&"0".repeat(dscale - frac_part.len()));
        }
        frac_part.truncate(dscale);
        let kept = frac_part.trim_end_matches('0').len();
        frac_part.truncate(kept);
    }

    let mut out = String::with_capacity(int_part.len() + frac_part.len() + 2);
    if negative {
        out.push('-');
    }
    out.push_str(&int_part);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(&frac_part);
    }
    Ok(out)
}
