use std::ffi::{CStr, CString};

use bytes::Bytes;

use crate::error::{PgSessionError, Result};
use crate::types::{Format, SqlValue};

/// One encoded parameter as handed to the transport.
///
/// Borrows from [`ParamBuffers`], so it cannot outlive the buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireParam<'a> {
    Null,
    /// NUL-terminated UTF-8 text.
    Text(&'a CStr),
    Binary(&'a [u8]),
}

impl<'a> WireParam<'a> {
    /// Value bytes without any terminator, `None` for NULL.
    pub fn value(&self) -> Option<&'a [u8]> {
        match *self {
            WireParam::Null => None,
            WireParam::Text(text) => Some(text.to_bytes()),
            WireParam::Binary(bytes) => Some(bytes),
        }
    }

    /// Reported length; text lengths exclude the terminator.
    pub fn length(&self) -> usize {
        self.value().map_or(0, <[u8]>::len)
    }

    pub fn format(&self) -> Format {
        match self {
            WireParam::Binary(_) => Format::Binary,
            WireParam::Null | WireParam::Text(_) => Format::Text,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WireParam::Null)
    }
}

#[derive(Debug)]
enum Encoded {
    Null,
    Text(CString),
    Binary(Bytes),
}

/// Owns the buffers produced by encoding one parameter list.
///
/// Create it right before a send call and drop it right after. Buffers are
/// released on drop, including when encoding stops partway through.
#[derive(Debug)]
pub struct ParamBuffers {
    encoded: Vec<Encoded>,
}

impl ParamBuffers {
    /// Encodes every parameter. The first failure aborts the whole list.
    pub fn encode(params: &[SqlValue]) -> Result<Self> {
        let encoded = params
            .iter()
            .enumerate()
            .map(|(index, value)| encode_one(value).map_err(|message| param_error(index, message)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { encoded })
    }

    /// Borrowed views of the buffers, in parameter order.
    pub fn wire_params(&self) -> Vec<WireParam<'_>> {
        self.encoded
            .iter()
            .map(|e| match e {
                Encoded::Null => WireParam::Null,
                Encoded::Text(text) => WireParam::Text(text.as_c_str()),
                Encoded::Binary(bytes) => WireParam::Binary(bytes),
            })
            .collect()
    }

    /// Format flags matching [`ParamBuffers::wire_params`] (0 = text, 1 = binary).
    pub fn format_flags(&self) -> Vec<i16> {
        self.wire_params().iter().map(|p| p.format().as_flag()).collect()
    }

    pub fn len(&self) -> usize {
        self.encoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }
}

fn encode_one(value: &SqlValue) -> std::result::Result<Encoded, String> {
    if let SqlValue::Binary(bytes) = value {
        return Ok(Encoded::Binary(bytes.clone()));
    }
    match value.to_text() {
        None => Ok(Encoded::Null),
        Some(text) => {
            let text = text?;
            CString::new(text)
                .map(Encoded::Text)
                .map_err(|e| format!("text contains a NUL byte at offset {}", e.nul_position()))
        }
    }
}

fn param_error(index: usize, message: String) -> PgSessionError {
    PgSessionError::DataConversion(format!("parameter ${}: {}", index + 1, message))
}
