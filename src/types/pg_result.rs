use bytes::Bytes;

/// PostgreSQL type identifier.
pub type Oid = u32;

/// Well-known type identifiers used to select a decode routine.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const JSON: Oid = 114;
    pub const XML: Oid = 142;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const TIMETZ: Oid = 1266;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
}

/// Wire format of a parameter or column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Binary,
}

impl Format {
    /// The integer flag used by the native client (0 = text, 1 = binary).
    pub fn as_flag(self) -> i16 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }
}

/// Status of a single result handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    EmptyQuery,
    CommandOk,
    TuplesOk,
    SingleTuple,
    BadResponse,
    NonfatalError,
    FatalError,
}

impl ResultStatus {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResultStatus::BadResponse | ResultStatus::NonfatalError | ResultStatus::FatalError
        )
    }
}

/// Name, type and format of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub type_oid: Oid,
    pub format: Format,
}

impl FieldDescription {
    pub fn new(name: impl Into<String>, type_oid: Oid, format: Format) -> Self {
        Self {
            name: name.into(),
            type_oid,
            format,
        }
    }
}

/// One result handle polled from the transport.
///
/// Dropping the handle clears it.
#[derive(Debug, Clone)]
pub struct PgResult {
    status: ResultStatus,
    error_message: Option<String>,
    fields: Vec<FieldDescription>,
    rows: Vec<Vec<Option<Bytes>>>,
    rows_affected: Option<u64>,
}

impl PgResult {
    pub fn new(status: ResultStatus) -> Self {
        Self {
            status,
            error_message: None,
            fields: Vec::new(),
            rows: Vec::new(),
            rows_affected: None,
        }
    }

    pub fn command_ok(rows_affected: Option<u64>) -> Self {
        Self {
            rows_affected,
            ..Self::new(ResultStatus::CommandOk)
        }
    }

    pub fn tuples_ok(fields: Vec<FieldDescription>, rows: Vec<Vec<Option<Bytes>>>) -> Self {
        Self {
            rows_affected: Some(rows.len() as u64),
            fields,
            rows,
            ..Self::new(ResultStatus::TuplesOk)
        }
    }

    pub fn single_tuple(fields: Vec<FieldDescription>, row: Vec<Option<Bytes>>) -> Self {
        Self {
            fields,
            rows: vec![row],
            ..Self::new(ResultStatus::SingleTuple)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(ResultStatus::FatalError)
        }
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    /// Server error text, empty when the result is not an error.
    pub fn error_message(&self) -> &str {
        self.error_message.as_deref().unwrap_or("")
    }

    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_name(&self, col: usize) -> Option<&str> {
        self.fields.get(col).map(|f| f.name.as_str())
    }

    pub fn field_type(&self, col: usize) -> Option<Oid> {
        self.fields.get(col).map(|f| f.type_oid)
    }

    pub fn field_format(&self, col: usize) -> Option<Format> {
        self.fields.get(col).map(|f| f.format)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_null(&self, row: usize, col: usize) -> bool {
        matches!(self.rows.get(row).and_then(|r| r.get(col)), Some(None))
    }

    /// Raw value bytes; `None` for NULL values and out-of-range positions.
    pub fn field_value(&self, row: usize, col: usize) -> Option<&[u8]> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|v| v.as_deref())
    }

    pub fn field_length(&self, row: usize, col: usize) -> usize {
        self.field_value(row, col).map_or(0, <[u8]>::len)
    }

    /// Number of rows touched by the command, when the server reports it.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}
