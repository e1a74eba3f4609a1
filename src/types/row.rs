use std::sync::Arc;

use crate::error::{PgSessionError, Result};
use crate::types::pg_result::{FieldDescription, Format, Oid};
use crate::types::value::{FromValue, Value};

/// Column descriptor of a result set.
/// Lives as long as the rows of that result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_oid: Oid,
    pub format: Format,
}

impl From<&FieldDescription> for Column {
    fn from(field: &FieldDescription) -> Self {
        Self {
            name: field.name.clone(),
            type_oid: field.type_oid,
            format: field.format,
        }
    }
}

/// A single row result from a query.
/// Values are kept in column order and accessed by name or position.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new Row from column descriptors and values.
    pub(crate) fn new(columns: Arc<[Column]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Gets a typed value by column name.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(self.value(name)?)
    }

    /// Gets a typed value by column position.
    pub fn get_idx<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| PgSessionError::ColumnNotFound(format!("#{}", index)))?;
        T::from_value(value)
    }

    /// Gets the raw decoded value by column name.
    pub fn value(&self, name: &str) -> Result<&Value> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| PgSessionError::ColumnNotFound(name.to_string()))
    }

    /// Returns all decoded values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns all column names in this row.
    pub fn columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Returns the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Fully collected result of a query, containing zero or more rows.
#[derive(Debug)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Row>,
    rows_affected: u64,
}

impl QueryResult {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Row>, rows_affected: u64) -> Self {
        Self {
            columns,
            rows,
            rows_affected,
        }
    }

    /// Extracts a single row from the result.
    /// Returns an error if the result contains zero or more than one row.
    pub fn single_row(self) -> Result<Row> {
        let actual = self.rows.len();
        match <[Row; 1]>::try_from(self.rows) {
            Ok([row]) => Ok(row),
            Err(_) => Err(PgSessionError::UnexpectedRowCount {
                expected: 1,
                actual,
            }),
        }
    }

    /// Returns all rows from the result.
    pub fn rows(self) -> Vec<Row> {
        self.rows
    }

    /// Returns a reference to the rows without consuming the result.
    pub fn rows_ref(&self) -> &[Row] {
        &self.rows
    }

    /// Returns the column names from this result.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows returned, or rows touched for commands without a result set.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Returns the number of rows in this result.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if this result contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
