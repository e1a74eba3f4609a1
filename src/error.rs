use thiserror::Error;

/// Error type for pgsession operations
#[derive(Debug, Error)]
pub enum PgSessionError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Data conversion failed: {0}")]
    DataConversion(String),

    #[error("Database error: {message} (query: {query})")]
    Database { message: String, query: String },

    #[error("No result returned by the transport: {0}")]
    NoResult(String),

    #[error("Invalid transaction state: {0}")]
    TransactionState(String),

    #[error("Session is busy with another operation")]
    Busy,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Expected {expected} row(s), got {actual}")]
    UnexpectedRowCount { expected: usize, actual: usize },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),
}

impl PgSessionError {
    pub(crate) fn conversion(message: impl Into<String>) -> Self {
        PgSessionError::DataConversion(message.into())
    }

    pub(crate) fn database(message: impl AsRef<str>, query: impl Into<String>) -> Self {
        PgSessionError::Database {
            message: message.as_ref().trim_end().to_string(),
            query: query.into(),
        }
    }
}

/// Result type alias for pgsession operations
pub type Result<T> = std::result::Result<T, PgSessionError>;
