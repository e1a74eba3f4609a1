//! pgsession - A PostgreSQL session adapter over a native client transport
//!
//! Runs already-built SQL text with positional parameters on one connection,
//! streams rows back one at a time and decodes binary wire values into typed
//! host values.
//!
//! # Example
//! ```ignore
//! use pgsession::{Session, SessionConfig, SqlValue};
//!
//! // Connect to database
//! let session = Session::connect(SessionConfig::new("postgres://localhost/mydb")).await?;
//!
//! // Stream a SELECT query
//! let mut rows = session
//!     .execute("SELECT id, name FROM users WHERE name = $1", [SqlValue::from("John")])
//!     .await?
//!     .into_stream()
//!     .expect("SELECT returns rows");
//!
//! while let Some(row) = rows.next().await? {
//!     let id: i32 = row.get("id")?;
//!     let name: String = row.get("name")?;
//! }
//!
//! // Transactions
//! session.begin().await?;
//! session.savepoint("before_insert").await?;
//! session.execute("INSERT INTO users(name) VALUES ($1)", [SqlValue::from("Ann")]).await?;
//! session.commit().await?;
//! ```

pub mod codec;
pub mod config;
pub mod drivers;
pub mod error;
pub mod session;
pub mod traits;
pub mod types;

// Re-export main types for convenient access
pub use config::SessionConfig;
pub use error::{PgSessionError, Result};
pub use session::{ConnectionState, PreparedStatement, Response, RowStream, Session};
pub use traits::Transport;
pub use types::{Column, FromValue, Params, PgResult, QueryResult, Row, SqlValue, Value};
