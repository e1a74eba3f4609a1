pub mod pg_result;
mod row;
mod sql_value;
mod value;

pub use pg_result::{oid, FieldDescription, Format, Oid, PgResult, ResultStatus};
pub use row::{Column, QueryResult, Row};
pub use sql_value::{Params, SqlValue};
pub use value::{FromValue, Value};
