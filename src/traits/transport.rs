use async_trait::async_trait;

use crate::codec::WireParam;
use crate::types::PgResult;

/// Boundary to the native client transport.
///
/// Implementations own one established connection and follow the
/// asynchronous command model of the native client: a `send_*` call queues
/// a command, then [`Transport::get_result`] is polled until it returns
/// `None`. A new command may only be sent once every result handle of the
/// previous one has been polled.
///
/// Transports are responsible for:
/// - Sending commands with already-encoded parameters
/// - Handing back result handles with raw value bytes
/// - Keeping server-side prepared statements by name
#[async_trait]
pub trait Transport: Send {
    /// Whether the connection is usable.
    fn is_connected(&self) -> bool;

    /// Last transport-level error text, empty when there is none.
    fn error_message(&self) -> String;

    /// Runs a single command and waits for its final result.
    /// `None` means the transport could not produce a result at all.
    async fn exec(&mut self, sql: &str) -> Option<PgResult>;

    /// Queues a parameterized query. `false` means it was not sent.
    async fn send_query_params(&mut self, sql: &str, params: &[WireParam<'_>]) -> bool;

    /// Queues execution of a named prepared statement.
    async fn send_query_prepared(&mut self, name: &str, params: &[WireParam<'_>]) -> bool;

    /// Creates a named prepared statement and waits for the outcome.
    async fn prepare(&mut self, name: &str, sql: &str) -> Option<PgResult>;

    /// Switches the pending query to one result handle per row.
    /// Only valid right after a send and before the first poll.
    fn set_single_row_mode(&mut self) -> bool;

    /// Polls the next result handle of the current command.
    async fn get_result(&mut self) -> Option<PgResult>;

    /// Closes the connection.
    async fn close(&mut self);
}
