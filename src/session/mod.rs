//! The [`Session`] type and the operations it runs over one connection.

mod state;
mod statements;
mod stream;
mod transaction;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::codec::{decode_row, ParamBuffers};
use crate::config::SessionConfig;
use crate::drivers::TokioPostgresTransport;
use crate::error::{PgSessionError, Result};
use crate::traits::Transport;
use crate::types::{Column, Params, PgResult, QueryResult, ResultStatus, Row, SqlValue};

pub use state::ConnectionState;
pub use statements::PreparedStatement;
pub use stream::RowStream;

use state::{OperationGuard, StateMachine, TransactionGate};
use statements::StatementRegistry;

/// Outcome of a successful execution.
#[derive(Debug)]
pub enum Response {
    /// The command produced no result set.
    Complete { rows_affected: u64 },
    /// The command produced a result set; rows are pulled from the stream.
    Rows(RowStream),
}

impl Response {
    /// Returns the row stream, if the command produced a result set.
    pub fn into_stream(self) -> Option<RowStream> {
        match self {
            Response::Rows(stream) => Some(stream),
            Response::Complete { .. } => None,
        }
    }

    /// Collects the response into a [`QueryResult`].
    pub async fn collect(self) -> Result<QueryResult> {
        match self {
            Response::Complete { rows_affected } => {
                Ok(QueryResult::new(Vec::new(), Vec::new(), rows_affected))
            }
            Response::Rows(stream) => stream.collect().await,
        }
    }
}

pub(crate) struct SessionInner {
    states: StateMachine,
    transport: Mutex<Box<dyn Transport>>,
    statements: StatementRegistry,
    config: SessionConfig,
}

type TransportGuard<'a> = MutexGuard<'a, Box<dyn Transport>>;

impl SessionInner {
    /// Enters `QueryRunning` and takes the transport, draining leftovers of
    /// an abandoned command or terminated stream first.
    async fn begin(&self, gate: TransactionGate) -> Result<(OperationGuard<'_>, TransportGuard<'_>)> {
        let drain = self.states.begin(gate)?;
        let guard = OperationGuard::new(&self.states);
        let mut transport = self.transport.lock().await;
        if drain {
            let discarded = drain_results(&mut **transport).await;
            if discarded > 0 {
                warn!(target: "pgsession::session", "discarded {} pending result(s)", discarded);
            }
        }
        if !transport.is_connected() {
            return Err(PgSessionError::Connection(transport.error_message()));
        }
        Ok((guard, transport))
    }
}

/// Polls and discards result handles until the transport has none left.
pub(crate) async fn drain_results(transport: &mut dyn Transport) -> usize {
    let mut discarded = 0;
    while transport.get_result().await.is_some() {
        discarded += 1;
    }
    discarded
}

enum Command<'a> {
    Query(&'a str),
    Prepared(&'a PreparedStatement),
}

impl Command<'_> {
    fn sql(&self) -> &str {
        match self {
            Command::Query(sql) => sql,
            Command::Prepared(statement) => statement.sql(),
        }
    }
}

/// One logical session over a single physical connection.
///
/// Operations are serialized: while one runs, another fails with
/// [`PgSessionError::Busy`]. Starting an operation while a [`RowStream`]
/// is active terminates that stream and discards its remaining rows.
/// Clones share the same connection.
///
/// # Example
/// ```ignore
/// use pgsession::{Session, SessionConfig, SqlValue};
///
/// let session = Session::connect(SessionConfig::new("postgres://localhost/mydb")).await?;
/// let row = session
///     .query("SELECT id, name FROM users WHERE name = $1", [SqlValue::from("John")])
///     .await?
///     .single_row()?;
///
/// let id: i32 = row.get("id")?;
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Connect to a PostgreSQL database using tokio-postgres.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let transport = TokioPostgresTransport::connect(&config).await?;
        Ok(Self::with_transport(Box::new(transport), config))
    }

    /// Create a session over a custom transport.
    /// Useful for testing or using alternative client libraries.
    pub fn with_transport(transport: Box<dyn Transport>, config: SessionConfig) -> Self {
        let connected = transport.is_connected();
        Self {
            inner: Arc::new(SessionInner {
                states: StateMachine::new(connected),
                transport: Mutex::new(transport),
                statements: StatementRegistry::default(),
                config,
            }),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.states.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.states.is_connected()
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.states.in_transaction()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Execute a query with positional parameters (`$1`, `$2`, ...).
    pub async fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<Response> {
        let params = params.into();
        let values = params.positional()?;
        let (guard, mut transport) = self.inner.begin(TransactionGate::Any).await?;
        self.run(guard, &mut transport, Command::Query(sql), values)
            .await
    }

    /// Execute a query and collect every row.
    pub async fn query(&self, sql: &str, params: impl Into<Params>) -> Result<QueryResult> {
        self.execute(sql, params).await?.collect().await
    }

    /// Create a server-side prepared statement.
    pub async fn prepare(&self, sql: &str) -> Result<PreparedStatement> {
        let statement = self
            .inner
            .statements
            .allocate(self.inner.config.prefix(), sql);
        let (guard, mut transport) = self.inner.begin(TransactionGate::Any).await?;
        let outcome = self.prepare_on(&mut **transport, &statement).await;
        drain_results(&mut **transport).await;
        guard.complete();
        outcome.map(|()| statement)
    }

    /// Execute a prepared statement, preparing it first if this connection
    /// does not know it.
    pub async fn execute_prepared(
        &self,
        statement: &PreparedStatement,
        params: impl Into<Params>,
    ) -> Result<Response> {
        let params = params.into();
        let values = params.positional()?;
        let (guard, mut transport) = self.inner.begin(TransactionGate::Any).await?;
        if !self.inner.statements.contains(statement.name()) {
            debug!(target: "pgsession::session", "re-preparing {}", statement.name());
            if let Err(e) = self.prepare_on(&mut **transport, statement).await {
                drain_results(&mut **transport).await;
                guard.complete();
                return Err(e);
            }
        }
        self.run(guard, &mut transport, Command::Prepared(statement), values)
            .await
    }

    /// Execute a prepared statement and collect every row.
    pub async fn query_prepared(
        &self,
        statement: &PreparedStatement,
        params: impl Into<Params>,
    ) -> Result<QueryResult> {
        self.execute_prepared(statement, params)
            .await?
            .collect()
            .await
    }

    /// Release a prepared statement. Nothing is sent to the server.
    pub async fn release(&self, statement: &PreparedStatement) -> Result<()> {
        debug!(target: "pgsession::session", "released {}", statement.name());
        Ok(())
    }

    /// Drain any in-flight result and close the connection.
    pub async fn close(&self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.inner.states.begin_exclusive()?;
        let guard = OperationGuard::new(&self.inner.states);
        let mut transport = self.inner.transport.lock().await;
        drain_results(&mut **transport).await;
        transport.close().await;
        self.inner.statements.clear();
        self.inner.states.set_connected(false);
        guard.complete();
        info!(target: "pgsession::session", "session closed");
        Ok(())
    }

    /// Swap in a new physical connection.
    ///
    /// The old one is drained and closed. Prepared statements are forgotten
    /// and prepared again the next time they are executed.
    pub async fn replace_transport(&self, replacement: Box<dyn Transport>) -> Result<()> {
        self.inner.states.begin_exclusive()?;
        let guard = OperationGuard::new(&self.inner.states);
        let mut transport = self.inner.transport.lock().await;
        drain_results(&mut **transport).await;
        transport.close().await;
        let connected = replacement.is_connected();
        *transport = replacement;
        self.inner.statements.clear();
        self.inner.states.set_connected(connected);
        guard.complete();
        info!(target: "pgsession::session", "transport replaced (connected: {})", connected);
        Ok(())
    }

    async fn prepare_on(
        &self,
        transport: &mut dyn Transport,
        statement: &PreparedStatement,
    ) -> Result<()> {
        let result = transport
            .prepare(statement.name(), statement.sql())
            .await
            .ok_or_else(|| PgSessionError::NoResult(transport.error_message()))?;
        match result.status() {
            ResultStatus::CommandOk => {
                self.inner.statements.insert(statement.name());
                debug!(target: "pgsession::session", "prepared {}", statement.name());
                Ok(())
            }
            _ => Err(PgSessionError::database(result.error_message(), statement.sql())),
        }
    }

    /// Sends one command and turns its first result handle into a response.
    async fn run(
        &self,
        guard: OperationGuard<'_>,
        transport: &mut TransportGuard<'_>,
        command: Command<'_>,
        values: &[SqlValue],
    ) -> Result<Response> {
        let first = match self.send(&mut ***transport, &command, values).await {
            Ok(first) => first,
            Err(e) => {
                drain_results(&mut ***transport).await;
                guard.complete();
                return Err(e);
            }
        };

        match first.status() {
            ResultStatus::SingleTuple => {
                let columns = columns_of(&first);
                match decode_row(&first, &columns, 0) {
                    Ok(values) => {
                        let row = Row::new(Arc::clone(&columns), values);
                        let id = guard.into_stream();
                        Ok(Response::Rows(RowStream::streaming(
                            Arc::clone(&self.inner),
                            id,
                            command.sql(),
                            columns,
                            row,
                        )))
                    }
                    Err(e) => {
                        drain_results(&mut ***transport).await;
                        guard.complete();
                        Err(e)
                    }
                }
            }
            ResultStatus::TuplesOk => {
                let columns = columns_of(&first);
                let rows = (0..first.row_count())
                    .map(|i| decode_row(&first, &columns, i).map(|v| Row::new(Arc::clone(&columns), v)))
                    .collect::<Result<VecDeque<_>>>();
                drain_results(&mut ***transport).await;
                guard.complete();
                Ok(Response::Rows(RowStream::buffered(columns, rows?)))
            }
            ResultStatus::CommandOk | ResultStatus::EmptyQuery => {
                let rows_affected = first.rows_affected().unwrap_or(0);
                drain_results(&mut ***transport).await;
                guard.complete();
                Ok(Response::Complete { rows_affected })
            }
            status => {
                let message = match first.error_message() {
                    "" => format!("unexpected result status {:?}", status),
                    message => message.to_string(),
                };
                drain_results(&mut ***transport).await;
                guard.complete();
                Err(PgSessionError::database(message, command.sql()))
            }
        }
    }

    /// Encodes parameters, sends the command and polls its first result.
    /// Parameter buffers live exactly as long as the send call.
    async fn send(
        &self,
        transport: &mut dyn Transport,
        command: &Command<'_>,
        values: &[SqlValue],
    ) -> Result<PgResult> {
        let buffers = ParamBuffers::encode(values)?;
        let wire = buffers.wire_params();
        let sent = match command {
            Command::Query(sql) => {
                debug!(target: "pgsession::session", "send query {:?} ({} params)", sql, wire.len());
                transport.send_query_params(sql, &wire).await
            }
            Command::Prepared(statement) => {
                debug!(target: "pgsession::session", "send prepared {} ({} params)", statement.name(), wire.len());
                transport.send_query_prepared(statement.name(), &wire).await
            }
        };
        drop(wire);
        drop(buffers);

        if !sent {
            return Err(PgSessionError::Connection(transport.error_message()));
        }
        if self.inner.config.is_single_row_mode() && !transport.set_single_row_mode() {
            debug!(target: "pgsession::session", "single-row mode not available for this command");
        }
        transport
            .get_result()
            .await
            .ok_or_else(|| PgSessionError::NoResult(transport.error_message()))
    }
}

fn columns_of(result: &PgResult) -> Arc<[Column]> {
    result.fields().iter().map(Column::from).collect()
}
