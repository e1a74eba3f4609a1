use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, RowStream, Statement};
use tracing::{debug, info, warn};

use crate::codec::WireParam;
use crate::config::SessionConfig;
use crate::error::{PgSessionError, Result};
use crate::traits::Transport;
use crate::types::{FieldDescription, Format, PgResult};

const IN_PROGRESS: &str = "another command is already in progress";

/// PostgreSQL transport implementation using tokio-postgres.
///
/// Results are always delivered in binary format.
pub struct TokioPostgresTransport {
    client: Option<Arc<Client>>,
    statements: HashMap<String, Statement>,
    pending: VecDeque<PgResult>,
    active: Option<ActiveQuery>,
    single_row: bool,
    last_error: String,
}

struct ActiveQuery {
    fields: Vec<FieldDescription>,
    rows: Pin<Box<RowStream>>,
    polled: bool,
}

impl TokioPostgresTransport {
    /// Connect to a PostgreSQL database.
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .connection_string()
            .parse()
            .map_err(|e: tokio_postgres::Error| PgSessionError::Connection(e.to_string()))?;
        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| PgSessionError::Connection(e.to_string()))?;

        // Drive the connection in the background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(target: "pgsession::transport", "PostgreSQL connection error: {}", e);
            }
        });
        info!(target: "pgsession::transport", "connected to {:?}", pg_config.get_dbname());

        Ok(Self {
            client: Some(Arc::new(client)),
            statements: HashMap::new(),
            pending: VecDeque::new(),
            active: None,
            single_row: false,
            last_error: String::new(),
        })
    }

    fn in_flight(&self) -> bool {
        self.active.is_some() || !self.pending.is_empty()
    }

    /// Checks that a new command may be issued and returns the client.
    fn ready_client(&mut self) -> Option<Arc<Client>> {
        if self.in_flight() {
            self.last_error = IN_PROGRESS.to_string();
            return None;
        }
        match &self.client {
            Some(client) if !client.is_closed() => {
                self.last_error.clear();
                Some(Arc::clone(client))
            }
            _ => {
                self.last_error = "no connection to the server".to_string();
                None
            }
        }
    }

    async fn start(&mut self, client: &Client, statement: &Statement, params: &[WireParam<'_>]) {
        let fields = statement
            .columns()
            .iter()
            .map(|c| FieldDescription::new(c.name(), c.type_().oid(), Format::Binary))
            .collect();
        let params = params.iter().map(|p| p as &(dyn ToSql + Sync));
        match client.query_raw(statement, params).await {
            Ok(rows) => {
                self.active = Some(ActiveQuery {
                    fields,
                    rows: Box::pin(rows),
                    polled: false,
                })
            }
            Err(e) => self.pending.push_back(error_result(&e)),
        }
    }

    fn finish(&mut self) -> Option<PgResult> {
        let query = self.active.take()?;
        let affected = query.rows.rows_affected();
        if query.fields.is_empty() {
            Some(PgResult::command_ok(affected))
        } else {
            Some(PgResult::tuples_ok(query.fields, Vec::new()))
        }
    }
}

#[async_trait]
impl Transport for TokioPostgresTransport {
    fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_closed())
    }

    fn error_message(&self) -> String {
        self.last_error.clone()
    }

    async fn exec(&mut self, sql: &str) -> Option<PgResult> {
        let client = self.ready_client()?;
        match client.batch_execute(sql).await {
            Ok(()) => Some(PgResult::command_ok(None)),
            Err(e) => Some(error_result(&e)),
        }
    }

    async fn send_query_params(&mut self, sql: &str, params: &[WireParam<'_>]) -> bool {
        let Some(client) = self.ready_client() else {
            return false;
        };
        self.single_row = false;
        match client.prepare(sql).await {
            Ok(statement) => self.start(&client, &statement, params).await,
            Err(e) => self.pending.push_back(error_result(&e)),
        }
        true
    }

    async fn send_query_prepared(&mut self, name: &str, params: &[WireParam<'_>]) -> bool {
        let Some(client) = self.ready_client() else {
            return false;
        };
        self.single_row = false;
        match self.statements.get(name).cloned() {
            Some(statement) => self.start(&client, &statement, params).await,
            None => self.pending.push_back(PgResult::error(format!(
                "ERROR:  prepared statement \"{}\" does not exist",
                name
            ))),
        }
        true
    }

    async fn prepare(&mut self, name: &str, sql: &str) -> Option<PgResult> {
        let client = self.ready_client()?;
        match client.prepare(sql).await {
            Ok(statement) => {
                debug!(target: "pgsession::transport", "prepared {} ({} params)", name, statement.params().len());
                self.statements.insert(name.to_string(), statement);
                Some(PgResult::command_ok(None))
            }
            Err(e) => Some(error_result(&e)),
        }
    }

    fn set_single_row_mode(&mut self) -> bool {
        match &self.active {
            Some(query) if !query.polled => {
                self.single_row = true;
                true
            }
            _ => false,
        }
    }

    async fn get_result(&mut self) -> Option<PgResult> {
        if let Some(result) = self.pending.pop_front() {
            return Some(result);
        }
        let single_row = self.single_row;
        let query = self.active.as_mut()?;
        query.polled = true;

        if single_row {
            let fields = query.fields.clone();
            return match query.rows.next().await {
                Some(Ok(row)) => Some(match raw_row(&row) {
                    Ok(values) => PgResult::single_tuple(fields, values),
                    Err(e) => {
                        self.active = None;
                        error_result(&e)
                    }
                }),
                Some(Err(e)) => {
                    self.active = None;
                    Some(error_result(&e))
                }
                None => self.finish(),
            };
        }

        let mut rows = Vec::new();
        while let Some(next) = query.rows.next().await {
            match next.and_then(|row| raw_row(&row)) {
                Ok(values) => rows.push(values),
                Err(e) => {
                    self.active = None;
                    return Some(error_result(&e));
                }
            }
        }
        let query = self.active.take()?;
        if query.fields.is_empty() {
            Some(PgResult::command_ok(query.rows.rows_affected()))
        } else {
            Some(PgResult::tuples_ok(query.fields, rows))
        }
    }

    async fn close(&mut self) {
        self.pending.clear();
        self.active = None;
        self.statements.clear();
        if self.client.take().is_some() {
            info!(target: "pgsession::transport", "connection closed");
        }
    }
}

fn error_result(e: &tokio_postgres::Error) -> PgResult {
    let message = match e.as_db_error() {
        Some(db) => format!("{}:  {}", db.severity(), db.message()),
        None => e.to_string(),
    };
    PgResult::error(message)
}

fn raw_row(row: &tokio_postgres::Row) -> std::result::Result<Vec<Option<Bytes>>, tokio_postgres::Error> {
    (0..row.len())
        .map(|i| {
            row.try_get::<_, RawValue<'_>>(i)
                .map(|raw| raw.0.map(Bytes::copy_from_slice))
        })
        .collect()
}

/// Borrows the undecoded bytes of any column.
struct RawValue<'a>(Option<&'a [u8]>);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawValue(Some(raw)))
    }

    fn from_sql_null(_ty: &Type) -> std::result::Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawValue(None))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

impl ToSql for WireParam<'_> {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self.value() {
            Some(bytes) => {
                out.extend_from_slice(bytes);
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> tokio_postgres::types::Format {
        match self.format() {
            Format::Text => tokio_postgres::types::Format::Text,
            Format::Binary => tokio_postgres::types::Format::Binary,
        }
    }

    to_sql_checked!();
}
