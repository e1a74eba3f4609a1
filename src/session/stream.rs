use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::decode_row;
use crate::error::{PgSessionError, Result};
use crate::session::state::StreamId;
use crate::session::{drain_results, SessionInner};
use crate::types::{Column, QueryResult, ResultStatus, Row};

/// Pull-based stream over the rows of one result set.
///
/// Rows are fetched one at a time while the session stays in the
/// `Streaming` state. Any new operation on the session terminates the
/// stream; after that [`RowStream::next`] returns `Ok(None)`.
pub struct RowStream {
    session: Option<Arc<SessionInner>>,
    id: StreamId,
    query: String,
    columns: Arc<[Column]>,
    buffered: VecDeque<Row>,
    has_more: bool,
}

impl RowStream {
    /// A live stream whose first row was received with the first result.
    pub(crate) fn streaming(
        session: Arc<SessionInner>,
        id: StreamId,
        query: &str,
        columns: Arc<[Column]>,
        first: Row,
    ) -> Self {
        Self {
            session: Some(session),
            id,
            query: query.to_string(),
            columns,
            buffered: VecDeque::from([first]),
            has_more: true,
        }
    }

    /// A stream over rows that were already received in full.
    pub(crate) fn buffered(columns: Arc<[Column]>, rows: VecDeque<Row>) -> Self {
        Self {
            session: None,
            id: 0,
            query: String::new(),
            columns,
            buffered: rows,
            has_more: false,
        }
    }

    /// Column names of the result set.
    pub fn titles(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Whether rows may still arrive from the server. False once a newer
    /// operation on the session has terminated the stream.
    pub fn has_more(&self) -> bool {
        self.has_more && !self.terminated()
    }

    fn terminated(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.states.is_active(self.id))
    }

    /// Fetch the next row; `Ok(None)` at the end of the result set.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.has_more && self.terminated() {
            debug!(target: "pgsession::stream", "stream {} was terminated", self.id);
            self.has_more = false;
            self.buffered.clear();
            return Ok(None);
        }
        if let Some(row) = self.buffered.pop_front() {
            return Ok(Some(row));
        }
        if !self.has_more {
            return Ok(None);
        }
        let Some(session) = self.session.clone() else {
            self.has_more = false;
            return Ok(None);
        };

        let mut transport = session.transport.lock().await;
        if !session.states.is_active(self.id) {
            debug!(target: "pgsession::stream", "stream {} was terminated", self.id);
            self.has_more = false;
            return Ok(None);
        }

        let Some(result) = transport.get_result().await else {
            self.has_more = false;
            session.states.finish_stream(self.id);
            return Err(PgSessionError::NoResult(transport.error_message()));
        };

        let outcome = match result.status() {
            ResultStatus::SingleTuple => {
                match decode_row(&result, &self.columns, 0) {
                    Ok(values) => return Ok(Some(Row::new(Arc::clone(&self.columns), values))),
                    Err(e) => Err(e),
                }
            }
            ResultStatus::TuplesOk => Ok(None),
            status if status.is_error() => Err(PgSessionError::database(
                result.error_message(),
                self.query.as_str(),
            )),
            status => Err(PgSessionError::Protocol(format!(
                "unexpected result status {:?} while streaming",
                status
            ))),
        };
        drop(result);

        self.has_more = false;
        let discarded = drain_results(&mut **transport).await;
        session.states.finish_stream(self.id);
        debug!(target: "pgsession::stream", "stream {} ended ({} trailing result(s))", self.id, discarded);
        outcome
    }

    /// Abandon the stream, discarding the rows not fetched yet.
    pub async fn done(&mut self) {
        self.buffered.clear();
        if !std::mem::take(&mut self.has_more) {
            return;
        }
        let Some(session) = self.session.take() else {
            return;
        };
        let mut transport = session.transport.lock().await;
        if session.states.is_active(self.id) {
            let discarded = drain_results(&mut **transport).await;
            session.states.finish_stream(self.id);
            debug!(target: "pgsession::stream", "stream {} abandoned, {} result(s) discarded", self.id, discarded);
        }
    }

    /// Fetch all remaining rows.
    pub async fn collect(mut self) -> Result<QueryResult> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        let count = rows.len() as u64;
        Ok(QueryResult::new(self.titles(), rows, count))
    }

    /// Fetch the remaining rows on a background task.
    ///
    /// `callback` runs once per row, in order; the next row is only fetched
    /// after it returns. The handle yields the number of rows delivered.
    pub fn spawn_each<F>(mut self, mut callback: F) -> JoinHandle<Result<u64>>
    where
        F: FnMut(Row) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut count = 0;
            while let Some(row) = self.next().await? {
                callback(row);
                count += 1;
            }
            Ok(count)
        })
    }

    /// Fetch the remaining rows on a background task and send them through
    /// a bounded channel. Dropping the receiver abandons the stream.
    pub fn into_channel(mut self, capacity: usize) -> mpsc::Receiver<Result<Row>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(async move {
            loop {
                match self.next().await {
                    Ok(Some(row)) => {
                        if tx.send(Ok(row)).await.is_err() {
                            self.done().await;
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });
        rx
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("id", &self.id)
            .field("columns", &self.columns)
            .field("buffered", &self.buffered.len())
            .field("has_more", &self.has_more)
            .finish()
    }
}
