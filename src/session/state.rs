use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{PgSessionError, Result};

/// What the physical connection is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    QueryRunning,
    Streaming,
}

pub(crate) type StreamId = u64;

/// Transaction flag a verb requires before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionGate {
    Any,
    Outside,
    Inside,
}

#[derive(Debug)]
struct SessionState {
    connection: ConnectionState,
    connected: bool,
    in_transaction: bool,
    active_stream: Option<StreamId>,
    needs_drain: bool,
    next_stream_id: StreamId,
}

/// Connection state guarded by a lock held only for the transition itself,
/// never across transport calls.
#[derive(Debug)]
pub(crate) struct StateMachine {
    state: Mutex<SessionState>,
}

impl StateMachine {
    pub(crate) fn new(connected: bool) -> Self {
        Self {
            state: Mutex::new(SessionState {
                connection: ConnectionState::Idle,
                connected,
                in_transaction: false,
                active_stream: None,
                needs_drain: false,
                next_stream_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    pub(crate) fn set_in_transaction(&self, value: bool) {
        self.lock().in_transaction = value;
    }

    /// `Idle`/`Streaming` to `QueryRunning`.
    ///
    /// Returns true when result handles of an earlier command may still be
    /// queued on the transport and must be drained first. An active stream
    /// is terminated here.
    pub(crate) fn begin(&self, gate: TransactionGate) -> Result<bool> {
        let mut state = self.lock();
        if !state.connected {
            return Err(PgSessionError::Connection("session is not connected".to_string()));
        }
        match (gate, state.in_transaction) {
            (TransactionGate::Outside, true) => {
                return Err(PgSessionError::TransactionState(
                    "a transaction is already in progress".to_string(),
                ))
            }
            (TransactionGate::Inside, false) => {
                return Err(PgSessionError::TransactionState(
                    "no transaction is in progress".to_string(),
                ))
            }
            _ => {}
        }
        Self::enter(&mut state)
    }

    /// Like [`StateMachine::begin`], without the connectivity and
    /// transaction checks. Used to close or swap the connection.
    pub(crate) fn begin_exclusive(&self) -> Result<bool> {
        Self::enter(&mut self.lock())
    }

    fn enter(state: &mut SessionState) -> Result<bool> {
        let drain = match state.connection {
            ConnectionState::QueryRunning => return Err(PgSessionError::Busy),
            ConnectionState::Idle => std::mem::take(&mut state.needs_drain),
            ConnectionState::Streaming => {
                if let Some(id) = state.active_stream.take() {
                    debug!(target: "pgsession::session", "terminating stream {}", id);
                }
                state.needs_drain = false;
                true
            }
        };
        state.connection = ConnectionState::QueryRunning;
        debug!(target: "pgsession::session", "state -> QueryRunning (drain: {})", drain);
        Ok(drain)
    }

    /// `QueryRunning` to `Streaming`; registers a new active stream.
    fn start_stream(&self) -> StreamId {
        let mut state = self.lock();
        let id = state.next_stream_id;
        state.next_stream_id += 1;
        state.connection = ConnectionState::Streaming;
        state.active_stream = Some(id);
        debug!(target: "pgsession::session", "state -> Streaming (stream {})", id);
        id
    }

    /// Back to `Idle`. With `dirty`, the next operation drains first.
    fn finish(&self, dirty: bool) {
        let mut state = self.lock();
        state.connection = ConnectionState::Idle;
        state.active_stream = None;
        state.needs_drain |= dirty;
        debug!(target: "pgsession::session", "state -> Idle");
    }

    pub(crate) fn is_active(&self, id: StreamId) -> bool {
        self.lock().active_stream == Some(id)
    }

    /// Ends the stream if it is still the active one.
    pub(crate) fn finish_stream(&self, id: StreamId) -> bool {
        let mut state = self.lock();
        if state.active_stream != Some(id) {
            return false;
        }
        state.active_stream = None;
        state.connection = ConnectionState::Idle;
        debug!(target: "pgsession::session", "stream {} finished, state -> Idle", id);
        true
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        let mut state = self.lock();
        state.connected = connected;
        state.in_transaction = false;
    }
}

/// Holds `QueryRunning` for one operation.
///
/// Dropped without [`OperationGuard::complete`] or
/// [`OperationGuard::into_stream`] (for instance when the future is
/// cancelled), it returns the session to `Idle` and flags the transport
/// for draining.
pub(crate) struct OperationGuard<'a> {
    states: &'a StateMachine,
    armed: bool,
}

impl<'a> OperationGuard<'a> {
    pub(crate) fn new(states: &'a StateMachine) -> Self {
        Self {
            states,
            armed: true,
        }
    }

    pub(crate) fn complete(mut self) {
        self.armed = false;
        self.states.finish(false);
    }

    pub(crate) fn into_stream(mut self) -> StreamId {
        self.armed = false;
        self.states.start_stream()
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.states.finish(true);
        }
    }
}
