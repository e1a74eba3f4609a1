use tracing::debug;

use crate::error::{PgSessionError, Result};
use crate::session::state::TransactionGate;
use crate::session::{drain_results, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Begin,
    Commit,
    Rollback,
    Savepoint,
}

impl Verb {
    fn gate(self) -> TransactionGate {
        match self {
            Verb::Begin => TransactionGate::Outside,
            Verb::Commit | Verb::Rollback | Verb::Savepoint => TransactionGate::Inside,
        }
    }
}

/// Quotes a savepoint name as an SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Session {
    /// Start a transaction. Fails locally if one is already open.
    pub async fn begin(&self) -> Result<()> {
        self.transaction_command(Verb::Begin, "BEGIN".to_string())
            .await
    }

    /// Commit the open transaction. Fails locally if none is open.
    pub async fn commit(&self) -> Result<()> {
        self.transaction_command(Verb::Commit, "COMMIT".to_string())
            .await
    }

    /// Roll back the open transaction. Fails locally if none is open.
    pub async fn rollback(&self) -> Result<()> {
        self.transaction_command(Verb::Rollback, "ROLLBACK".to_string())
            .await
    }

    /// Create a savepoint inside the open transaction.
    pub async fn savepoint(&self, name: &str) -> Result<()> {
        self.transaction_command(Verb::Savepoint, format!("SAVEPOINT {}", quote_ident(name)))
            .await
    }

    /// Release a savepoint inside the open transaction.
    pub async fn release_savepoint(&self, name: &str) -> Result<()> {
        self.transaction_command(
            Verb::Savepoint,
            format!("RELEASE SAVEPOINT {}", quote_ident(name)),
        )
        .await
    }

    /// Roll back to a savepoint inside the open transaction.
    pub async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.transaction_command(
            Verb::Savepoint,
            format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)),
        )
        .await
    }

    async fn transaction_command(&self, verb: Verb, sql: String) -> Result<()> {
        let (guard, mut transport) = self.inner.begin(verb.gate()).await?;
        debug!(target: "pgsession::session", "exec {:?}", sql);

        let outcome = match transport.exec(&sql).await {
            None => Err(PgSessionError::NoResult(transport.error_message())),
            Some(result) if result.status().is_error() => {
                Err(PgSessionError::database(result.error_message(), sql.as_str()))
            }
            Some(_) => Ok(()),
        };
        drain_results(&mut **transport).await;

        match verb {
            Verb::Begin => self.inner.states.set_in_transaction(outcome.is_ok()),
            // The server leaves the transaction block even when these fail.
            Verb::Commit | Verb::Rollback => self.inner.states.set_in_transaction(false),
            Verb::Savepoint => {}
        }
        guard.complete();
        outcome
    }
}
