use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Handle to a server-side prepared statement.
///
/// Keeps the query text so the statement can be prepared again on a new
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreparedStatement {
    name: String,
    sql: String,
}

impl PreparedStatement {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[derive(Debug, Default)]
struct Registry {
    known: HashSet<String>,
    next_id: u64,
}

/// Statement names known to exist on the current connection.
#[derive(Debug, Default)]
pub(crate) struct StatementRegistry {
    registry: Mutex<Registry>,
}

impl StatementRegistry {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// New handle with a name unique within this session.
    pub(crate) fn allocate(&self, prefix: &str, sql: &str) -> PreparedStatement {
        let mut registry = self.lock();
        registry.next_id += 1;
        PreparedStatement {
            name: format!("{}{}", prefix, registry.next_id),
            sql: sql.to_string(),
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.lock().known.contains(name)
    }

    pub(crate) fn insert(&self, name: &str) {
        self.lock().known.insert(name.to_string());
    }

    /// Forgets every statement; they are prepared again on next use.
    pub(crate) fn clear(&self) {
        self.lock().known.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().known.len()
    }
}
