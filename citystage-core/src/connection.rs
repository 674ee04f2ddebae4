//! Connection handles shared between staging tables.
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so a connection used by
//! several tables and worker threads sits behind a mutex. The slot holds an
//! `Option` so closing takes the connection out exactly once; every later
//! statement fails with [`StageError::ConnectionClosed`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use rusqlite::Connection;

use crate::error::StageError;

/// Whether a holder is responsible for closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOwnership {
    /// The holder closes the connection when it is dropped.
    Owned,
    /// Someone else closes the connection.
    Borrowed,
}

/// A labelled, closable connection shared by reference counting.
#[derive(Clone)]
pub struct SharedConnection {
    slot: Arc<Slot>,
}

struct Slot {
    label: String,
    connection: Mutex<Option<Connection>>,
}

impl fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConnection")
            .field("label", &self.slot.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SharedConnection {
    /// Wrap an open connection.
    #[must_use]
    pub fn new(label: impl Into<String>, connection: Connection) -> Self {
        Self {
            slot: Arc::new(Slot {
                label: label.into(),
                connection: Mutex::new(Some(connection)),
            }),
        }
    }

    /// Label used in logs and errors.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.slot.label
    }

    /// Run `f` with exclusive access to the open connection.
    ///
    /// # Errors
    /// Returns [`StageError::ConnectionClosed`] after [`Self::close`], or
    /// whatever `f` returns.
    pub fn with<T, F>(&self, f: F) -> Result<T, StageError>
    where
        F: FnOnce(&Connection) -> Result<T, StageError>,
    {
        let guard = self.lock();
        let connection = guard.as_ref().ok_or_else(|| StageError::ConnectionClosed {
            label: self.slot.label.clone(),
        })?;
        f(connection)
    }

    /// Close the connection.
    ///
    /// Returns `Ok(true)` when this call closed it and `Ok(false)` when it was
    /// already closed.
    ///
    /// # Errors
    /// Returns [`StageError::CloseConnection`] when `SQLite` reports a close
    /// failure; the handle is released and counts as closed either way.
    pub fn close(&self) -> Result<bool, StageError> {
        let taken = self.lock().take();
        let Some(connection) = taken else {
            return Ok(false);
        };
        debug!("closing {} connection", self.slot.label);
        connection
            .close()
            .map(|()| true)
            .map_err(|(_, source)| StageError::CloseConnection {
                label: self.slot.label.clone(),
                source,
            })
    }

    /// Whether [`Self::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.slot
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn shared() -> SharedConnection {
        SharedConnection::new(
            "test",
            Connection::open_in_memory().expect("open in-memory database"),
        )
    }

    #[rstest]
    fn runs_statements_while_open(shared: SharedConnection) {
        let value: i64 = shared
            .with(|conn| {
                conn.query_row("SELECT 41 + 1", [], |row| row.get(0))
                    .map_err(|source| StageError::storage("probe", "none", source))
            })
            .expect("query");
        assert_eq!(value, 42);
    }

    #[rstest]
    fn closes_exactly_once(shared: SharedConnection) {
        let clone = shared.clone();
        assert!(shared.close().expect("first close"));
        assert!(!clone.close().expect("second close"));
        assert!(clone.is_closed());
    }

    #[rstest]
    fn statements_after_close_fail(shared: SharedConnection) {
        shared.close().expect("close");
        let err = shared.with(|_| Ok(())).expect_err("closed connection");
        assert!(matches!(err, StageError::ConnectionClosed { ref label } if label == "test"));
    }

    #[rstest]
    fn clones_share_the_connection(shared: SharedConnection) {
        let clone = shared.clone();
        shared.close().expect("close");
        assert!(clone.is_closed());
    }
}
