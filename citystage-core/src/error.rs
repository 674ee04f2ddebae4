//! Error type shared by every staging component.
#![forbid(unsafe_code)]

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::model::ModelKind;

/// Errors raised by staging tables, branch groups and the registry.
///
/// Variants fall into four groups: storage failures (a backend round-trip
/// failed), contract violations (the caller used a table in a state that
/// forbids the operation; no backend call was made), identifier budget
/// failures, and filesystem failures around the scratch directory.
#[derive(Debug, Error)]
pub enum StageError {
    /// A DDL/DML statement against a staging table failed.
    #[error("failed to {operation} staging table {table}")]
    Storage {
        /// Operation that failed, e.g. `create` or `drop`.
        operation: &'static str,
        /// Physical table name.
        table: String,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// Opening a connection to the main or scratch database failed.
    #[error("failed to open {target} connection")]
    OpenConnection {
        /// Which database was being opened.
        target: String,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// Closing a connection failed. The connection is released regardless.
    #[error("failed to close {label} connection")]
    CloseConnection {
        /// Label of the connection.
        label: String,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A main-database connection was needed but no main database is
    /// configured.
    #[error("no main database is configured")]
    MainDatabaseNotConfigured,
    /// A statement was issued on a connection that has been closed.
    #[error("{label} connection is already closed")]
    ConnectionClosed {
        /// Label of the connection.
        label: String,
    },
    /// `drop_table` was called on a branch member or derived snapshot.
    #[error("staging table {table} belongs to a group or derivation and cannot be dropped alone")]
    NotStandAlone {
        /// Physical table name.
        table: String,
    },
    /// The table was used before `create`.
    #[error("staging table {table} has not been created")]
    NotCreated {
        /// Physical table name.
        table: String,
    },
    /// The table was used after it was dropped.
    #[error("staging table {table} has been dropped")]
    Dropped {
        /// Physical table name.
        table: String,
    },
    /// A snapshot was requested from an ephemeral table.
    #[error("staging table {table} is ephemeral and cannot derive a snapshot")]
    SnapshotUnsupported {
        /// Physical table name.
        table: String,
    },
    /// The registry was used after `drop_all`.
    #[error("the staging registry has been torn down")]
    RegistryClosed,
    /// The backend identifier limit leaves no room for a unique name.
    #[error("identifier limit {limit} leaves no room for a unique {kind} table name")]
    IdentifierLimit {
        /// Kind whose name was requested.
        kind: ModelKind,
        /// Limit reported by the dialect.
        limit: usize,
    },
    /// Creating or deleting the scratch directory failed.
    #[error("failed to {operation} scratch directory {path}")]
    Filesystem {
        /// Operation that failed.
        operation: &'static str,
        /// Directory path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    /// Whether the error came from a storage round-trip.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::OpenConnection { .. }
                | Self::CloseConnection { .. }
                | Self::ConnectionClosed { .. }
        )
    }

    /// Whether the error is a misuse of the staging API.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::NotStandAlone { .. }
                | Self::NotCreated { .. }
                | Self::Dropped { .. }
                | Self::SnapshotUnsupported { .. }
                | Self::RegistryClosed
        )
    }

    /// Wrap a backend error raised while running `operation` on `table`.
    #[must_use]
    pub fn storage(operation: &'static str, table: &str, source: rusqlite::Error) -> Self {
        Self::Storage {
            operation,
            table: table.to_owned(),
            source,
        }
    }
}
