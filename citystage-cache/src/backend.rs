//! Backend selection and connection acquisition.
//!
//! A registry stages either inside the main database or inside a private
//! embedded scratch database. [`ConnectionProvider`] hides where the
//! connections come from so tests can substitute in-memory databases.

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use citystage_core::StageError;

use crate::config::CacheConfig;

/// File name of the scratch database inside the private directory.
pub const SCRATCH_DATABASE_FILE: &str = "scratch.db";

/// Where a registry stages its tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Tables live in the main database.
    MainDatabase,
    /// Tables live in a private scratch database below the local cache dir.
    EmbeddedScratch,
}

/// Source of main-database and scratch connections.
///
/// Connections are handed out in `SQLite`'s auto-commit mode; each DDL
/// primitive commits on its own. Callers that batch row writes open their
/// own transaction on the table's connection.
pub trait ConnectionProvider: fmt::Debug + Send + Sync {
    /// Open a connection to the main database.
    ///
    /// # Errors
    /// Returns [`StageError::MainDatabaseNotConfigured`] when there is no
    /// main database, or [`StageError::OpenConnection`].
    fn main_connection(&self) -> Result<Connection, StageError>;

    /// Open the scratch database stored under `root`.
    ///
    /// # Errors
    /// Returns [`StageError::OpenConnection`] when the database cannot be
    /// opened or configured.
    fn scratch_connection(&self, root: &Utf8Path) -> Result<Connection, StageError>;
}

/// File-backed `SQLite` connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConnectionProvider {
    main_database: Option<Utf8PathBuf>,
    busy_timeout: Duration,
}

impl SqliteConnectionProvider {
    /// Provider for an optional main database file.
    #[must_use]
    pub const fn new(main_database: Option<Utf8PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            main_database,
            busy_timeout,
        }
    }

    /// Provider configured from `config`.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.main_database.clone(), config.busy_timeout())
    }

    fn open(&self, target: &str, path: &Utf8Path) -> Result<Connection, StageError> {
        let open_error = |source| StageError::OpenConnection {
            target: target.to_owned(),
            source,
        };
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let connection = Connection::open_with_flags(path, flags).map_err(open_error)?;
        connection
            .busy_timeout(self.busy_timeout)
            .map_err(open_error)?;
        debug!("opened {target} connection at {path}");
        Ok(connection)
    }
}

impl ConnectionProvider for SqliteConnectionProvider {
    fn main_connection(&self) -> Result<Connection, StageError> {
        let path = self
            .main_database
            .as_deref()
            .ok_or(StageError::MainDatabaseNotConfigured)?;
        self.open("main database", path)
    }

    fn scratch_connection(&self, root: &Utf8Path) -> Result<Connection, StageError> {
        let connection = self.open("scratch", &root.join(SCRATCH_DATABASE_FILE))?;
        let configure_error = |source| StageError::OpenConnection {
            target: "scratch".to_owned(),
            source,
        };
        // The scratch file is discarded after the run.
        let _mode: String = connection
            .pragma_update_and_check(None, "journal_mode", "OFF", |row| row.get(0))
            .map_err(configure_error)?;
        connection
            .pragma_update(None, "synchronous", "OFF")
            .map_err(configure_error)?;
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn utf8_root(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir")
    }

    #[rstest]
    fn missing_main_database_is_reported() {
        let provider = SqliteConnectionProvider::new(None, Duration::from_millis(10));
        let err = provider.main_connection().expect_err("no main database");
        assert!(matches!(err, StageError::MainDatabaseNotConfigured));
    }

    #[rstest]
    fn scratch_database_disables_journaling() {
        let dir = TempDir::new().expect("create temp dir");
        let root = utf8_root(&dir);
        let provider = SqliteConnectionProvider::new(None, Duration::from_millis(10));

        let connection = provider.scratch_connection(&root).expect("open scratch");
        let mode: String = connection
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .expect("read journal mode");

        assert_eq!(mode.to_lowercase(), "off");
        assert!(root.join(SCRATCH_DATABASE_FILE).exists());
    }

    #[rstest]
    fn main_database_opens_configured_file() {
        let dir = TempDir::new().expect("create temp dir");
        let path = utf8_root(&dir).join("main.db");
        let config = CacheConfig {
            main_database: Some(path.clone()),
            ..CacheConfig::default()
        };

        let connection = SqliteConnectionProvider::from_config(&config)
            .main_connection()
            .expect("open main database");
        connection
            .execute("CREATE TABLE probe (id INTEGER)", [])
            .expect("write to main database");
        assert!(path.exists());
    }
}
