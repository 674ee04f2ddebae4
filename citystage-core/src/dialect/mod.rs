//! DDL/DML primitives the staging cache consumes per model kind.
//!
//! A dialect turns a [`ModelKind`]'s schema into statements for one storage
//! engine. The cache never builds SQL itself; it decides *when* to call these
//! primitives and which physical name to pass.
//!
//! Every method is synchronous and reports failures as `rusqlite::Error`.
//! Callers wrap those into [`StageError::Storage`](crate::StageError) and
//! never retry.

use std::fmt;

use rusqlite::Connection;

use crate::model::ModelKind;

mod sqlite;

pub use sqlite::SqliteDialect;

/// Identifier limit of the most restrictive supported backend.
pub const DEFAULT_MAX_IDENTIFIER_LEN: usize = 30;

/// Number of characters appended to a table name to form index names.
pub const INDEX_SUFFIX_LEN: usize = 3;

/// Visibility and durability of a staging relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum StorageFlavor {
    /// Session-local fast table, private to the owning connection.
    Ephemeral,
    /// Session-global table, visible for the whole unit of work.
    Durable,
}

/// Index build mode hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexHint {
    /// Regular, logged index.
    #[default]
    Logged,
    /// Non-durable index where the engine supports one.
    Unlogged,
}

/// Physical name of the `ordinal`-th index (zero based) of `table`.
#[must_use]
pub fn index_name(table: &str, ordinal: usize) -> String {
    format!("{table}_i{}", ordinal + 1)
}

/// SQL-dialect collaborator that emits and executes staging DDL/DML.
pub trait TableModelDialect: fmt::Debug + Send + Sync {
    /// Human-readable dialect name for logs.
    fn name(&self) -> &'static str;

    /// Longest identifier the backend accepts.
    fn max_identifier_len(&self) -> usize {
        DEFAULT_MAX_IDENTIFIER_LEN
    }

    /// Create an empty relation of `kind` named `table`.
    ///
    /// # Errors
    /// Returns the backend error when the statement fails.
    fn create(
        &self,
        connection: &Connection,
        kind: ModelKind,
        table: &str,
        flavor: StorageFlavor,
    ) -> rusqlite::Result<()>;

    /// Materialise an ephemeral relation `target` holding every row of
    /// `source`.
    ///
    /// # Errors
    /// Returns the backend error when the statement fails.
    fn create_as_select_from(
        &self,
        connection: &Connection,
        kind: ModelKind,
        target: &str,
        source: &str,
    ) -> rusqlite::Result<()>;

    /// Build the index set of `kind` on `table`.
    ///
    /// # Errors
    /// Returns the backend error when any index statement fails.
    fn create_indexes(
        &self,
        connection: &Connection,
        kind: ModelKind,
        table: &str,
        hint: IndexHint,
    ) -> rusqlite::Result<()>;

    /// Remove every row of `table`.
    ///
    /// # Errors
    /// Returns the backend error when the statement fails.
    fn truncate(&self, connection: &Connection, table: &str) -> rusqlite::Result<()>;

    /// Count the rows of `table`.
    ///
    /// # Errors
    /// Returns the backend error when the query fails.
    fn size(&self, connection: &Connection, table: &str) -> rusqlite::Result<u64>;

    /// Drop `table` and its indexes.
    ///
    /// # Errors
    /// Returns the backend error when the statement fails.
    fn drop_table(&self, connection: &Connection, table: &str) -> rusqlite::Result<()>;
}
