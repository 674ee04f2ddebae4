//! Core vocabulary of the Citystage staging cache.
//!
//! Responsibilities:
//! - Define the closed set of staging [`ModelKind`]s and their static
//!   [`TableSchema`]s.
//! - Describe the SQL-dialect collaborator ([`TableModelDialect`]) and ship
//!   the `SQLite` rendition.
//! - Generate backend-safe physical table names.
//! - Provide the shared connection handle and the [`StageError`] taxonomy.
//!
//! Boundaries:
//! - No lifecycle logic; tables, branch groups and the registry live in
//!   `citystage-cache`.

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod connection;
pub mod dialect;
mod error;
pub mod model;
pub mod naming;
pub mod schema;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use connection::{ConnectionOwnership, SharedConnection};
pub use dialect::{IndexHint, SqliteDialect, StorageFlavor, TableModelDialect};
pub use error::StageError;
pub use model::{ModelKind, UnknownModelKind};
pub use schema::{Column, ColumnType, IndexDef, TableSchema};
