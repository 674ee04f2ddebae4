//! Facade crate for the Citystage staging cache.
//!
//! This crate re-exports the model vocabulary from `citystage-core` and the
//! table, branch group and registry lifecycle from `citystage-cache`.

#![forbid(unsafe_code)]

pub use citystage_cache::{
    BackendKind, BranchGroup, CacheConfig, CacheRegistry, CacheTable, ConfigPolicy,
    ConnectionProvider, RegistryBuilder, SqliteConnectionProvider, StagingPolicy, TableBinding,
    TableRole, TableSummary, TeardownFailure, TeardownReport,
};
pub use citystage_core::{
    ConnectionOwnership, IndexHint, ModelKind, SharedConnection, SqliteDialect, StageError,
    StorageFlavor, TableModelDialect, TableSchema, UnknownModelKind,
};

#[cfg(feature = "test-support")]
pub use citystage_core::test_support;
