//! Lifecycle of the staging tables used while importing a city model.
//!
//! While a run resolves deferred references it spills intermediate rows into
//! short-lived relations. This crate owns those relations:
//!
//! - [`CacheTable`]: one relation with idempotent creation, optional indexes,
//!   an ephemeral snapshot for durable tables, and a guarded drop.
//! - [`BranchGroup`]: a main table plus per-writer branches of one kind.
//! - [`CacheRegistry`]: the per-run get-or-create registry, backend
//!   selection and teardown.
//!
//! # Examples
//!
//! ```no_run
//! use citystage_cache::{CacheConfig, CacheRegistry};
//! use citystage_core::ModelKind;
//!
//! # fn main() -> Result<(), citystage_core::StageError> {
//! let registry = CacheRegistry::open(CacheConfig::default())?;
//! let table = registry.get_or_create_indexed(ModelKind::SurfaceGeometry)?;
//! assert!(table.is_created());
//! registry.drop_all().into_result()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod backend;
mod branch;
pub mod config;
pub mod policy;
mod registry;
mod table;
mod teardown;

pub use backend::{BackendKind, ConnectionProvider, SqliteConnectionProvider};
pub use branch::BranchGroup;
pub use config::CacheConfig;
pub use policy::{ConfigPolicy, StagingPolicy};
pub use registry::{CacheRegistry, RegistryBuilder, TableSummary};
pub use table::{CacheTable, TableBinding, TableRole};
pub use teardown::{TeardownFailure, TeardownReport};
