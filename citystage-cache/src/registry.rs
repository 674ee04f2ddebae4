//! Per-run container of staging tables and branch groups.
//!
//! A [`CacheRegistry`] is created at the start of an import run, shared by
//! worker threads behind an `Arc`, and torn down once with
//! [`CacheRegistry::drop_all`]. It owns the backend connection, a lazily
//! opened main-database connection for kinds that must be visible there, and
//! the private scratch directory in embedded mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use citystage_core::{
    ConnectionOwnership, ModelKind, SharedConnection, SqliteDialect, StageError, StorageFlavor,
    TableModelDialect,
};
use citystage_fs::{create_private_dir, remove_dir_tree};

use crate::backend::{BackendKind, ConnectionProvider, SqliteConnectionProvider};
use crate::branch::BranchGroup;
use crate::config::CacheConfig;
use crate::policy::{ConfigPolicy, StagingPolicy};
use crate::table::{CacheTable, TableBinding};
use crate::teardown::TeardownReport;

const MAIN_DATABASE_LABEL: &str = "main database";
const SCRATCH_LABEL: &str = "scratch";

#[derive(Debug)]
struct Backend {
    kind: BackendKind,
    connection: SharedConnection,
    temp_dir: Option<Utf8PathBuf>,
}

/// One row of [`CacheRegistry::summary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    /// Model kind.
    pub kind: ModelKind,
    /// Physical name of the table, or of the group's main table.
    pub table: String,
    /// Storage flavor.
    pub flavor: StorageFlavor,
    /// Whether the entry is a branch group.
    pub grouped: bool,
    /// Whether the relation exists.
    pub created: bool,
    /// Whether its indexes were built.
    pub indexed: bool,
    /// Branches of a group; zero for plain tables.
    pub branches: usize,
    /// Row count of the table or main table, when created.
    pub rows: Option<u64>,
}

/// Builder for a [`CacheRegistry`] with substituted collaborators.
#[derive(Debug)]
pub struct RegistryBuilder {
    config: CacheConfig,
    provider: Option<Arc<dyn ConnectionProvider>>,
    dialect: Option<Arc<dyn TableModelDialect>>,
    policy: Option<Arc<dyn StagingPolicy>>,
}

impl RegistryBuilder {
    /// Use `provider` instead of [`SqliteConnectionProvider`].
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use `dialect` instead of [`SqliteDialect`].
    #[must_use]
    pub fn dialect(mut self, dialect: Arc<dyn TableModelDialect>) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Use `policy` instead of [`ConfigPolicy`].
    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn StagingPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Select the backend and open its connection.
    ///
    /// # Errors
    /// Returns [`StageError::OpenConnection`] or
    /// [`StageError::MainDatabaseNotConfigured`] when the backend connection
    /// cannot be opened, and [`StageError::Filesystem`] when the scratch
    /// directory cannot be created.
    pub fn build(self) -> Result<CacheRegistry, StageError> {
        let config = self.config;
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(SqliteConnectionProvider::from_config(&config)));
        let dialect = self.dialect.unwrap_or_else(|| Arc::new(SqliteDialect));
        let policy = self
            .policy
            .unwrap_or_else(|| Arc::new(ConfigPolicy::from_config(&config)));

        let backend = if config.use_database {
            Backend {
                kind: BackendKind::MainDatabase,
                connection: SharedConnection::new(MAIN_DATABASE_LABEL, provider.main_connection()?),
                temp_dir: None,
            }
        } else {
            open_scratch(provider.as_ref(), &config.local_cache_dir)?
        };
        info!(
            "staging registry ready on {:?} backend using {} dialect",
            backend.kind,
            dialect.name()
        );

        Ok(CacheRegistry {
            config,
            provider,
            dialect,
            policy,
            backend,
            main_connection: Mutex::new(None),
            tables: DashMap::new(),
            groups: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }
}

fn open_scratch(provider: &dyn ConnectionProvider, root: &Utf8Path) -> Result<Backend, StageError> {
    let name = Uuid::new_v4().simple().to_string();
    let dir = create_private_dir(root, &name).map_err(|source| StageError::Filesystem {
        operation: "create",
        path: root.join(&name),
        source,
    })?;
    match provider.scratch_connection(&dir) {
        Ok(connection) => {
            debug!("scratch database placed in {dir}");
            Ok(Backend {
                kind: BackendKind::EmbeddedScratch,
                connection: SharedConnection::new(SCRATCH_LABEL, connection),
                temp_dir: Some(dir),
            })
        }
        Err(err) => {
            if let Err(cleanup) = remove_dir_tree(&dir) {
                warn!("failed to remove scratch directory {dir}: {cleanup}");
            }
            Err(err)
        }
    }
}

/// Get-or-create registry of staging tables for one run.
#[derive(Debug)]
pub struct CacheRegistry {
    config: CacheConfig,
    provider: Arc<dyn ConnectionProvider>,
    dialect: Arc<dyn TableModelDialect>,
    policy: Arc<dyn StagingPolicy>,
    backend: Backend,
    main_connection: Mutex<Option<SharedConnection>>,
    tables: DashMap<ModelKind, Arc<CacheTable>>,
    groups: DashMap<ModelKind, Arc<BranchGroup>>,
    closed: AtomicBool,
}

impl CacheRegistry {
    /// Open a registry with the default `SQLite` collaborators.
    ///
    /// # Errors
    /// See [`RegistryBuilder::build`].
    pub fn open(config: CacheConfig) -> Result<Self, StageError> {
        Self::builder(config).build()
    }

    /// Start a builder for `config`.
    #[must_use]
    pub fn builder(config: CacheConfig) -> RegistryBuilder {
        RegistryBuilder {
            config,
            provider: None,
            dialect: None,
            policy: None,
        }
    }

    /// Configuration the registry was built from.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Selected backend.
    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.backend.kind
    }

    /// Private scratch directory, in embedded mode.
    #[must_use]
    pub fn temp_dir(&self) -> Option<&Utf8Path> {
        self.backend.temp_dir.as_deref()
    }

    /// The created table of `kind`, registering it first if needed.
    ///
    /// Concurrent callers for one kind all receive the same instance and the
    /// backend sees a single `create`.
    ///
    /// # Errors
    /// Returns [`StageError::RegistryClosed`] after [`Self::drop_all`], or
    /// the error of opening a connection or creating the table.
    pub fn get_or_create(&self, kind: ModelKind) -> Result<Arc<CacheTable>, StageError> {
        self.obtain_table(kind, false)
    }

    /// Like [`Self::get_or_create`], with the kind's indexes built.
    ///
    /// # Errors
    /// See [`Self::get_or_create`].
    pub fn get_or_create_indexed(&self, kind: ModelKind) -> Result<Arc<CacheTable>, StageError> {
        self.obtain_table(kind, true)
    }

    /// The branch group of `kind` with its main table created.
    ///
    /// # Errors
    /// See [`Self::get_or_create`].
    pub fn get_or_create_branch_group(
        &self,
        kind: ModelKind,
    ) -> Result<Arc<BranchGroup>, StageError> {
        self.obtain_group(kind, false)
    }

    /// Like [`Self::get_or_create_branch_group`], with the main table
    /// indexed.
    ///
    /// # Errors
    /// See [`Self::get_or_create`].
    pub fn get_or_create_indexed_branch_group(
        &self,
        kind: ModelKind,
    ) -> Result<Arc<BranchGroup>, StageError> {
        self.obtain_group(kind, true)
    }

    /// The registered table of `kind`, if any.
    #[must_use]
    pub fn get(&self, kind: ModelKind) -> Option<Arc<CacheTable>> {
        self.tables.get(&kind).map(|entry| Arc::clone(entry.value()))
    }

    /// The registered branch group of `kind`, if any.
    #[must_use]
    pub fn get_branch_group(&self, kind: ModelKind) -> Option<Arc<BranchGroup>> {
        self.groups.get(&kind).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a table or branch group of `kind` is registered.
    #[must_use]
    pub fn exists(&self, kind: ModelKind) -> bool {
        self.tables.contains_key(&kind) || self.groups.contains_key(&kind)
    }

    /// One row per registered table and branch group, ordered by kind.
    ///
    /// # Errors
    /// Returns the storage error of counting rows.
    pub fn summary(&self) -> Result<Vec<TableSummary>, StageError> {
        let tables: Vec<_> = self
            .tables
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let groups: Vec<_> = self
            .groups
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut rows = Vec::with_capacity(tables.len() + groups.len());
        for table in tables {
            rows.push(summarise(&table, false, 0)?);
        }
        for group in groups {
            rows.push(summarise(&group.main_table(), true, group.branch_count())?);
        }
        rows.sort_by_key(|row| (row.kind, row.grouped));
        Ok(rows)
    }

    /// Drop every table and group, close connections and remove the
    /// scratch directory.
    ///
    /// Every step runs even when earlier ones fail; failures are logged and
    /// collected in the report. Only the first call does any work.
    pub fn drop_all(&self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.closed.swap(true, Ordering::AcqRel) {
            return report;
        }

        let tables: Vec<_> = self
            .tables
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for table in &tables {
            report.record(table.table_name(), table.drop_table());
        }
        let groups: Vec<_> = self
            .groups
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for group in &groups {
            report.record(&format!("{} branch group", group.kind()), group.drop_group());
        }
        self.tables.clear();
        self.groups.clear();

        if let Some(main) = self.lock_main_connection().take() {
            report.record(main.label(), main.close().map(|_| ()));
        }
        let connection = &self.backend.connection;
        report.record(connection.label(), connection.close().map(|_| ()));

        if let Some(dir) = &self.backend.temp_dir {
            let removal = remove_dir_tree(dir).map_err(|source| StageError::Filesystem {
                operation: "remove",
                path: dir.clone(),
                source,
            });
            report.record(dir.as_str(), removal);
        }

        info!(
            "staging registry torn down: {} tables, {} branch groups, {} failures",
            tables.len(),
            groups.len(),
            report.failures().len()
        );
        report
    }

    fn obtain_table(&self, kind: ModelKind, indexed: bool) -> Result<Arc<CacheTable>, StageError> {
        self.ensure_open()?;
        let table = self
            .get(kind)
            .map_or_else(|| self.register_table(kind), Ok)?;

        if indexed {
            table.create_with_indexes()?;
        } else {
            table.create()?;
        }
        if self.is_closed() {
            // Registered after teardown started; nobody else will drop it.
            if let Err(err) = table.drop_table() {
                warn!("failed to drop late table {}: {err}", table.table_name());
            }
            return Err(StageError::RegistryClosed);
        }
        Ok(table)
    }

    fn obtain_group(&self, kind: ModelKind, indexed: bool) -> Result<Arc<BranchGroup>, StageError> {
        self.ensure_open()?;
        let group = self
            .get_branch_group(kind)
            .map_or_else(|| self.register_group(kind), Ok)?;

        if indexed {
            group.create_with_indexes()?;
        } else {
            group.create()?;
        }
        if self.is_closed() {
            if let Err(err) = group.drop_group() {
                warn!("failed to drop late {kind} branch group: {err}");
            }
            return Err(StageError::RegistryClosed);
        }
        Ok(group)
    }

    /// Insert-if-absent; a losing candidate is discarded before any DDL ran.
    fn register_table(&self, kind: ModelKind) -> Result<Arc<CacheTable>, StageError> {
        let binding = self.binding(self.table_connection(kind)?);
        let candidate = CacheTable::stand_alone(
            kind,
            self.policy.flavor_for(kind),
            binding,
            ConnectionOwnership::Borrowed,
        )?;
        let winner = self
            .tables
            .entry(kind)
            .or_insert_with(|| Arc::new(candidate));
        Ok(Arc::clone(winner.value()))
    }

    fn register_group(&self, kind: ModelKind) -> Result<Arc<BranchGroup>, StageError> {
        let (connection, ownership) = self.group_connection(kind)?;
        let candidate = BranchGroup::new(
            kind,
            self.policy.flavor_for(kind),
            self.binding(connection),
            ownership,
        )?;
        let winner = self
            .groups
            .entry(kind)
            .or_insert_with(|| Arc::new(candidate));
        Ok(Arc::clone(winner.value()))
    }

    fn table_connection(&self, kind: ModelKind) -> Result<SharedConnection, StageError> {
        if self.backend.kind == BackendKind::EmbeddedScratch && self.policy.requires_main_database(kind)
        {
            self.lazy_main_connection()
        } else {
            Ok(self.backend.connection.clone())
        }
    }

    fn group_connection(
        &self,
        kind: ModelKind,
    ) -> Result<(SharedConnection, ConnectionOwnership), StageError> {
        if self.backend.kind == BackendKind::MainDatabase || self.policy.requires_main_database(kind)
        {
            let connection = SharedConnection::new(
                format!("{kind} branch group"),
                self.provider.main_connection()?,
            );
            Ok((connection, ConnectionOwnership::Owned))
        } else {
            Ok((self.backend.connection.clone(), ConnectionOwnership::Borrowed))
        }
    }

    fn lazy_main_connection(&self) -> Result<SharedConnection, StageError> {
        let mut slot = self.lock_main_connection();
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }
        let connection = SharedConnection::new(MAIN_DATABASE_LABEL, self.provider.main_connection()?);
        *slot = Some(connection.clone());
        Ok(connection)
    }

    fn binding(&self, connection: SharedConnection) -> TableBinding {
        TableBinding::new(connection, Arc::clone(&self.dialect))
            .with_index_hint(self.config.index_hint())
    }

    fn ensure_open(&self) -> Result<(), StageError> {
        if self.is_closed() {
            return Err(StageError::RegistryClosed);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock_main_connection(&self) -> MutexGuard<'_, Option<SharedConnection>> {
        self.main_connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CacheRegistry {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        let report = self.drop_all();
        if !report.is_clean() {
            warn!(
                "staging registry dropped without drop_all; {} teardown failures",
                report.failures().len()
            );
        }
    }
}

fn summarise(table: &CacheTable, grouped: bool, branches: usize) -> Result<TableSummary, StageError> {
    let created = table.is_created();
    Ok(TableSummary {
        kind: table.kind(),
        table: table.table_name().to_owned(),
        flavor: table.flavor(),
        grouped,
        created,
        indexed: table.is_indexed(),
        branches,
        rows: if created { Some(table.size()?) } else { None },
    })
}
