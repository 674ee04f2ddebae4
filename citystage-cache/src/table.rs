//! A single staging relation and its lifecycle.
//!
//! A [`CacheTable`] moves through `uncreated → created → dropped`, with index
//! creation and (for durable tables) snapshot derivation hanging off the
//! created state. Schema-changing steps run under the table's state mutex;
//! an atomic flag gives `create` a lock-free fast path once the relation
//! exists.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use rusqlite::Connection;

use citystage_core::naming::table_name;
use citystage_core::{
    ConnectionOwnership, IndexHint, ModelKind, SharedConnection, StageError, StorageFlavor,
    TableModelDialect,
};

use crate::teardown::{finish, keep_first};

/// Whether a table may be dropped on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    /// Independent table; `drop_table` is allowed.
    StandAlone,
    /// Main table or branch of a group, or a derived snapshot; dropped by its
    /// owner only.
    Member,
}

/// Connection and dialect a table runs its statements through.
#[derive(Debug, Clone)]
pub struct TableBinding {
    /// Connection shared with the other tables of the run.
    pub connection: SharedConnection,
    /// DDL/DML collaborator.
    pub dialect: Arc<dyn TableModelDialect>,
    /// Index mode passed to `create_indexes`.
    pub index_hint: IndexHint,
}

impl TableBinding {
    /// Bind to `connection` with a logged index mode.
    #[must_use]
    pub fn new(connection: SharedConnection, dialect: Arc<dyn TableModelDialect>) -> Self {
        Self {
            connection,
            dialect,
            index_hint: IndexHint::Logged,
        }
    }

    /// Use `hint` when building indexes.
    #[must_use]
    pub const fn with_index_hint(mut self, hint: IndexHint) -> Self {
        self.index_hint = hint;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uncreated,
    Created,
    Dropped,
}

#[derive(Debug)]
struct TableState {
    phase: Phase,
    indexed: bool,
    snapshot: Option<Arc<CacheTable>>,
}

/// A named scratch relation of one [`ModelKind`].
#[derive(Debug)]
pub struct CacheTable {
    kind: ModelKind,
    flavor: StorageFlavor,
    name: String,
    role: TableRole,
    ownership: ConnectionOwnership,
    binding: TableBinding,
    created: AtomicBool,
    state: Mutex<TableState>,
}

impl CacheTable {
    /// A table that may be dropped on its own.
    ///
    /// With [`ConnectionOwnership::Owned`] the table closes the connection
    /// when it is dropped.
    ///
    /// # Errors
    /// Returns [`StageError::IdentifierLimit`] when no unique name fits the
    /// dialect's identifier limit.
    pub fn stand_alone(
        kind: ModelKind,
        flavor: StorageFlavor,
        binding: TableBinding,
        ownership: ConnectionOwnership,
    ) -> Result<Self, StageError> {
        Self::build(kind, flavor, binding, TableRole::StandAlone, ownership)
    }

    pub(crate) fn member(
        kind: ModelKind,
        flavor: StorageFlavor,
        binding: TableBinding,
    ) -> Result<Self, StageError> {
        Self::build(
            kind,
            flavor,
            binding,
            TableRole::Member,
            ConnectionOwnership::Borrowed,
        )
    }

    fn build(
        kind: ModelKind,
        flavor: StorageFlavor,
        binding: TableBinding,
        role: TableRole,
        ownership: ConnectionOwnership,
    ) -> Result<Self, StageError> {
        let name = table_name(kind, binding.dialect.max_identifier_len())?;
        Ok(Self {
            kind,
            flavor,
            name,
            role,
            ownership,
            binding,
            created: AtomicBool::new(false),
            state: Mutex::new(TableState {
                phase: Phase::Uncreated,
                indexed: false,
                snapshot: None,
            }),
        })
    }

    /// Model kind of the table.
    #[must_use]
    pub const fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Ephemeral or durable.
    #[must_use]
    pub const fn flavor(&self) -> StorageFlavor {
        self.flavor
    }

    /// Stand-alone or member.
    #[must_use]
    pub const fn role(&self) -> TableRole {
        self.role
    }

    /// Physical table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.name
    }

    /// Whether the relation exists and has not been dropped.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }

    /// Whether the kind's index set has been built.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.lock_state().indexed
    }

    /// Create the relation unless it already exists.
    ///
    /// Concurrent callers issue at most one `create` statement; all of them
    /// return after it completed. A failed attempt leaves the table
    /// uncreated so a later call may retry.
    ///
    /// # Errors
    /// Returns [`StageError::Dropped`] after [`Self::drop_table`], or the storage
    /// error of the failed statement.
    pub fn create(&self) -> Result<(), StageError> {
        if self.is_created() {
            return Ok(());
        }
        let mut state = self.lock_state();
        self.create_locked(&mut state)
    }

    /// Create the relation and its indexes, each at most once.
    ///
    /// # Errors
    /// See [`Self::create`]; index failures leave the table created but not
    /// indexed.
    pub fn create_with_indexes(&self) -> Result<(), StageError> {
        let mut state = self.lock_state();
        self.create_locked(&mut state)?;
        self.index_locked(&mut state)
    }

    /// Materialise an indexed ephemeral copy of this durable table.
    ///
    /// The first call copies every row and builds the copy's indexes; later
    /// calls return the same instance. Returns `Ok(None)` when the table was
    /// never created.
    ///
    /// # Errors
    /// Returns [`StageError::SnapshotUnsupported`] for ephemeral tables,
    /// [`StageError::Dropped`] after drop, or the storage error of the copy.
    pub fn derive_snapshot(&self) -> Result<Option<Arc<Self>>, StageError> {
        if self.flavor == StorageFlavor::Ephemeral {
            return Err(StageError::SnapshotUnsupported {
                table: self.name.clone(),
            });
        }

        let mut state = self.lock_state();
        match state.phase {
            Phase::Uncreated => return Ok(None),
            Phase::Dropped => return Err(self.dropped()),
            Phase::Created => {}
        }
        if let Some(snapshot) = &state.snapshot {
            return Ok(Some(Arc::clone(snapshot)));
        }

        let snapshot = Arc::new(Self::member(
            self.kind,
            StorageFlavor::Ephemeral,
            self.binding.clone(),
        )?);
        self.binding.connection.with(|connection| {
            self.binding
                .dialect
                .create_as_select_from(connection, self.kind, &snapshot.name, &self.name)
                .map_err(|source| StageError::storage("snapshot", &snapshot.name, source))
        })?;
        snapshot.adopt_created();
        if let Err(err) = snapshot.create_with_indexes() {
            if let Err(cleanup) = snapshot.drop_member() {
                warn!("failed to discard half-built snapshot {}: {cleanup}", snapshot.name);
            }
            return Err(err);
        }

        debug!("derived snapshot {} from {}", snapshot.name, self.name);
        state.snapshot = Some(Arc::clone(&snapshot));
        Ok(Some(snapshot))
    }

    /// Remove every row.
    ///
    /// # Errors
    /// Returns a contract error before create or after drop, otherwise the
    /// storage error of the statement.
    pub fn truncate(&self) -> Result<(), StageError> {
        self.ensure_created()?;
        self.binding.connection.with(|connection| {
            self.binding
                .dialect
                .truncate(connection, &self.name)
                .map_err(|source| StageError::storage("truncate", &self.name, source))
        })
    }

    /// Count the rows.
    ///
    /// # Errors
    /// Returns a contract error before create or after drop, otherwise the
    /// storage error of the query.
    pub fn size(&self) -> Result<u64, StageError> {
        self.ensure_created()?;
        self.binding.connection.with(|connection| {
            self.binding
                .dialect
                .size(connection, &self.name)
                .map_err(|source| StageError::storage("size", &self.name, source))
        })
    }

    /// Run row-level statements against the table.
    ///
    /// `f` receives the connection and the physical table name. The
    /// connection is held exclusively for the duration of `f`.
    ///
    /// # Errors
    /// Returns a contract error before create or after drop, otherwise the
    /// storage error produced by `f`.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, StageError>
    where
        F: FnOnce(&Connection, &str) -> rusqlite::Result<T>,
    {
        self.ensure_created()?;
        self.binding.connection.with(|connection| {
            f(connection, &self.name).map_err(|source| StageError::storage("access", &self.name, source))
        })
    }

    /// Drop the relation, its snapshot and, when owned, the connection.
    ///
    /// A second call is a no-op. Every step runs even when an earlier one
    /// failed; the first failure is returned afterwards.
    ///
    /// # Errors
    /// Returns [`StageError::NotStandAlone`] for members, without touching
    /// the backend; otherwise the first failure of the drop sequence.
    pub fn drop_table(&self) -> Result<(), StageError> {
        if self.role == TableRole::Member {
            return Err(StageError::NotStandAlone {
                table: self.name.clone(),
            });
        }
        self.drop_member()
    }

    pub(crate) fn drop_member(&self) -> Result<(), StageError> {
        let mut state = self.lock_state();
        if state.phase == Phase::Dropped {
            return Ok(());
        }
        let was_created = state.phase == Phase::Created;
        state.phase = Phase::Dropped;
        self.created.store(false, Ordering::Release);
        let snapshot = state.snapshot.take();

        let mut first = None;
        if was_created {
            keep_first(&mut first, &self.name, self.drop_relation());
        }
        if let Some(snapshot) = snapshot {
            keep_first(&mut first, &snapshot.name, snapshot.drop_member());
        }
        if self.ownership == ConnectionOwnership::Owned {
            keep_first(
                &mut first,
                self.binding.connection.label(),
                self.binding.connection.close().map(|_| ()),
            );
        }
        debug!("dropped staging table {}", self.name);
        finish(first)
    }

    /// Truncating a durable relation first is best effort; the drop runs
    /// regardless of its outcome.
    fn drop_relation(&self) -> Result<(), StageError> {
        self.binding.connection.with(|connection| {
            let dialect = &self.binding.dialect;
            let mut first = None;
            if self.flavor == StorageFlavor::Durable {
                keep_first(
                    &mut first,
                    &self.name,
                    dialect
                        .truncate(connection, &self.name)
                        .map_err(|source| StageError::storage("truncate", &self.name, source)),
                );
            }
            keep_first(
                &mut first,
                &self.name,
                dialect
                    .drop_table(connection, &self.name)
                    .map_err(|source| StageError::storage("drop", &self.name, source)),
            );
            finish(first)
        })
    }

    fn create_locked(&self, state: &mut TableState) -> Result<(), StageError> {
        match state.phase {
            Phase::Created => Ok(()),
            Phase::Dropped => Err(self.dropped()),
            Phase::Uncreated => {
                self.binding.connection.with(|connection| {
                    self.binding
                        .dialect
                        .create(connection, self.kind, &self.name, self.flavor)
                        .map_err(|source| StageError::storage("create", &self.name, source))
                })?;
                state.phase = Phase::Created;
                self.created.store(true, Ordering::Release);
                debug!(
                    "created {:?} staging table {} for {}",
                    self.flavor, self.name, self.kind
                );
                Ok(())
            }
        }
    }

    fn index_locked(&self, state: &mut TableState) -> Result<(), StageError> {
        if state.indexed {
            return Ok(());
        }
        self.binding.connection.with(|connection| {
            self.binding
                .dialect
                .create_indexes(connection, self.kind, &self.name, self.binding.index_hint)
                .map_err(|source| StageError::storage("index", &self.name, source))
        })?;
        state.indexed = true;
        Ok(())
    }

    fn adopt_created(&self) {
        let mut state = self.lock_state();
        state.phase = Phase::Created;
        self.created.store(true, Ordering::Release);
    }

    fn ensure_created(&self) -> Result<(), StageError> {
        match self.lock_state().phase {
            Phase::Created => Ok(()),
            Phase::Uncreated => Err(StageError::NotCreated {
                table: self.name.clone(),
            }),
            Phase::Dropped => Err(self.dropped()),
        }
    }

    fn dropped(&self) -> StageError {
        StageError::Dropped {
            table: self.name.clone(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
