//! Groups of same-kind tables: one main table plus branches.
//!
//! Branches let concurrent writers spill rows of one kind into separate
//! relations. The group owns every member; members cannot be dropped alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use citystage_core::{ConnectionOwnership, ModelKind, StageError, StorageFlavor};

use crate::table::{CacheTable, TableBinding};
use crate::teardown::{finish, keep_first};

/// A main table and zero or more branches sharing one kind and connection.
#[derive(Debug)]
pub struct BranchGroup {
    kind: ModelKind,
    flavor: StorageFlavor,
    binding: TableBinding,
    ownership: ConnectionOwnership,
    main: Arc<CacheTable>,
    branches: Mutex<Vec<Arc<CacheTable>>>,
    dropped: AtomicBool,
}

impl BranchGroup {
    /// A group whose main table is not yet created.
    ///
    /// With [`ConnectionOwnership::Owned`] the group closes the connection
    /// after dropping its members.
    ///
    /// # Errors
    /// Returns [`StageError::IdentifierLimit`] when no unique name fits.
    pub fn new(
        kind: ModelKind,
        flavor: StorageFlavor,
        binding: TableBinding,
        ownership: ConnectionOwnership,
    ) -> Result<Self, StageError> {
        let main = CacheTable::member(kind, flavor, binding.clone())?;
        Ok(Self {
            kind,
            flavor,
            binding,
            ownership,
            main: Arc::new(main),
            branches: Mutex::new(Vec::new()),
            dropped: AtomicBool::new(false),
        })
    }

    /// Model kind shared by every member.
    #[must_use]
    pub const fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Whether the main table exists.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.main.is_created()
    }

    /// Create the main table.
    ///
    /// # Errors
    /// See [`CacheTable::create`].
    pub fn create(&self) -> Result<(), StageError> {
        self.ensure_live()?;
        self.main.create()
    }

    /// Create the main table and its indexes.
    ///
    /// # Errors
    /// See [`CacheTable::create_with_indexes`].
    pub fn create_with_indexes(&self) -> Result<(), StageError> {
        self.ensure_live()?;
        self.main.create_with_indexes()
    }

    /// The main member.
    #[must_use]
    pub fn main_table(&self) -> Arc<CacheTable> {
        Arc::clone(&self.main)
    }

    /// Add a created branch, or `None` while the main table is uncreated.
    ///
    /// # Errors
    /// Returns [`StageError::Dropped`] after [`Self::drop_group`], or the storage
    /// error of the create statement.
    pub fn branch(&self) -> Result<Option<Arc<CacheTable>>, StageError> {
        self.add_branch(false)
    }

    /// Like [`Self::branch`], with the kind's indexes built on the branch.
    ///
    /// # Errors
    /// See [`Self::branch`].
    pub fn branch_with_indexes(&self) -> Result<Option<Arc<CacheTable>>, StageError> {
        self.add_branch(true)
    }

    /// Branches in creation order.
    #[must_use]
    pub fn branch_tables(&self) -> Vec<Arc<CacheTable>> {
        self.lock_branches().clone()
    }

    /// Number of branches created so far.
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.lock_branches().len()
    }

    /// Drop the main table, every branch and, when owned, the connection.
    ///
    /// Every member is attempted even if earlier drops fail; the first
    /// failure is returned. A second call is a no-op.
    ///
    /// # Errors
    /// Returns the first failure of the drop sequence.
    pub fn drop_group(&self) -> Result<(), StageError> {
        let branches = {
            let mut guard = self.lock_branches();
            if self.dropped.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            std::mem::take(&mut *guard)
        };

        let mut first = None;
        keep_first(&mut first, self.main.table_name(), self.main.drop_member());
        for branch in &branches {
            keep_first(&mut first, branch.table_name(), branch.drop_member());
        }
        if self.ownership == ConnectionOwnership::Owned {
            keep_first(
                &mut first,
                self.binding.connection.label(),
                self.binding.connection.close().map(|_| ()),
            );
        }
        debug!(
            "dropped {} branch group with {} branches",
            self.kind,
            branches.len()
        );
        finish(first)
    }

    fn add_branch(&self, indexed: bool) -> Result<Option<Arc<CacheTable>>, StageError> {
        self.ensure_live()?;
        if !self.main.is_created() {
            return Ok(None);
        }

        let branch = Arc::new(CacheTable::member(
            self.kind,
            self.flavor,
            self.binding.clone(),
        )?);
        if indexed {
            branch.create_with_indexes()?;
        } else {
            branch.create()?;
        }

        let mut guard = self.lock_branches();
        if self.dropped.load(Ordering::Acquire) {
            drop(guard);
            branch.drop_member()?;
            return Err(self.dropped_error());
        }
        guard.push(Arc::clone(&branch));
        Ok(Some(branch))
    }

    fn ensure_live(&self) -> Result<(), StageError> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(self.dropped_error());
        }
        Ok(())
    }

    fn dropped_error(&self) -> StageError {
        StageError::Dropped {
            table: self.main.table_name().to_owned(),
        }
    }

    fn lock_branches(&self) -> MutexGuard<'_, Vec<Arc<CacheTable>>> {
        self.branches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
