//! Instrumented dialect used by unit and behaviour tests.
//!
//! [`CountingDialect`] delegates to [`SqliteDialect`], counts every primitive
//! it executes and can be told to fail selected operations.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use rusqlite::Connection;

use crate::dialect::{IndexHint, SqliteDialect, StorageFlavor, TableModelDialect};
use crate::model::ModelKind;

/// Snapshot of the primitives a [`CountingDialect`] executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DialectCalls {
    /// Successful `create` calls.
    pub create: usize,
    /// Successful `create_as_select_from` calls.
    pub create_as_select: usize,
    /// Successful `create_indexes` calls.
    pub create_indexes: usize,
    /// Successful `truncate` calls.
    pub truncate: usize,
    /// `drop_table` attempts, including injected failures.
    pub drop_attempts: usize,
}

/// `SQLite` dialect wrapper that counts calls and injects failures.
#[derive(Debug, Default)]
pub struct CountingDialect {
    inner: SqliteDialect,
    create: AtomicUsize,
    create_as_select: AtomicUsize,
    create_indexes: AtomicUsize,
    truncate: AtomicUsize,
    drop_attempts: AtomicUsize,
    failing_creates: AtomicUsize,
    failing_drops: Mutex<HashSet<String>>,
    failing_truncates: Mutex<HashSet<String>>,
    create_delay: Mutex<Option<Duration>>,
}

impl CountingDialect {
    /// A dialect with no injected failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current call counts.
    #[must_use]
    pub fn calls(&self) -> DialectCalls {
        DialectCalls {
            create: self.create.load(Ordering::SeqCst),
            create_as_select: self.create_as_select.load(Ordering::SeqCst),
            create_indexes: self.create_indexes.load(Ordering::SeqCst),
            truncate: self.truncate.load(Ordering::SeqCst),
            drop_attempts: self.drop_attempts.load(Ordering::SeqCst),
        }
    }

    /// Make the next `count` calls to `create` fail.
    pub fn fail_next_creates(&self, count: usize) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    /// Make every `drop_table` of `table` fail.
    pub fn fail_drop_of(&self, table: &str) {
        self.failing_drops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_owned());
    }

    /// Make every `truncate` of `table` fail.
    pub fn fail_truncate_of(&self, table: &str) {
        self.failing_truncates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_owned());
    }

    /// Sleep inside every `create` so concurrent callers overlap.
    pub fn delay_creates(&self, delay: Duration) {
        *self
            .create_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    fn injected_failure(reason: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
            Some(format!("injected failure: {reason}")),
        )
    }

    fn take_create_failure(&self) -> bool {
        self.failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl TableModelDialect for CountingDialect {
    fn name(&self) -> &'static str {
        "sqlite-counting"
    }

    fn create(
        &self,
        connection: &Connection,
        kind: ModelKind,
        table: &str,
        flavor: StorageFlavor,
    ) -> rusqlite::Result<()> {
        let delay = *self
            .create_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if self.take_create_failure() {
            return Err(Self::injected_failure("create"));
        }
        self.inner.create(connection, kind, table, flavor)?;
        self.create.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_as_select_from(
        &self,
        connection: &Connection,
        kind: ModelKind,
        target: &str,
        source: &str,
    ) -> rusqlite::Result<()> {
        self.inner
            .create_as_select_from(connection, kind, target, source)?;
        self.create_as_select.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_indexes(
        &self,
        connection: &Connection,
        kind: ModelKind,
        table: &str,
        hint: IndexHint,
    ) -> rusqlite::Result<()> {
        self.inner.create_indexes(connection, kind, table, hint)?;
        self.create_indexes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn truncate(&self, connection: &Connection, table: &str) -> rusqlite::Result<()> {
        let failing = self
            .failing_truncates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table);
        if failing {
            return Err(Self::injected_failure("truncate"));
        }
        self.inner.truncate(connection, table)?;
        self.truncate.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn size(&self, connection: &Connection, table: &str) -> rusqlite::Result<u64> {
        self.inner.size(connection, table)
    }

    fn drop_table(&self, connection: &Connection, table: &str) -> rusqlite::Result<()> {
        self.drop_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_drops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table);
        if failing {
            return Err(Self::injected_failure("drop"));
        }
        self.inner.drop_table(connection, table)
    }
}
