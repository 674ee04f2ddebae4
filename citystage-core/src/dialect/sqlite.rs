//! `SQLite` rendition of the staging DDL.
//!
//! Ephemeral tables live in the connection's `temp` schema and vanish with
//! the connection; durable tables live in its `main` schema. `SQLite` has no
//! unlogged indexes, so [`IndexHint::Unlogged`] builds a regular index.

use rusqlite::Connection;

use super::{IndexHint, StorageFlavor, TableModelDialect, index_name};
use crate::model::ModelKind;
use crate::schema::ColumnType;

/// Dialect for `SQLite` main and scratch databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    const fn column_type(ty: ColumnType) -> &'static str {
        match ty {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Text => "TEXT",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
        }
    }

    fn create_statement(kind: ModelKind, table: &str, flavor: StorageFlavor) -> String {
        let columns = kind
            .schema()
            .columns
            .iter()
            .map(|column| format!("{} {}", column.name, Self::column_type(column.ty)))
            .collect::<Vec<_>>()
            .join(", ");
        let scope = match flavor {
            StorageFlavor::Ephemeral => "TEMP TABLE",
            StorageFlavor::Durable => "TABLE",
        };
        format!("CREATE {scope} \"{table}\" ({columns})")
    }
}

impl TableModelDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn create(
        &self,
        connection: &Connection,
        kind: ModelKind,
        table: &str,
        flavor: StorageFlavor,
    ) -> rusqlite::Result<()> {
        connection.execute(&Self::create_statement(kind, table, flavor), [])?;
        Ok(())
    }

    fn create_as_select_from(
        &self,
        connection: &Connection,
        kind: ModelKind,
        target: &str,
        source: &str,
    ) -> rusqlite::Result<()> {
        let columns = kind.schema().column_list();
        connection.execute(
            &format!("CREATE TEMP TABLE \"{target}\" AS SELECT {columns} FROM \"{source}\""),
            [],
        )?;
        Ok(())
    }

    fn create_indexes(
        &self,
        connection: &Connection,
        kind: ModelKind,
        table: &str,
        _hint: IndexHint,
    ) -> rusqlite::Result<()> {
        for (ordinal, index) in kind.schema().indexes.iter().enumerate() {
            let name = index_name(table, ordinal);
            let columns = index.columns.join(", ");
            connection.execute(&format!("CREATE INDEX \"{name}\" ON \"{table}\" ({columns})"), [])?;
        }
        Ok(())
    }

    fn truncate(&self, connection: &Connection, table: &str) -> rusqlite::Result<()> {
        connection.execute(&format!("DELETE FROM \"{table}\""), [])?;
        Ok(())
    }

    fn size(&self, connection: &Connection, table: &str) -> rusqlite::Result<u64> {
        let count: i64 =
            connection.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                row.get(0)
            })?;
        Ok(count.unsigned_abs())
    }

    fn drop_table(&self, connection: &Connection, table: &str) -> rusqlite::Result<()> {
        connection.execute(&format!("DROP TABLE IF EXISTS \"{table}\""), [])?;
        Ok(())
    }
}
