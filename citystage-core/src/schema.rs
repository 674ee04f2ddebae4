//! Backend-neutral descriptions of staging-table shapes.
//!
//! Descriptors are plain `'static` data. Dialects translate them into DDL;
//! nothing here knows about a particular SQL engine.

/// Logical column type understood by every dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Signed 64-bit integer (database identifiers, counters).
    Integer,
    /// Variable-length character data (gml:ids, URIs, serialised values).
    Text,
    /// Double-precision floating point.
    Real,
    /// Opaque binary payload.
    Blob,
    /// Two-valued flag.
    Boolean,
}

/// A single column of a staging table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Column name, lower case.
    pub name: &'static str,
    /// Logical type of the column.
    pub ty: ColumnType,
}

impl Column {
    /// Describe a column.
    #[must_use]
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty }
    }
}

/// A secondary index over one or more columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    /// Indexed columns in key order.
    pub columns: &'static [&'static str],
}

/// Complete shape of one model kind's staging table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    /// Short prefix embedded in physical table names.
    pub prefix: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [Column],
    /// Index set built by `create_indexes`.
    pub indexes: &'static [IndexDef],
}

impl TableSchema {
    #[cfg(test)]
    pub(crate) fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Comma-separated column names, in declaration order.
    #[must_use]
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|column| column.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
