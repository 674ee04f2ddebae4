//! Probe command implementation for the Citystage CLI.
//!
//! The probe opens a registry from merged configuration, stages synthetic
//! rows for one model kind in an indexed branch group, derives a snapshot of
//! the main table when it is durable, prints a JSON report and tears the
//! registry down again.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use citystage_cache::config::DEFAULT_BUSY_TIMEOUT_MS;
use citystage_cache::{BackendKind, CacheConfig, CacheRegistry, CacheTable, TableSummary};
use citystage_core::{ColumnType, ModelKind, StageError, StorageFlavor};

use crate::{
    ARG_BRANCHES, ARG_BUSY_TIMEOUT_MS, ARG_EPHEMERAL, ARG_KIND, ARG_LOCAL_CACHE_DIR,
    ARG_MAIN_DATABASE, ARG_MAIN_DATABASE_VISIBLE, ARG_ROWS, ARG_UNLOGGED_INDEXES,
    ARG_USE_DATABASE, CliError, ENV_MAIN_DATABASE,
};

const DEFAULT_ROWS: u32 = 1_000;
const DEFAULT_BRANCHES: u32 = 2;

/// CLI arguments for the `probe` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Stage synthetic rows for one model kind in an indexed branch \
                 group, snapshot the main table and print what the staging \
                 cache created. Settings can come from CLI flags, \
                 configuration files, or CITYSTAGE_* environment variables.",
    about = "Exercise the staging cache with synthetic rows"
)]
#[ortho_config(prefix = "CITYSTAGE")]
pub(crate) struct ProbeArgs {
    /// Model kind to stage, e.g. `surface_geometry`.
    #[arg(long = ARG_KIND, value_name = "kind")]
    #[serde(default)]
    pub(crate) kind: Option<ModelKind>,
    /// Rows written to the main table and to every branch.
    #[arg(long = ARG_ROWS, value_name = "count")]
    #[serde(default)]
    pub(crate) rows: Option<u32>,
    /// Branches opened next to the main table.
    #[arg(long = ARG_BRANCHES, value_name = "count")]
    #[serde(default)]
    pub(crate) branches: Option<u32>,
    /// Stage inside the main database instead of a private scratch database.
    #[arg(long = ARG_USE_DATABASE, value_name = "bool")]
    #[serde(default)]
    pub(crate) use_database: Option<bool>,
    /// Parent directory of the per-run scratch directory.
    #[arg(long = ARG_LOCAL_CACHE_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) local_cache_dir: Option<Utf8PathBuf>,
    /// Main database file.
    #[arg(long = ARG_MAIN_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) main_database: Option<Utf8PathBuf>,
    /// Stage the kind as ephemeral tables.
    #[arg(long = ARG_EPHEMERAL, value_name = "bool")]
    #[serde(default)]
    pub(crate) ephemeral: Option<bool>,
    /// Keep the kind visible in the main database even in scratch mode.
    #[arg(long = ARG_MAIN_DATABASE_VISIBLE, value_name = "bool")]
    #[serde(default)]
    pub(crate) main_database_visible: Option<bool>,
    /// Request unlogged indexes where the backend supports them.
    #[arg(long = ARG_UNLOGGED_INDEXES, value_name = "bool")]
    #[serde(default)]
    pub(crate) unlogged_indexes: Option<bool>,
    /// Busy timeout for every opened connection, in milliseconds.
    #[arg(long = ARG_BUSY_TIMEOUT_MS, value_name = "ms")]
    #[serde(default)]
    pub(crate) busy_timeout_ms: Option<u64>,
}

impl ProbeArgs {
    pub(crate) fn into_config(self) -> Result<ProbeConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ProbeConfig::try_from(merged)
    }
}

/// Resolved `probe` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProbeConfig {
    /// Registry configuration.
    pub(crate) cache: CacheConfig,
    /// Kind to stage.
    pub(crate) kind: ModelKind,
    /// Rows per table.
    pub(crate) rows: u32,
    /// Branches to open.
    pub(crate) branches: u32,
}

impl TryFrom<ProbeArgs> for ProbeConfig {
    type Error = CliError;

    fn try_from(args: ProbeArgs) -> Result<Self, Self::Error> {
        let kind = args.kind.unwrap_or(ModelKind::SurfaceGeometry);
        let use_database = args.use_database.unwrap_or(false);
        let main_database_visible = args.main_database_visible.unwrap_or(false);
        if (use_database || main_database_visible) && args.main_database.is_none() {
            return Err(CliError::MissingArgument {
                field: ARG_MAIN_DATABASE,
                env: ENV_MAIN_DATABASE,
            });
        }

        let cache = CacheConfig {
            use_database,
            local_cache_dir: args
                .local_cache_dir
                .unwrap_or_else(|| CacheConfig::default().local_cache_dir),
            main_database: args.main_database,
            main_database_kinds: if main_database_visible {
                vec![kind]
            } else {
                Vec::new()
            },
            ephemeral_kinds: if args.ephemeral.unwrap_or(false) {
                vec![kind]
            } else {
                Vec::new()
            },
            unlogged_indexes: args.unlogged_indexes.unwrap_or(false),
            busy_timeout_ms: args.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
        };
        Ok(Self {
            cache,
            kind,
            rows: args.rows.unwrap_or(DEFAULT_ROWS),
            branches: args.branches.unwrap_or(DEFAULT_BRANCHES),
        })
    }
}

/// What a probe run staged, captured before teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ProbeReport {
    /// Backend the registry selected.
    pub(crate) backend: BackendKind,
    /// Kind that was staged.
    pub(crate) kind: ModelKind,
    /// Flavor the policy chose for the kind.
    pub(crate) flavor: StorageFlavor,
    /// Rows written across the main table and all branches.
    pub(crate) rows_staged: u64,
    /// Rows in the derived snapshot; absent for ephemeral tables.
    pub(crate) snapshot_rows: Option<u64>,
    /// Registry summary.
    pub(crate) tables: Vec<TableSummary>,
}

pub(crate) fn run_probe(args: ProbeArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    run_probe_with(args, &mut stdout)
}

pub(crate) fn run_probe_with(args: ProbeArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    let report = execute_probe(&config)?;
    write_report(writer, &report)
}

/// Stage, summarise and tear down. Teardown runs even when staging failed;
/// the staging error wins.
pub(crate) fn execute_probe(config: &ProbeConfig) -> Result<ProbeReport, CliError> {
    let registry = CacheRegistry::open(config.cache.clone())?;
    let outcome = stage(&registry, config);
    let teardown = registry.drop_all();
    let report = outcome?;

    let failures = teardown.failures().len();
    teardown
        .into_result()
        .map_err(|source| CliError::Teardown {
            failures,
            source: Box::new(source),
        })?;
    Ok(report)
}

fn stage(registry: &CacheRegistry, config: &ProbeConfig) -> Result<ProbeReport, StageError> {
    let group = registry.get_or_create_indexed_branch_group(config.kind)?;
    let main = group.main_table();
    let mut rows_staged = insert_synthetic_rows(&main, config.rows, 0)?;
    for batch in 1..=config.branches {
        let Some(branch) = group.branch_with_indexes()? else {
            break;
        };
        rows_staged += insert_synthetic_rows(&branch, config.rows, batch)?;
    }

    let snapshot_rows = match main.flavor() {
        StorageFlavor::Durable => main
            .derive_snapshot()?
            .map(|snapshot| snapshot.size())
            .transpose()?,
        StorageFlavor::Ephemeral => None,
    };

    Ok(ProbeReport {
        backend: registry.backend(),
        kind: config.kind,
        flavor: main.flavor(),
        rows_staged,
        snapshot_rows,
        tables: registry.summary()?,
    })
}

fn insert_synthetic_rows(table: &CacheTable, rows: u32, batch: u32) -> Result<u64, StageError> {
    let schema = table.kind().schema();
    let columns = schema.column_list();
    let placeholders = (1..=schema.columns.len())
        .map(|position| format!("?{position}"))
        .collect::<Vec<_>>()
        .join(", ");

    table.with_connection(|connection, name| {
        let transaction = connection.unchecked_transaction()?;
        {
            let mut statement = transaction.prepare(&format!(
                "INSERT INTO \"{name}\" ({columns}) VALUES ({placeholders})"
            ))?;
            for row in 0..rows {
                let values = schema
                    .columns
                    .iter()
                    .map(|column| synthetic_value(column.ty, column.name, batch, row));
                statement.execute(rusqlite::params_from_iter(values))?;
            }
        }
        transaction.commit()?;
        Ok(u64::from(rows))
    })
}

fn synthetic_value(ty: ColumnType, column: &str, batch: u32, row: u32) -> Value {
    match ty {
        ColumnType::Integer => Value::Integer(i64::from(row)),
        ColumnType::Boolean => Value::Integer(i64::from(row & 1)),
        ColumnType::Real => Value::Real(f64::from(row)),
        ColumnType::Text => Value::Text(format!("{column}-{batch}-{row}")),
        ColumnType::Blob => Value::Blob(format!("{batch}:{row}").into_bytes()),
    }
}

fn write_report(writer: &mut dyn Write, report: &ProbeReport) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(report).map_err(CliError::SerialiseReport)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteOutput)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<ProbeConfig, CliError> {
    let merged = ProbeArgs::merge_from_layers(layers).map_err(CliError::from)?;
    ProbeConfig::try_from(merged)
}
