//! Focused unit tests covering probe configuration and execution.

use super::*;
use crate::probe::{
    ProbeArgs, ProbeConfig, config_from_layers_for_test, execute_probe, run_probe_with,
};
use camino::Utf8PathBuf;
use citystage_cache::BackendKind;
use citystage_core::{ModelKind, StorageFlavor};
use ortho_config::MergeComposer;
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn cache_dir(&self) -> Utf8PathBuf {
        self.root.join("cache")
    }

    fn args(&self) -> ProbeArgs {
        ProbeArgs {
            rows: Some(20),
            branches: Some(2),
            local_cache_dir: Some(self.cache_dir()),
            ..ProbeArgs::default()
        }
    }

    fn leftover_entries(&self) -> usize {
        std::fs::read_dir(self.cache_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

#[fixture]
fn workspace() -> Workspace {
    let dir = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
    Workspace { _dir: dir, root }
}

#[rstest]
fn defaults_fill_unset_fields() {
    let config = ProbeConfig::try_from(ProbeArgs::default()).expect("defaults resolve");
    assert_eq!(config.kind, ModelKind::SurfaceGeometry);
    assert_eq!(config.rows, 1_000);
    assert_eq!(config.branches, 2);
    assert!(!config.cache.use_database);
    assert!(config.cache.ephemeral_kinds.is_empty());
}

#[rstest]
#[case::database_mode(Some(true), None)]
#[case::main_database_visible(None, Some(true))]
fn main_database_is_required_when_used(
    #[case] use_database: Option<bool>,
    #[case] main_database_visible: Option<bool>,
) {
    let args = ProbeArgs {
        use_database,
        main_database_visible,
        ..ProbeArgs::default()
    };
    let err = ProbeConfig::try_from(args).expect_err("missing main database");
    match err {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_MAIN_DATABASE);
            assert_eq!(env, ENV_MAIN_DATABASE);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn kind_flags_populate_policy_lists() {
    let args = ProbeArgs {
        kind: Some(ModelKind::LinearRing),
        ephemeral: Some(true),
        main_database_visible: Some(true),
        main_database: Some(Utf8PathBuf::from("main.db")),
        ..ProbeArgs::default()
    };
    let config = ProbeConfig::try_from(args).expect("config resolves");
    assert_eq!(config.cache.ephemeral_kinds, vec![ModelKind::LinearRing]);
    assert_eq!(config.cache.main_database_kinds, vec![ModelKind::LinearRing]);
}

#[rstest]
fn merge_layers_maps_configuration_errors() {
    let mut composer = MergeComposer::new();
    composer.push_cli(json!({ "rows": "many" }));

    let err = config_from_layers_for_test(composer.layers())
        .expect_err("invalid config layer should map to CliError::Configuration");
    match err {
        CliError::Configuration(_) => {}
        other => panic!("expected CliError::Configuration, found {other:?}"),
    }
}

#[rstest]
fn merge_layers_honours_precedence() {
    let mut composer = MergeComposer::new();
    composer.push_file(json!({ "rows": 5, "branches": 4, "kind": "basic" }), None);
    composer.push_environment(json!({ "kind": "linear_ring", "busy_timeout_ms": 250 }));
    composer.push_cli(json!({ "branches": 1 }));

    let config = config_from_layers_for_test(composer.layers()).expect("merged config");
    assert_eq!(config.kind, ModelKind::LinearRing);
    assert_eq!(config.rows, 5);
    assert_eq!(config.branches, 1);
    assert_eq!(config.cache.busy_timeout_ms, 250);
}

#[rstest]
fn probe_stages_snapshots_and_cleans_up(workspace: Workspace) {
    let config = ProbeConfig::try_from(workspace.args()).expect("config resolves");

    let report = execute_probe(&config).expect("probe succeeds");

    assert_eq!(report.backend, BackendKind::EmbeddedScratch);
    assert_eq!(report.flavor, StorageFlavor::Durable);
    assert_eq!(report.rows_staged, 60);
    assert_eq!(report.snapshot_rows, Some(20));
    let group = report.tables.first().expect("group summary");
    assert!(group.grouped && group.indexed);
    assert_eq!(group.branches, 2);
    assert_eq!(workspace.leftover_entries(), 0);
}

#[rstest]
fn ephemeral_probe_skips_snapshot(workspace: Workspace) {
    let args = ProbeArgs {
        kind: Some(ModelKind::TextureAssociation),
        ephemeral: Some(true),
        ..workspace.args()
    };
    let config = ProbeConfig::try_from(args).expect("config resolves");

    let report = execute_probe(&config).expect("probe succeeds");

    assert_eq!(report.flavor, StorageFlavor::Ephemeral);
    assert_eq!(report.snapshot_rows, None);
    assert_eq!(report.rows_staged, 60);
}

#[rstest]
fn database_probe_uses_main_database(workspace: Workspace) {
    let args = ProbeArgs {
        use_database: Some(true),
        main_database: Some(workspace.root.join("main.db")),
        branches: Some(1),
        ..workspace.args()
    };
    let config = ProbeConfig::try_from(args).expect("config resolves");

    let report = execute_probe(&config).expect("probe succeeds");

    assert_eq!(report.backend, BackendKind::MainDatabase);
    assert_eq!(report.rows_staged, 40);
    assert_eq!(workspace.leftover_entries(), 0);
}

#[rstest]
fn probe_writes_json_report(workspace: Workspace) {
    let mut output = Vec::new();
    let args = ProbeArgs {
        kind: Some(ModelKind::Basic),
        ..workspace.args()
    };

    run_probe_with(args, &mut output).expect("probe succeeds");

    let value: serde_json::Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(value.get("backend"), Some(&json!("embedded_scratch")));
    assert_eq!(value.get("kind"), Some(&json!("basic")));
    assert_eq!(value.pointer("/tables/0/branches"), Some(&json!(2)));
}
