//! Behavioural tests for `CacheRegistry` using rstest-bdd.

use std::{cell::RefCell, sync::Arc};

use camino::Utf8PathBuf;
use citystage_cache::{CacheConfig, CacheRegistry, CacheTable, TableSummary};
use citystage_core::{ModelKind, StageError};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

/// Shared state for registry scenarios.
struct RegistryWorld {
    temp_dir: TempDir,
    registry: RefCell<Option<CacheRegistry>>,
    table: RefCell<Option<Arc<CacheTable>>>,
    scratch_dir: RefCell<Option<Utf8PathBuf>>,
    error: RefCell<Option<StageError>>,
}

impl RegistryWorld {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("create temp dir"),
            registry: RefCell::new(None),
            table: RefCell::new(None),
            scratch_dir: RefCell::new(None),
            error: RefCell::new(None),
        }
    }

    fn cache_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.temp_dir.path().join("cache")).expect("utf-8 temp dir")
    }

    fn with_registry<T>(&self, f: impl FnOnce(&CacheRegistry) -> T) -> T {
        let borrowed = self.registry.borrow();
        let registry = borrowed.as_ref().expect("registry should be open");
        f(registry)
    }

    fn table(&self) -> Arc<CacheTable> {
        self.table
            .borrow()
            .as_ref()
            .cloned()
            .expect("a table should be staged")
    }
}

#[fixture]
fn world() -> RegistryWorld {
    RegistryWorld::new()
}

#[given("a staging registry on a private scratch database")]
fn given_registry(world: &RegistryWorld) {
    let config = CacheConfig {
        local_cache_dir: world.cache_root(),
        ..CacheConfig::default()
    };
    let registry = CacheRegistry::open(config).expect("open registry");
    world
        .scratch_dir
        .replace(registry.temp_dir().map(ToOwned::to_owned));
    world.registry.replace(Some(registry));
}

#[when("I stage 1000 surface geometries in an indexed table")]
fn stage_surface_geometries(world: &RegistryWorld) {
    let table = world.with_registry(|registry| {
        registry
            .get_or_create_indexed(ModelKind::SurfaceGeometry)
            .expect("create table")
    });
    table
        .with_connection(|connection, name| {
            let mut statement = connection.prepare(&format!(
                "INSERT INTO \"{name}\" (id, parent_id, root_id, gmlid) VALUES (?1, ?2, ?2, ?3)"
            ))?;
            for id in 0..1000_i64 {
                statement.execute((id, id + 1, format!("sg-{id}")))?;
            }
            Ok(())
        })
        .expect("insert rows");
    world.table.replace(Some(table));
}

#[when("the registry is torn down")]
fn tear_down(world: &RegistryWorld) {
    let report = world.with_registry(CacheRegistry::drop_all);
    assert!(report.is_clean(), "unexpected failures: {:?}", report.failures());
}

#[when("I open a texture parameter branch group with 3 branches")]
fn open_branch_group(world: &RegistryWorld) {
    world.with_registry(|registry| {
        let group = registry
            .get_or_create_branch_group(ModelKind::TextureParameter)
            .expect("create group");
        for _ in 0..3 {
            let branch = group.branch().expect("branch");
            assert!(branch.is_some(), "main table should exist");
        }
    });
}

#[then("the table and its snapshot each hold 1000 rows")]
fn table_and_snapshot_sizes(world: &RegistryWorld) {
    let table = world.table();
    assert_eq!(table.size().expect("size"), 1000);
    let snapshot = table
        .derive_snapshot()
        .expect("derive snapshot")
        .expect("table was created");
    assert_eq!(snapshot.size().expect("snapshot size"), 1000);
    assert!(snapshot.is_indexed());
}

#[then("tearing down the registry removes the scratch directory")]
fn teardown_removes_directory(world: &RegistryWorld) {
    let dir = world
        .scratch_dir
        .borrow()
        .clone()
        .expect("scratch mode has a directory");
    assert!(dir.exists());

    let report = world.with_registry(CacheRegistry::drop_all);

    assert!(report.is_clean(), "unexpected failures: {:?}", report.failures());
    assert!(!dir.exists(), "scratch directory {dir} should be gone");
    for kind in [ModelKind::SurfaceGeometry, ModelKind::TextureParameter] {
        assert!(!world.with_registry(|registry| registry.exists(kind)));
    }
}

#[then("requesting a linear ring table fails because the registry is closed")]
fn closed_registry_rejects_requests(world: &RegistryWorld) {
    let err = world
        .with_registry(|registry| registry.get_or_create(ModelKind::LinearRing))
        .expect_err("registry is closed");
    assert!(err.is_contract_violation());
    world.error.replace(Some(err));
    assert!(matches!(
        world.error.borrow().as_ref(),
        Some(StageError::RegistryClosed)
    ));
}

#[then("the summary lists one group with 3 branches")]
fn summary_lists_group(world: &RegistryWorld) {
    let summary: Vec<TableSummary> = world
        .with_registry(CacheRegistry::summary)
        .expect("summarise registry");
    assert_eq!(summary.len(), 1);
    let row = summary.first().expect("group row");
    assert_eq!(row.kind, ModelKind::TextureParameter);
    assert!(row.grouped);
    assert_eq!(row.branches, 3);
    assert_eq!(row.rows, Some(0));
}

#[scenario(path = "tests/features/registry_lifecycle.feature", index = 0)]
fn staging_round_trip(world: RegistryWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/registry_lifecycle.feature", index = 1)]
fn closed_registry(world: RegistryWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/registry_lifecycle.feature", index = 2)]
fn branch_group_summary(world: RegistryWorld) {
    let _ = world;
}
