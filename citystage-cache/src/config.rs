//! Settings that drive backend selection and per-kind staging choices.

use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use citystage_core::{IndexHint, ModelKind};

/// Default busy timeout applied to every opened connection.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Configuration of one staging registry.
///
/// Every field has a default so partial documents deserialise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Stage inside the main database instead of a private scratch database.
    pub use_database: bool,
    /// Parent of the per-run scratch directory.
    pub local_cache_dir: Utf8PathBuf,
    /// Main database file. Required when `use_database` is set or when
    /// `main_database_kinds` is non-empty.
    pub main_database: Option<Utf8PathBuf>,
    /// Kinds that must be visible in the main database even in scratch mode.
    pub main_database_kinds: Vec<ModelKind>,
    /// Kinds staged as ephemeral tables; every other kind is durable.
    pub ephemeral_kinds: Vec<ModelKind>,
    /// Ask the dialect for unlogged indexes where it supports them.
    pub unlogged_indexes: bool,
    /// Busy timeout, in milliseconds, for every opened connection.
    pub busy_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_database: false,
            local_cache_dir: default_cache_dir(),
            main_database: None,
            main_database_kinds: Vec::new(),
            ephemeral_kinds: Vec::new(),
            unlogged_indexes: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl CacheConfig {
    /// Index mode passed to the dialect.
    #[must_use]
    pub const fn index_hint(&self) -> IndexHint {
        if self.unlogged_indexes {
            IndexHint::Unlogged
        } else {
            IndexHint::Logged
        }
    }

    /// Busy timeout as a [`Duration`].
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// `<system temp>/citystage`, or `./citystage` when the temp dir is not UTF-8.
fn default_cache_dir() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("."))
        .join("citystage")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn partial_documents_fill_defaults() {
        let config: CacheConfig = serde_json::from_str(
            r#"{"use_database": true, "ephemeral_kinds": ["surface_geometry", "basic"]}"#,
        )
        .expect("parse config");

        assert!(config.use_database);
        assert_eq!(
            config.ephemeral_kinds,
            vec![ModelKind::SurfaceGeometry, ModelKind::Basic]
        );
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert!(config.local_cache_dir.ends_with("citystage"));
    }

    #[rstest]
    #[case(false, IndexHint::Logged)]
    #[case(true, IndexHint::Unlogged)]
    fn index_hint_follows_flag(#[case] unlogged: bool, #[case] expected: IndexHint) {
        let config = CacheConfig {
            unlogged_indexes: unlogged,
            ..CacheConfig::default()
        };
        assert_eq!(config.index_hint(), expected);
    }

    #[rstest]
    fn unknown_kind_is_rejected() {
        let result = serde_json::from_str::<CacheConfig>(r#"{"ephemeral_kinds": ["nope"]}"#);
        assert!(result.is_err());
    }
}
