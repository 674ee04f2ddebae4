//! Per-kind staging decisions.

use std::collections::BTreeSet;
use std::fmt;

use citystage_core::{ModelKind, StorageFlavor};

use crate::config::CacheConfig;

/// Decides how each kind is staged.
pub trait StagingPolicy: fmt::Debug + Send + Sync {
    /// Storage flavor for tables and groups of `kind`.
    fn flavor_for(&self, kind: ModelKind) -> StorageFlavor;

    /// Whether `kind` must live in the main database even in scratch mode.
    fn requires_main_database(&self, kind: ModelKind) -> bool;
}

/// Policy built from [`CacheConfig`] kind lists.
///
/// Main-database kinds are always durable. Listed ephemeral kinds are
/// ephemeral; everything else is durable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPolicy {
    ephemeral: BTreeSet<ModelKind>,
    main_database: BTreeSet<ModelKind>,
}

impl ConfigPolicy {
    /// Read the kind lists of `config`.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            ephemeral: config.ephemeral_kinds.iter().copied().collect(),
            main_database: config.main_database_kinds.iter().copied().collect(),
        }
    }
}

impl StagingPolicy for ConfigPolicy {
    fn flavor_for(&self, kind: ModelKind) -> StorageFlavor {
        if !self.main_database.contains(&kind) && self.ephemeral.contains(&kind) {
            StorageFlavor::Ephemeral
        } else {
            StorageFlavor::Durable
        }
    }

    fn requires_main_database(&self, kind: ModelKind) -> bool {
        self.main_database.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> ConfigPolicy {
        ConfigPolicy::from_config(&CacheConfig {
            ephemeral_kinds: vec![ModelKind::Basic, ModelKind::GlobalAppearance],
            main_database_kinds: vec![ModelKind::GlobalAppearance],
            ..CacheConfig::default()
        })
    }

    #[rstest]
    #[case(ModelKind::Basic, StorageFlavor::Ephemeral, false)]
    #[case(ModelKind::SurfaceGeometry, StorageFlavor::Durable, false)]
    #[case(ModelKind::GlobalAppearance, StorageFlavor::Durable, true)]
    fn kind_lists_drive_decisions(
        #[case] kind: ModelKind,
        #[case] flavor: StorageFlavor,
        #[case] main_database: bool,
    ) {
        let policy = policy();
        assert_eq!(policy.flavor_for(kind), flavor);
        assert_eq!(policy.requires_main_database(kind), main_database);
    }

    #[rstest]
    fn default_policy_is_all_durable_and_scratch_only() {
        let policy = ConfigPolicy::default();
        for kind in ModelKind::ALL {
            assert_eq!(policy.flavor_for(kind), StorageFlavor::Durable);
            assert!(!policy.requires_main_database(kind));
        }
    }
}
