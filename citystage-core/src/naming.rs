//! Physical table names for staging relations.
//!
//! Names follow `tmp_<prefix>_<hex>`, where `<hex>` is drawn from a fresh
//! UUID v4. The hex part is cut so that the longest derived index name still
//! fits the backend's identifier limit.

use uuid::Uuid;

use crate::dialect::INDEX_SUFFIX_LEN;
use crate::error::StageError;
use crate::model::ModelKind;

const NAME_PREFIX: &str = "tmp_";

/// Fewest random hex digits accepted in a generated name.
pub const MIN_RANDOM_HEX: usize = 8;

/// Generate a fresh physical table name for `kind`.
///
/// # Errors
/// Returns [`StageError::IdentifierLimit`] when `max_identifier_len` leaves
/// fewer than [`MIN_RANDOM_HEX`] characters for the random part.
pub fn table_name(kind: ModelKind, max_identifier_len: usize) -> Result<String, StageError> {
    let fixed = NAME_PREFIX.len() + kind.table_prefix().len() + 1 + INDEX_SUFFIX_LEN;
    let budget = max_identifier_len.saturating_sub(fixed);
    if budget < MIN_RANDOM_HEX {
        return Err(StageError::IdentifierLimit {
            kind,
            limit: max_identifier_len,
        });
    }

    let mut buffer = Uuid::encode_buffer();
    let hex: &str = Uuid::new_v4().simple().encode_lower(&mut buffer);
    let random = hex.get(..budget).unwrap_or(hex);
    Ok(format!("{NAME_PREFIX}{}_{random}", kind.table_prefix()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DEFAULT_MAX_IDENTIFIER_LEN, index_name};
    use proptest::prelude::*;
    use rstest::rstest;
    use std::collections::HashSet;

    #[rstest]
    fn names_carry_kind_prefix() {
        let name = table_name(ModelKind::SurfaceGeometry, DEFAULT_MAX_IDENTIFIER_LEN)
            .expect("generate name");
        assert!(name.starts_with("tmp_sg_"), "unexpected name {name}");
    }

    #[rstest]
    fn index_names_fit_default_limit() {
        for kind in ModelKind::ALL {
            let name = table_name(kind, DEFAULT_MAX_IDENTIFIER_LEN).expect("generate name");
            for ordinal in 0..kind.schema().indexes.len() {
                assert!(index_name(&name, ordinal).len() <= DEFAULT_MAX_IDENTIFIER_LEN);
            }
        }
    }

    #[rstest]
    fn fifty_names_are_distinct() {
        let names: HashSet<_> = (0..50)
            .map(|_| table_name(ModelKind::LinearRing, DEFAULT_MAX_IDENTIFIER_LEN))
            .collect::<Result<_, _>>()
            .expect("generate names");
        assert_eq!(names.len(), 50);
    }

    #[rstest]
    #[case(0)]
    #[case(12)]
    fn tiny_limits_are_rejected(#[case] limit: usize) {
        let err = table_name(ModelKind::TextureParameter, limit).expect_err("limit too small");
        assert!(matches!(err, StageError::IdentifierLimit { limit: found, .. } if found == limit));
    }

    proptest! {
        #[test]
        fn generated_names_respect_any_workable_limit(limit in 22_usize..128) {
            for kind in ModelKind::ALL {
                if let Ok(name) = table_name(kind, limit) {
                    prop_assert!(name.len() + INDEX_SUFFIX_LEN <= limit);
                    prop_assert!(name.is_ascii());
                }
            }
        }
    }
}
