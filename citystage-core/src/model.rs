//! The closed catalog of staging-table kinds.
//!
//! Each [`ModelKind`] maps to exactly one static [`TableSchema`]. The mapping
//! is a `match`, so adding a kind without a schema fails to compile.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::schema::{Column, ColumnType, IndexDef, TableSchema};

/// Category of deferred fact recorded during import or export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ModelKind {
    /// gml:id to database id lookup for top-level features.
    FeatureIdLookup,
    /// gml:id to database id lookup for geometries.
    GeometryIdLookup,
    /// Nested surface geometries waiting for their parents.
    SurfaceGeometry,
    /// Linear rings referenced by texture coordinates.
    LinearRing,
    /// Texture associations keyed by target URI.
    TextureAssociation,
    /// Surface-data to surface-geometry targets of texture associations.
    TextureAssociationTarget,
    /// Texture parameterisations awaiting their target geometry.
    TextureParameter,
    /// Texture coordinate lists awaiting their rings.
    TextureCoordinateList,
    /// Membership of city objects in groups.
    GroupMembership,
    /// Shared library objects of implicit geometries.
    LibraryObject,
    /// Texture image files to copy or export.
    TextureFile,
    /// Materials from deprecated appearance encodings.
    DeprecatedMaterial,
    /// Global appearances resolved after all features are known.
    GlobalAppearance,
    /// Generic key/value staging.
    Basic,
}

impl ModelKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::FeatureIdLookup,
        Self::GeometryIdLookup,
        Self::SurfaceGeometry,
        Self::LinearRing,
        Self::TextureAssociation,
        Self::TextureAssociationTarget,
        Self::TextureParameter,
        Self::TextureCoordinateList,
        Self::GroupMembership,
        Self::LibraryObject,
        Self::TextureFile,
        Self::DeprecatedMaterial,
        Self::GlobalAppearance,
        Self::Basic,
    ];

    /// Stable snake-case name used in configuration and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FeatureIdLookup => "feature_id_lookup",
            Self::GeometryIdLookup => "geometry_id_lookup",
            Self::SurfaceGeometry => "surface_geometry",
            Self::LinearRing => "linear_ring",
            Self::TextureAssociation => "texture_association",
            Self::TextureAssociationTarget => "texture_association_target",
            Self::TextureParameter => "texture_parameter",
            Self::TextureCoordinateList => "texture_coordinate_list",
            Self::GroupMembership => "group_membership",
            Self::LibraryObject => "library_object",
            Self::TextureFile => "texture_file",
            Self::DeprecatedMaterial => "deprecated_material",
            Self::GlobalAppearance => "global_appearance",
            Self::Basic => "basic",
        }
    }

    /// The immutable schema for this kind.
    #[must_use]
    pub const fn schema(self) -> &'static TableSchema {
        match self {
            Self::FeatureIdLookup => &FEATURE_ID_LOOKUP,
            Self::GeometryIdLookup => &GEOMETRY_ID_LOOKUP,
            Self::SurfaceGeometry => &SURFACE_GEOMETRY,
            Self::LinearRing => &LINEAR_RING,
            Self::TextureAssociation => &TEXTURE_ASSOCIATION,
            Self::TextureAssociationTarget => &TEXTURE_ASSOCIATION_TARGET,
            Self::TextureParameter => &TEXTURE_PARAMETER,
            Self::TextureCoordinateList => &TEXTURE_COORDINATE_LIST,
            Self::GroupMembership => &GROUP_MEMBERSHIP,
            Self::LibraryObject => &LIBRARY_OBJECT,
            Self::TextureFile => &TEXTURE_FILE,
            Self::DeprecatedMaterial => &DEPRECATED_MATERIAL,
            Self::GlobalAppearance => &GLOBAL_APPEARANCE,
            Self::Basic => &BASIC,
        }
    }

    /// Short prefix embedded in physical table names.
    #[must_use]
    pub const fn table_prefix(self) -> &'static str {
        self.schema().prefix
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown model kind name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown staging model kind {name:?}")]
pub struct UnknownModelKind {
    /// The rejected input.
    pub name: String,
}

impl FromStr for ModelKind {
    type Err = UnknownModelKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| UnknownModelKind { name: s.to_owned() })
    }
}

const fn int(name: &'static str) -> Column {
    Column::new(name, ColumnType::Integer)
}

const fn text(name: &'static str) -> Column {
    Column::new(name, ColumnType::Text)
}

const fn flag(name: &'static str) -> Column {
    Column::new(name, ColumnType::Boolean)
}

const ID_LOOKUP_COLUMNS: &[Column] = &[
    text("gmlid"),
    int("id"),
    int("root_id"),
    flag("reverse"),
    text("mapping"),
    int("object_class_id"),
];

static FEATURE_ID_LOOKUP: TableSchema = TableSchema {
    prefix: "ftid",
    columns: ID_LOOKUP_COLUMNS,
    indexes: &[IndexDef {
        columns: &["gmlid"],
    }],
};

static GEOMETRY_ID_LOOKUP: TableSchema = TableSchema {
    prefix: "geoid",
    columns: ID_LOOKUP_COLUMNS,
    indexes: &[IndexDef {
        columns: &["gmlid"],
    }],
};

static SURFACE_GEOMETRY: TableSchema = TableSchema {
    prefix: "sg",
    columns: &[
        int("id"),
        int("parent_id"),
        int("root_id"),
        flag("reverse"),
        text("gmlid"),
        int("cityobject_id"),
    ],
    indexes: &[
        IndexDef {
            columns: &["gmlid"],
        },
        IndexDef {
            columns: &["root_id", "parent_id"],
        },
    ],
};

static LINEAR_RING: TableSchema = TableSchema {
    prefix: "lr",
    columns: &[text("gmlid"), int("parent_id"), int("ring_no")],
    indexes: &[
        IndexDef {
            columns: &["gmlid"],
        },
        IndexDef {
            columns: &["parent_id", "ring_no"],
        },
    ],
};

static TEXTURE_ASSOCIATION: TableSchema = TableSchema {
    prefix: "txas",
    columns: &[int("id"), int("surface_data_id"), text("target_uri")],
    indexes: &[IndexDef {
        columns: &["target_uri"],
    }],
};

static TEXTURE_ASSOCIATION_TARGET: TableSchema = TableSchema {
    prefix: "txat",
    columns: &[int("surface_data_id"), int("surface_geometry_id")],
    indexes: &[IndexDef {
        columns: &["surface_data_id", "surface_geometry_id"],
    }],
};

static TEXTURE_PARAMETER: TableSchema = TableSchema {
    prefix: "txpar",
    columns: &[
        int("id"),
        flag("is_texture_parameterization"),
        text("texparam_gmlid"),
        text("world_to_texture"),
        text("texture_coordinates"),
        int("target_id"),
        text("texcoordlist_id"),
    ],
    indexes: &[
        IndexDef {
            columns: &["texparam_gmlid"],
        },
        IndexDef {
            columns: &["texcoordlist_id"],
        },
    ],
};

static TEXTURE_COORDINATE_LIST: TableSchema = TableSchema {
    prefix: "txcl",
    columns: &[
        int("id"),
        text("gmlid"),
        text("texture_coordinates"),
        text("target_id"),
    ],
    indexes: &[IndexDef {
        columns: &["gmlid"],
    }],
};

static GROUP_MEMBERSHIP: TableSchema = TableSchema {
    prefix: "grp",
    columns: &[
        int("group_id"),
        text("gmlid"),
        flag("is_parent"),
        text("role"),
    ],
    indexes: &[
        IndexDef {
            columns: &["group_id"],
        },
        IndexDef {
            columns: &["gmlid"],
        },
    ],
};

static LIBRARY_OBJECT: TableSchema = TableSchema {
    prefix: "lib",
    columns: &[text("url"), int("implicit_geometry_id"), text("file_name")],
    indexes: &[IndexDef {
        columns: &["url"],
    }],
};

static TEXTURE_FILE: TableSchema = TableSchema {
    prefix: "txfl",
    columns: &[int("id"), text("file_uri"), flag("is_world_file")],
    indexes: &[IndexDef {
        columns: &["file_uri"],
    }],
};

static DEPRECATED_MATERIAL: TableSchema = TableSchema {
    prefix: "dmat",
    columns: &[int("id"), text("gmlid"), int("surface_geometry_id")],
    indexes: &[IndexDef {
        columns: &["gmlid"],
    }],
};

static GLOBAL_APPEARANCE: TableSchema = TableSchema {
    prefix: "gapp",
    columns: &[int("id"), text("gmlid")],
    indexes: &[IndexDef {
        columns: &["id"],
    }],
};

static BASIC: TableSchema = TableSchema {
    prefix: "bas",
    columns: &[text("key"), text("value")],
    indexes: &[IndexDef {
        columns: &["key"],
    }],
};

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;

    #[rstest]
    fn every_index_column_exists_in_its_schema() {
        for kind in ModelKind::ALL {
            let schema = kind.schema();
            for index in schema.indexes {
                for column in index.columns {
                    assert!(
                        schema.column(column).is_some(),
                        "{kind}: index column {column} missing from schema"
                    );
                }
            }
        }
    }

    #[rstest]
    fn prefixes_are_unique_and_short() {
        let mut seen = HashSet::new();
        for kind in ModelKind::ALL {
            let prefix = kind.table_prefix();
            assert!(prefix.len() <= 6, "{kind}: prefix {prefix} too long");
            assert!(seen.insert(prefix), "{kind}: prefix {prefix} reused");
        }
    }

    #[rstest]
    fn every_kind_has_columns_and_indexes() {
        for kind in ModelKind::ALL {
            assert!(!kind.schema().columns.is_empty(), "{kind} has no columns");
            assert!(!kind.schema().indexes.is_empty(), "{kind} has no indexes");
            assert!(kind.schema().indexes.len() < 10, "{kind} has too many indexes");
        }
    }

    #[rstest]
    #[case("surface_geometry", ModelKind::SurfaceGeometry)]
    #[case("Linear-Ring", ModelKind::LinearRing)]
    #[case(" basic ", ModelKind::Basic)]
    fn parses_kind_names(#[case] input: &str, #[case] expected: ModelKind) {
        assert_eq!(input.parse::<ModelKind>(), Ok(expected));
    }

    #[rstest]
    fn display_round_trips_through_from_str() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.to_string().parse::<ModelKind>(), Ok(kind));
        }
    }

    #[rstest]
    fn rejects_unknown_kind() {
        let err = "tin_relief".parse::<ModelKind>().expect_err("unknown kind");
        assert_eq!(err.name, "tin_relief");
    }
}
