//! Logical property kinds of the entity model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical kind of an entity property.
///
/// Scalar kinds drive value coercion (JSON payloads, key literals, skip-token
/// values) and comparison. `Complex` and `Navigation` are structural: they can
/// be read and written but never filtered or ordered on directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    String,
    Int,
    Decimal,
    Bool,
    Uuid,
    DateTime,
    Date,
    Time,
    Complex,
    Navigation,
}

impl PropertyKind {
    /// Whether values of this kind can appear in `$filter`/`$orderby`/keys.
    #[must_use]
    pub fn is_scalar(self) -> bool {
        !matches!(self, PropertyKind::Complex | PropertyKind::Navigation)
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyKind::String => "Edm.String",
            PropertyKind::Int => "Edm.Int64",
            PropertyKind::Decimal => "Edm.Decimal",
            PropertyKind::Bool => "Edm.Boolean",
            PropertyKind::Uuid => "Edm.Guid",
            PropertyKind::DateTime => "Edm.DateTimeOffset",
            PropertyKind::Date => "Edm.Date",
            PropertyKind::Time => "Edm.TimeOfDay",
            PropertyKind::Complex => "Complex",
            PropertyKind::Navigation => "Navigation",
        };
        f.write_str(name)
    }
}
