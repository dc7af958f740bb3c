//! Flag definitions as they are loaded from storage.
//!
//! These types are plain data. They are never evaluated directly: [`prepare`](crate::prepare)
//! compiles a [`Flag`] into a [`CompiledFlag`](crate::CompiledFlag) first.
use serde::{Deserialize, Serialize};

/// Rank assigned to segments that don't specify one.
pub const SEGMENT_DEFAULT_RANK: u32 = 999;

/// A feature flag with its segments and variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Flag {
    pub id: u64,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    /// Segments in their persisted order. Evaluation order is by rank, then by this order.
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

/// A ranked rule mapping matching entities to a variant distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Segment {
    pub id: u64,
    #[serde(default)]
    pub description: String,
    /// Lower rank is evaluated first.
    #[serde(default = "default_rank")]
    pub rank: u32,
    /// Percentage of entities (0–100, up to three decimals) for which the segment is considered.
    pub rollout_percent: f64,
    /// AND-combined constraints.
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Variant split. Percents are expected to sum to 100.
    #[serde(default)]
    pub distributions: Vec<Distribution>,
}

fn default_rank() -> u32 {
    SEGMENT_DEFAULT_RANK
}

/// A single `(property, operator, value)` predicate over the entity context.
///
/// `value` is always a JSON literal: `"\"CA\""`, `"18"`, `"[\"CA\", \"NY\"]"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Constraint {
    #[serde(default)]
    pub id: u64,
    pub property: String,
    pub operator: String,
    pub value: String,
}

impl Constraint {
    /// Create a constraint from its parts.
    ///
    /// ```
    /// # use flag_eval::models::Constraint;
    /// let c = Constraint::new("dl_state", "EQ", r#""CA""#);
    /// ```
    pub fn new(
        property: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Constraint {
        Constraint {
            id: 0,
            property: property.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// A `(variant, percent)` pair of a segment's variant split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Distribution {
    #[serde(default)]
    pub id: u64,
    pub variant_id: u64,
    #[serde(default)]
    pub variant_key: String,
    pub percent: f64,
}

/// A treatment returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Variant {
    pub id: u64,
    pub key: String,
    /// Opaque payload returned along with the variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<serde_json::Value>,
}
