use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{constraint::Operator, context::ContextValue, Str};

/// Details about a single flag evaluation.
///
/// Produced by [`CompiledFlag::evaluate_details`](crate::CompiledFlag::evaluate_details) and
/// [`Evaluator::evaluate_details`](crate::Evaluator::evaluate_details). Serializes to camelCase
/// JSON, suitable for a debug console or an evaluation log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct EvaluationDetails {
    /// `None` if the flag could not be found.
    pub flag_id: Option<u64>,
    pub flag_key: Str,
    pub entity_id: String,
    pub entity_context: ContextValue,
    /// Timestamp when the flag was evaluated.
    pub timestamp: DateTime<Utc>,

    pub reason: DecisionReason,
    /// Human-readable explanation of `reason`.
    pub description: String,

    /// Matched segment, if any.
    pub segment_id: Option<u64>,
    pub variant_id: Option<u64>,
    pub variant_key: Option<Str>,

    /// Evaluation details for all segments, in evaluation order.
    pub segments: Vec<SegmentEvaluationDetails>,
}

/// Why a flag evaluation ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    /// A segment matched and a variant was assigned.
    Matched,
    /// The flag is disabled. No segment was evaluated.
    FlagDisabled,
    /// No segment selected a variant.
    NoSegmentMatched,
    /// Evaluation failed. See `description`.
    Error,
}

/// How a single segment was evaluated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct SegmentEvaluationDetails {
    pub segment_id: u64,
    pub rank: u32,
    /// 1-based position in evaluation order.
    pub order_position: usize,
    pub result: SegmentEvaluationResult,
    /// Sample point used for the rollout gate. `None` if the segment was not evaluated.
    pub rollout_sample: Option<u64>,
    /// Sample point used for variant bucketing. `None` unless all constraints matched.
    pub bucket_sample: Option<u64>,
    /// Constraints in evaluation order. Constraints after the first failing one are omitted.
    pub constraints: Vec<ConstraintEvaluationDetails>,
}

/// Outcome of a single segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentEvaluationResult {
    /// The segment was not evaluated because a previous segment matched, the flag is disabled,
    /// or evaluation failed.
    Unevaluated,
    /// The entity passed all gates and got a variant.
    Matched,
    /// The entity is outside of the rollout percentage.
    RolloutMiss,
    /// At least one constraint did not match.
    FailingConstraints,
    /// Distributions don't cover the entity's sample point.
    DistributionMiss,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ConstraintEvaluationDetails {
    pub property: Str,
    pub operator: Operator,
    /// Context value the constraint was evaluated against. `None` if the property is missing.
    pub value: Option<ContextValue>,
    pub matched: bool,
}
