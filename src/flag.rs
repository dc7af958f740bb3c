use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde::Serialize;

use crate::{
    context::Entity,
    eval_details::EvaluationDetails,
    eval_details_builder::EvalDetailsBuilder,
    eval_visitor::{EvalVisitor, NoopEvalVisitor},
    models::Flag,
    segment::{CompiledSegment, CompiledVariant},
    sharder::{Md5Sharder, Sharder},
    Error, Result, Str,
};

/// Compile a loaded flag into an immutable, thread-safe evaluator.
///
/// Must be called again after every change to the flag's segments, constraints, or
/// distributions. Any invalid constraint, percent, or variant reference fails the whole flag.
///
/// ```
/// # use flag_eval::{models::Flag, prepare, Entity};
/// let flag: Flag = serde_json::from_value(serde_json::json!({
///     "id": 1,
///     "key": "new_checkout",
///     "enabled": true,
///     "segments": [{
///         "id": 1,
///         "rank": 0,
///         "rolloutPercent": 100,
///         "distributions": [{"variantId": 1, "percent": 100}]
///     }],
///     "variants": [{"id": 1, "key": "on"}]
/// })).unwrap();
///
/// let compiled = prepare(&flag).unwrap();
/// let decision = compiled.evaluate(&Entity::new("user-1", serde_json::json!({}))).unwrap();
/// assert_eq!(decision.assignment().map(|a| a.variant_key.as_ref()), Some("on"));
/// ```
pub fn prepare(flag: &Flag) -> Result<CompiledFlag> {
    let variants = flag
        .variants
        .iter()
        .map(|variant| (variant.id, CompiledVariant::from(variant)))
        .collect::<HashMap<_, _>>();

    let mut segments = flag
        .segments
        .iter()
        .map(|segment| CompiledSegment::compile(flag.id, segment, &variants))
        .collect::<Result<Vec<_>>>()?;
    // Stable sort keeps persisted order among equal ranks.
    segments.sort_by_key(|segment| segment.rank());

    Ok(CompiledFlag {
        id: flag.id,
        key: flag.key.as_str().into(),
        enabled: flag.enabled,
        segments: segments.into(),
    })
}

/// A flag prepared for evaluation.
///
/// Immutable once built. Share it between threads (e.g., behind an `Arc`) and replace it as a
/// whole when the definition changes.
#[derive(Debug, Clone)]
pub struct CompiledFlag {
    id: u64,
    key: Str,
    enabled: bool,
    /// Sorted by rank.
    segments: Box<[CompiledSegment]>,
}

/// Outcome of a flag evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    /// A segment matched and selected a variant.
    Matched(Assignment),
    /// The flag is disabled or no segment selected a variant.
    NoSegmentMatched,
}

/// Variant assigned to an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Assignment {
    pub flag_id: u64,
    pub flag_key: Str,
    pub segment_id: u64,
    pub variant_id: u64,
    pub variant_key: Str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_attachment: Option<Arc<serde_json::Value>>,
}

impl Decision {
    /// Return `true` if a variant was assigned.
    pub fn is_matched(&self) -> bool {
        matches!(self, Decision::Matched(_))
    }

    /// Return the assignment, if any.
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            Decision::Matched(assignment) => Some(assignment),
            Decision::NoSegmentMatched => None,
        }
    }

    /// Convert into the assignment, if any.
    pub fn into_assignment(self) -> Option<Assignment> {
        match self {
            Decision::Matched(assignment) => Some(assignment),
            Decision::NoSegmentMatched => None,
        }
    }
}

impl CompiledFlag {
    #[allow(missing_docs)]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[allow(missing_docs)]
    pub fn key(&self) -> &Str {
        &self.key
    }

    #[allow(missing_docs)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Segments in evaluation order.
    pub fn segments(&self) -> &[CompiledSegment] {
        &self.segments
    }

    /// Evaluate the flag for `entity`.
    ///
    /// Returns [`Error::InvalidEntityContext`] if the flag is enabled and the entity context is
    /// not an object.
    pub fn evaluate(&self, entity: &Entity) -> Result<Decision> {
        self.evaluate_with_sharder(entity, &Md5Sharder)
    }

    /// Evaluate the flag for `entity`, using `sharder` for rollout and bucket sampling.
    pub fn evaluate_with_sharder(&self, entity: &Entity, sharder: &impl Sharder) -> Result<Decision> {
        self.eval(&mut NoopEvalVisitor, entity, sharder)
    }

    /// Evaluate the flag for `entity` and record how the decision was made.
    pub fn evaluate_details(&self, entity: &Entity) -> (Result<Decision>, EvaluationDetails) {
        let mut builder = EvalDetailsBuilder::new(self.key.clone(), entity, Utc::now());
        let result = self.eval(&mut builder, entity, &Md5Sharder);
        (result, builder.build())
    }

    pub(crate) fn eval<V: EvalVisitor>(
        &self,
        visitor: &mut V,
        entity: &Entity,
        sharder: &impl Sharder,
    ) -> Result<Decision> {
        visitor.on_flag(self);
        let result = self.eval_segments(visitor, entity, sharder);
        visitor.on_result(&result);
        result
    }

    fn eval_segments<V: EvalVisitor>(
        &self,
        visitor: &mut V,
        entity: &Entity,
        sharder: &impl Sharder,
    ) -> Result<Decision> {
        if !self.enabled {
            return Ok(Decision::NoSegmentMatched);
        }

        let context = entity
            .context
            .as_object()
            .ok_or(Error::InvalidEntityContext)?;
        let sampling_key = entity.sampling_key();

        for segment in self.segments.iter() {
            let result = segment.eval(
                &mut visitor.visit_segment(segment),
                sampling_key,
                context,
                sharder,
            );
            if let Ok(variant) = result {
                return Ok(Decision::Matched(Assignment {
                    flag_id: self.id,
                    flag_key: self.key.clone(),
                    segment_id: segment.id(),
                    variant_id: variant.id,
                    variant_key: variant.key.clone(),
                    variant_attachment: variant.attachment.clone(),
                }));
            }
        }

        Ok(Decision::NoSegmentMatched)
    }
}
