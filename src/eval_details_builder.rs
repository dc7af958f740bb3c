use chrono::{DateTime, Utc};

use crate::{
    constraint::CompiledConstraint,
    context::{ContextValue, Entity},
    eval_details::*,
    eval_visitor::{EvalSegmentVisitor, EvalVisitor},
    flag::{CompiledFlag, Decision},
    segment::{CompiledSegment, CompiledVariant, SegmentNonMatchReason},
    Error, Result, Str,
};

/// An evaluation visitor that builds [`EvaluationDetails`] along the way.
pub(crate) struct EvalDetailsBuilder {
    flag_key: Str,
    entity_id: String,
    entity_context: ContextValue,
    now: DateTime<Utc>,

    flag_id: Option<u64>,
    /// `None` until the flag is visited.
    flag_enabled: Option<bool>,
    /// `(id, rank)` of all segments in evaluation order. Used to fill in unevaluated segments.
    segment_order: Vec<(u64, u32)>,

    /// Set once evaluation finishes.
    result: Option<Result<Decision>>,

    evaluated_segments: Vec<SegmentEvaluationDetails>,
}

pub(crate) struct EvalSegmentDetailsBuilder<'a> {
    segment_details: &'a mut SegmentEvaluationDetails,
}

impl EvalDetailsBuilder {
    pub fn new(flag_key: Str, entity: &Entity, now: DateTime<Utc>) -> EvalDetailsBuilder {
        EvalDetailsBuilder {
            flag_key,
            entity_id: entity.id.clone(),
            entity_context: entity.context.clone(),
            now,
            flag_id: None,
            flag_enabled: None,
            segment_order: Vec::new(),
            result: None,
            evaluated_segments: Vec::new(),
        }
    }

    pub fn build(self) -> EvaluationDetails {
        let reason = self.reason();
        let description = self.build_description(reason);
        let assignment = self
            .result
            .as_ref()
            .and_then(|result| result.as_ref().ok())
            .and_then(Decision::assignment);

        let mut segments = self.evaluated_segments;
        let evaluated = segments.len();
        segments.extend(
            self.segment_order
                .iter()
                .enumerate()
                .skip(evaluated)
                .map(|(i, &(segment_id, rank))| SegmentEvaluationDetails {
                    segment_id,
                    rank,
                    order_position: i + 1,
                    result: SegmentEvaluationResult::Unevaluated,
                    rollout_sample: None,
                    bucket_sample: None,
                    constraints: Vec::new(),
                }),
        );

        EvaluationDetails {
            flag_id: self.flag_id,
            flag_key: self.flag_key,
            entity_id: self.entity_id,
            entity_context: self.entity_context,
            timestamp: self.now,
            reason,
            description,
            segment_id: assignment.map(|it| it.segment_id),
            variant_id: assignment.map(|it| it.variant_id),
            variant_key: assignment.map(|it| it.variant_key.clone()),
            segments,
        }
    }

    fn reason(&self) -> DecisionReason {
        match &self.result {
            Some(Ok(Decision::Matched(_))) => DecisionReason::Matched,
            Some(Ok(Decision::NoSegmentMatched)) if self.flag_enabled == Some(false) => {
                DecisionReason::FlagDisabled
            }
            Some(Ok(Decision::NoSegmentMatched)) => DecisionReason::NoSegmentMatched,
            Some(Err(_)) | None => DecisionReason::Error,
        }
    }

    fn build_description(&self, reason: DecisionReason) -> String {
        let flag_key: &str = &self.flag_key;
        let entity_id = &self.entity_id;
        match (&self.result, reason) {
            (None, _) => "Flag evaluation was not attempted".to_owned(),
            (Some(Err(Error::FlagNotFound)), _) => format!("Flag not found: {flag_key:?}"),
            (Some(Err(err)), _) => format!("Error occurred while evaluating flag {flag_key:?}: {err}"),
            (Some(Ok(Decision::Matched(assignment))), _) => format!(
                "{entity_id} matched segment {} and was assigned variant {:?}.",
                assignment.segment_id,
                &*assignment.variant_key
            ),
            (Some(Ok(Decision::NoSegmentMatched)), DecisionReason::FlagDisabled) => {
                format!("Flag {flag_key:?} is disabled.")
            }
            (Some(Ok(Decision::NoSegmentMatched)), _) => {
                format!("No segment matched {entity_id}.")
            }
        }
    }
}

impl EvalVisitor for EvalDetailsBuilder {
    type SegmentVisitor<'a> = EvalSegmentDetailsBuilder<'a>
    where
        Self: 'a;

    fn on_flag(&mut self, flag: &CompiledFlag) {
        self.flag_id = Some(flag.id());
        self.flag_key = flag.key().clone();
        self.flag_enabled = Some(flag.is_enabled());
        self.segment_order.truncate(0);
        self.segment_order
            .extend(flag.segments().iter().map(|it| (it.id(), it.rank())));
    }

    fn visit_segment<'a>(&'a mut self, segment: &CompiledSegment) -> Self::SegmentVisitor<'a> {
        let order_position = self.evaluated_segments.len() + 1;
        self.evaluated_segments.push(SegmentEvaluationDetails {
            segment_id: segment.id(),
            rank: segment.rank(),
            order_position,
            result: SegmentEvaluationResult::Unevaluated,
            rollout_sample: None,
            bucket_sample: None,
            constraints: Vec::new(),
        });
        EvalSegmentDetailsBuilder {
            segment_details: self
                .evaluated_segments
                .last_mut()
                .expect("we just inserted an element, so there must be last"),
        }
    }

    fn on_result(&mut self, result: &Result<Decision>) {
        self.result = Some(result.clone());
    }
}

impl<'b> EvalSegmentVisitor for EvalSegmentDetailsBuilder<'b> {
    fn on_rollout_sample(&mut self, sample: u64) {
        self.segment_details.rollout_sample = Some(sample);
    }

    fn on_constraint_eval(
        &mut self,
        constraint: &CompiledConstraint,
        value: Option<&ContextValue>,
        matched: bool,
    ) {
        self.segment_details
            .constraints
            .push(ConstraintEvaluationDetails {
                property: constraint.property().into(),
                operator: constraint.predicate().operator(),
                value: value.cloned(),
                matched,
            });
    }

    fn on_bucket_sample(&mut self, sample: u64) {
        self.segment_details.bucket_sample = Some(sample);
    }

    fn on_result(&mut self, result: std::result::Result<&CompiledVariant, SegmentNonMatchReason>) {
        self.segment_details.result = match result {
            Ok(_) => SegmentEvaluationResult::Matched,
            Err(SegmentNonMatchReason::RolloutMiss) => SegmentEvaluationResult::RolloutMiss,
            Err(SegmentNonMatchReason::FailingConstraints) => {
                SegmentEvaluationResult::FailingConstraints
            }
            Err(SegmentNonMatchReason::DistributionMiss) => {
                SegmentEvaluationResult::DistributionMiss
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::EvalDetailsBuilder;
    use crate::{
        context::ContextValue,
        eval_details::DecisionReason,
        eval_visitor::EvalVisitor,
        flag::{prepare, Decision},
        models::Flag,
        Entity, Error,
    };

    #[test]
    fn unattempted_evaluation() {
        let entity = Entity::new("e1", json!({}));
        let details = EvalDetailsBuilder::new("missing".into(), &entity, Utc::now()).build();
        assert_eq!(details.reason, DecisionReason::Error);
        assert_eq!(details.description, "Flag evaluation was not attempted");
        assert!(details.segments.is_empty());
    }

    #[test]
    fn flag_not_found() {
        let entity = Entity::new("e1", json!({"dl_state": "CA"}));
        let mut builder = EvalDetailsBuilder::new("missing".into(), &entity, Utc::now());
        EvalVisitor::on_result(&mut builder, &Err::<Decision, _>(Error::FlagNotFound));

        let details = builder.build();
        assert_eq!(details.reason, DecisionReason::Error);
        assert_eq!(details.flag_id, None);
        assert_eq!(details.description, "Flag not found: \"missing\"");
        assert_eq!(
            details.entity_context,
            ContextValue::from(json!({"dl_state": "CA"}))
        );
    }

    #[test]
    fn serializes_to_camel_case() {
        let entity = Entity::new("e1", json!({}));
        let mut builder = EvalDetailsBuilder::new("flag".into(), &entity, Utc::now());
        EvalVisitor::on_result(&mut builder, &Ok(Decision::NoSegmentMatched));

        let json = serde_json::to_value(builder.build()).unwrap();
        assert_eq!(json["reason"], "NO_SEGMENT_MATCHED");
        assert_eq!(json["entityId"], "e1");
        assert_eq!(json["flagKey"], "flag");
        assert!(json["segments"].as_array().unwrap().is_empty());
    }

    #[test]
    fn disabled_flag_is_reported_only_once_visited() {
        let flag: Flag = serde_json::from_value(json!({
            "id": 5,
            "key": "flag",
            "enabled": false,
            "segments": [],
            "variants": []
        }))
        .unwrap();
        let flag = prepare(&flag).unwrap();
        let entity = Entity::new("e1", json!({}));

        let mut builder = EvalDetailsBuilder::new("flag".into(), &entity, Utc::now());
        builder.on_flag(&flag);
        EvalVisitor::on_result(&mut builder, &Ok(Decision::NoSegmentMatched));
        let details = builder.build();
        assert_eq!(details.reason, DecisionReason::FlagDisabled);
        assert_eq!(details.flag_id, Some(5));
        assert_eq!(details.description, "Flag \"flag\" is disabled.");
    }
}
