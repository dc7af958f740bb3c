use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use crate::{
    constraint_set::ConstraintSet,
    context::EntityContext,
    distribution::{to_fixed_point, DistributionTable, TOTAL_BUCKETS},
    eval_visitor::EvalSegmentVisitor,
    models::{Segment, Variant},
    sharder::Sharder,
    Result, Str,
};

/// A variant as it is handed out by evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledVariant {
    /// Variant id.
    pub id: u64,
    /// Variant key.
    pub key: Str,
    /// Opaque payload, shared between all decisions that select this variant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Arc<serde_json::Value>>,
}

impl From<&Variant> for CompiledVariant {
    fn from(variant: &Variant) -> CompiledVariant {
        CompiledVariant {
            id: variant.id,
            key: variant.key.as_str().into(),
            attachment: variant.attachment.clone().map(Arc::new),
        }
    }
}

/// Why a segment did not select a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SegmentNonMatchReason {
    /// Entity is outside of the rollout percentage.
    RolloutMiss,
    /// At least one constraint didn't match.
    FailingConstraints,
    /// Sample point is not covered by the distribution table.
    DistributionMiss,
}

/// A segment prepared for evaluation.
///
/// Salts are precomputed, so evaluation only hashes the entity's sampling key.
#[derive(Debug, Clone)]
pub struct CompiledSegment {
    id: u64,
    rank: u32,
    /// Rollout threshold in the fixed-point space. Sample points below it pass the gate.
    rollout: u32,
    rollout_salt: Box<str>,
    bucket_salt: Box<str>,
    constraints: ConstraintSet,
    distribution: DistributionTable,
}

impl CompiledSegment {
    pub(crate) fn compile(
        flag_id: u64,
        segment: &Segment,
        variants: &HashMap<u64, CompiledVariant>,
    ) -> Result<CompiledSegment> {
        Ok(CompiledSegment {
            id: segment.id,
            rank: segment.rank,
            rollout: to_fixed_point(segment.id, segment.rollout_percent)?,
            rollout_salt: format!("{flag_id}:{}:rollout:", segment.id).into(),
            bucket_salt: format!("{flag_id}:{}:", segment.id).into(),
            constraints: ConstraintSet::compile(&segment.constraints)?,
            distribution: DistributionTable::compile(segment, variants)?,
        })
    }

    /// Segment id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Segment rank. Lower is evaluated first.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Rollout threshold in the fixed-point space, `[0, 100000]`.
    pub fn rollout(&self) -> u32 {
        self.rollout
    }

    #[allow(missing_docs)]
    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    #[allow(missing_docs)]
    pub fn distribution(&self) -> &DistributionTable {
        &self.distribution
    }

    /// Rollout gate, then constraint gate, then bucketing.
    pub(crate) fn eval<V: EvalSegmentVisitor>(
        &self,
        visitor: &mut V,
        sampling_key: &str,
        context: &EntityContext,
        sharder: &impl Sharder,
    ) -> std::result::Result<&CompiledVariant, SegmentNonMatchReason> {
        let result = self.eval_gates(visitor, sampling_key, context, sharder);
        visitor.on_result(result);
        result
    }

    fn eval_gates<V: EvalSegmentVisitor>(
        &self,
        visitor: &mut V,
        sampling_key: &str,
        context: &EntityContext,
        sharder: &impl Sharder,
    ) -> std::result::Result<&CompiledVariant, SegmentNonMatchReason> {
        let rollout_sample = self.sample(sharder, &self.rollout_salt, sampling_key);
        visitor.on_rollout_sample(rollout_sample);
        if rollout_sample >= u64::from(self.rollout) {
            return Err(SegmentNonMatchReason::RolloutMiss);
        }

        if !self.constraints.eval(visitor, context) {
            return Err(SegmentNonMatchReason::FailingConstraints);
        }

        let bucket_sample = self.sample(sharder, &self.bucket_salt, sampling_key);
        visitor.on_bucket_sample(bucket_sample);
        self.distribution
            .lookup(bucket_sample)
            .ok_or(SegmentNonMatchReason::DistributionMiss)
    }

    fn sample(&self, sharder: &impl Sharder, salt: &str, sampling_key: &str) -> u64 {
        sharder.get_shard(
            salt.as_bytes(),
            sampling_key.as_bytes(),
            u64::from(TOTAL_BUCKETS),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::{CompiledSegment, CompiledVariant, SegmentNonMatchReason};
    use crate::{
        context::{ContextValue, EntityContext},
        eval_visitor::{EvalSegmentVisitor, NoopEvalVisitor},
        models::{Constraint, Distribution, Segment, Variant},
        sharder::{Md5Sharder, Sharder},
        Error,
    };

    /// Returns fixed sample points, telling rollout and bucket sampling apart by salt.
    pub(crate) struct FixedSharder {
        pub rollout: u64,
        pub bucket: u64,
    }

    impl Sharder for FixedSharder {
        fn get_shard(&self, salt: &[u8], _key: &[u8], _total_shards: u64) -> u64 {
            if salt.ends_with(b":rollout:") {
                self.rollout
            } else {
                self.bucket
            }
        }
    }

    #[derive(Default)]
    struct SampleRecorder {
        rollout: Option<u64>,
        bucket: Option<u64>,
        constraints: usize,
    }

    impl EvalSegmentVisitor for SampleRecorder {
        fn on_rollout_sample(&mut self, sample: u64) {
            self.rollout = Some(sample);
        }

        fn on_constraint_eval(
            &mut self,
            _constraint: &crate::constraint::CompiledConstraint,
            _value: Option<&ContextValue>,
            _matched: bool,
        ) {
            self.constraints += 1;
        }

        fn on_bucket_sample(&mut self, sample: u64) {
            self.bucket = Some(sample);
        }
    }

    fn variants() -> HashMap<u64, CompiledVariant> {
        [
            Variant {
                id: 1,
                key: "control".to_owned(),
                attachment: None,
            },
            Variant {
                id: 2,
                key: "treatment".to_owned(),
                attachment: Some(json!({"color": "blue"})),
            },
        ]
        .iter()
        .map(|v| (v.id, CompiledVariant::from(v)))
        .collect()
    }

    fn segment(rollout_percent: f64) -> Segment {
        Segment {
            id: 20,
            description: String::new(),
            rank: 0,
            rollout_percent,
            constraints: vec![Constraint::new("dl_state", "EQ", "\"CA\"")],
            distributions: vec![
                Distribution {
                    id: 0,
                    variant_id: 1,
                    variant_key: "control".to_owned(),
                    percent: 50.0,
                },
                Distribution {
                    id: 0,
                    variant_id: 2,
                    variant_key: "treatment".to_owned(),
                    percent: 50.0,
                },
            ],
        }
    }

    fn context(value: serde_json::Value) -> EntityContext {
        match ContextValue::from(value) {
            ContextValue::Object(map) => map,
            _ => panic!("context must be an object"),
        }
    }

    #[test]
    fn compiles_salts_and_rollout() {
        let compiled = CompiledSegment::compile(10, &segment(12.345), &variants()).unwrap();
        assert_eq!(compiled.id(), 20);
        assert_eq!(compiled.rollout(), 12_345);
        assert_eq!(&*compiled.rollout_salt, "10:20:rollout:");
        assert_eq!(&*compiled.bucket_salt, "10:20:");
        assert_eq!(compiled.constraints().len(), 1);
        assert_eq!(compiled.distribution().boundaries(), [50_000, 100_000]);
    }

    #[test]
    fn selects_variant_by_bucket_sample() {
        let compiled = CompiledSegment::compile(10, &segment(100.0), &variants()).unwrap();
        let context = context(json!({"dl_state": "CA"}));

        let low = FixedSharder {
            rollout: 99_999,
            bucket: 49_999,
        };
        let result = compiled.eval(&mut NoopEvalVisitor, "e1", &context, &low);
        assert_eq!(result.map(|v| v.id), Ok(1));

        let high = FixedSharder {
            rollout: 0,
            bucket: 50_000,
        };
        let variant = compiled
            .eval(&mut NoopEvalVisitor, "e1", &context, &high)
            .unwrap();
        assert_eq!(variant.key.as_ref(), "treatment");
        assert_eq!(variant.attachment.as_deref(), Some(&json!({"color": "blue"})));
    }

    #[test]
    fn rollout_miss_skips_constraints() {
        let compiled = CompiledSegment::compile(10, &segment(50.0), &variants()).unwrap();
        let context = context(json!({"dl_state": "CA"}));
        let sharder = FixedSharder {
            rollout: 50_000,
            bucket: 0,
        };

        let mut recorder = SampleRecorder::default();
        let result = compiled.eval(&mut recorder, "e1", &context, &sharder);

        assert_eq!(result, Err(SegmentNonMatchReason::RolloutMiss));
        assert_eq!(recorder.rollout, Some(50_000));
        assert_eq!(recorder.constraints, 0);
        assert_eq!(recorder.bucket, None);
    }

    #[test]
    fn zero_rollout_never_matches() {
        let compiled = CompiledSegment::compile(10, &segment(0.0), &variants()).unwrap();
        let context = context(json!({"dl_state": "CA"}));
        let sharder = FixedSharder {
            rollout: 0,
            bucket: 0,
        };
        assert_eq!(
            compiled.eval(&mut NoopEvalVisitor, "e1", &context, &sharder),
            Err(SegmentNonMatchReason::RolloutMiss)
        );
    }

    #[test]
    fn full_rollout_always_passes() {
        let compiled = CompiledSegment::compile(10, &segment(100.0), &variants()).unwrap();
        let context = context(json!({"dl_state": "CA"}));
        for i in 0..1000 {
            let result = compiled.eval(&mut NoopEvalVisitor, &format!("e{i}"), &context, &Md5Sharder);
            assert!(result.is_ok());
        }
    }

    #[test]
    fn failing_constraints() {
        let compiled = CompiledSegment::compile(10, &segment(100.0), &variants()).unwrap();
        let sharder = FixedSharder {
            rollout: 0,
            bucket: 0,
        };

        let mut recorder = SampleRecorder::default();
        let result = compiled.eval(&mut recorder, "e1", &context(json!({"dl_state": "NY"})), &sharder);
        assert_eq!(result, Err(SegmentNonMatchReason::FailingConstraints));
        assert_eq!(recorder.constraints, 1);
        assert_eq!(recorder.bucket, None);
    }

    #[test]
    fn distribution_miss() {
        let mut segment = segment(100.0);
        segment.distributions.truncate(1);
        let compiled = CompiledSegment::compile(10, &segment, &variants()).unwrap();
        let sharder = FixedSharder {
            rollout: 0,
            bucket: 75_000,
        };
        assert_eq!(
            compiled.eval(
                &mut NoopEvalVisitor,
                "e1",
                &context(json!({"dl_state": "CA"})),
                &sharder
            ),
            Err(SegmentNonMatchReason::DistributionMiss)
        );
    }

    #[test]
    fn sampling_is_scoped_to_flag_and_segment() {
        let a = CompiledSegment::compile(10, &segment(100.0), &variants()).unwrap();
        let b = CompiledSegment::compile(11, &segment(100.0), &variants()).unwrap();
        let context = context(json!({"dl_state": "CA"}));

        let mut ra = SampleRecorder::default();
        let mut rb = SampleRecorder::default();
        let differs = (0..50).any(|i| {
            let key = format!("entity-{i}");
            let _ = a.eval(&mut ra, &key, &context, &Md5Sharder);
            let _ = b.eval(&mut rb, &key, &context, &Md5Sharder);
            ra.bucket != rb.bucket
        });
        assert!(differs);
        assert_ne!(ra.rollout, ra.bucket);
    }

    #[test]
    fn rejects_unknown_variant() {
        let mut segment = segment(100.0);
        segment.distributions[1].variant_id = 99;
        assert!(matches!(
            CompiledSegment::compile(10, &segment, &variants()),
            Err(Error::UnknownVariant {
                segment_id: 20,
                variant_id: 99
            })
        ));
    }

    #[test]
    fn rejects_invalid_rollout() {
        assert!(matches!(
            CompiledSegment::compile(10, &segment(100.5), &variants()),
            Err(Error::InvalidPercent { segment_id: 20, .. })
        ));
    }
}
