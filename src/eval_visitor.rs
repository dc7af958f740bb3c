use crate::{
    constraint::CompiledConstraint,
    context::ContextValue,
    flag::{CompiledFlag, Decision},
    segment::{CompiledSegment, CompiledVariant, SegmentNonMatchReason},
    Result,
};

pub(crate) trait EvalVisitor {
    // Type-foo here basically means that SegmentVisitor may hold references to EvalVisitor but
    // should not outlive it.
    type SegmentVisitor<'a>: EvalSegmentVisitor + 'a
    where
        Self: 'a;

    /// Called when evaluation starts, before the enabled check.
    #[allow(unused_variables)]
    #[inline]
    fn on_flag(&mut self, flag: &CompiledFlag) {}

    fn visit_segment<'a>(&'a mut self, segment: &CompiledSegment) -> Self::SegmentVisitor<'a>;

    /// Called with evaluation result.
    #[allow(unused_variables)]
    #[inline]
    fn on_result(&mut self, result: &Result<Decision>) {}
}

pub(crate) trait EvalSegmentVisitor {
    #[allow(unused_variables)]
    #[inline]
    fn on_rollout_sample(&mut self, sample: u64) {}

    #[allow(unused_variables)]
    #[inline]
    fn on_constraint_eval(
        &mut self,
        constraint: &CompiledConstraint,
        value: Option<&ContextValue>,
        matched: bool,
    ) {
    }

    #[allow(unused_variables)]
    #[inline]
    fn on_bucket_sample(&mut self, sample: u64) {}

    #[allow(unused_variables)]
    #[inline]
    fn on_result(&mut self, result: std::result::Result<&CompiledVariant, SegmentNonMatchReason>) {}
}

/// Dummy visitor that does nothing.
///
/// It is designed so that all calls to it are optimized away (zero-cost).
pub(crate) struct NoopEvalVisitor;

impl EvalVisitor for NoopEvalVisitor {
    type SegmentVisitor<'a> = NoopEvalVisitor;

    #[inline]
    fn visit_segment<'a>(&'a mut self, _segment: &CompiledSegment) -> Self::SegmentVisitor<'a> {
        NoopEvalVisitor
    }
}

impl EvalSegmentVisitor for NoopEvalVisitor {}
