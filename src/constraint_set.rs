use crate::{
    constraint::CompiledConstraint,
    context::{ContextValue, EntityContext},
    eval_visitor::{EvalSegmentVisitor, NoopEvalVisitor},
    models::Constraint,
    Error, Result,
};

/// AND-combination of compiled constraints, evaluated left to right.
///
/// An empty set always matches.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    constraints: Box<[CompiledConstraint]>,
}

impl ConstraintSet {
    /// Compile all `constraints`, failing on the first invalid one.
    pub fn compile(constraints: &[Constraint]) -> Result<ConstraintSet> {
        let constraints = constraints
            .iter()
            .map(CompiledConstraint::compile)
            .collect::<Result<_>>()?;
        Ok(ConstraintSet { constraints })
    }

    /// Number of constraints in the set.
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Return `true` if the set has no constraints.
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Iterate constraints in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &CompiledConstraint> {
        self.constraints.iter()
    }

    /// Return `true` if every constraint matches `entity_context`.
    ///
    /// Stops at the first constraint that does not match. Fails if the set is non-empty and
    /// `entity_context` is not an object.
    pub fn matches(&self, entity_context: &ContextValue) -> Result<bool> {
        if self.is_empty() {
            return Ok(true);
        }
        let context = entity_context
            .as_object()
            .ok_or(Error::InvalidEntityContext)?;
        Ok(self.eval(&mut NoopEvalVisitor, context))
    }

    pub(crate) fn eval<V: EvalSegmentVisitor>(
        &self,
        visitor: &mut V,
        context: &EntityContext,
    ) -> bool {
        self.constraints.iter().all(|constraint| {
            let value = constraint.lookup(context);
            let matched = constraint.eval_value(value);
            visitor.on_constraint_eval(constraint, value, matched);
            matched
        })
    }
}

impl FromIterator<CompiledConstraint> for ConstraintSet {
    fn from_iter<T: IntoIterator<Item = CompiledConstraint>>(iter: T) -> Self {
        ConstraintSet {
            constraints: iter.into_iter().collect(),
        }
    }
}
