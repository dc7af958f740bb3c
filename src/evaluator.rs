use std::{borrow::Cow, sync::Arc};

use chrono::Utc;

use crate::{
    context::{ContextValue, Entity},
    eval_details::EvaluationDetails,
    eval_details_builder::EvalDetailsBuilder,
    eval_visitor::{EvalVisitor, NoopEvalVisitor},
    flag::{CompiledFlag, Decision},
    sharder::Md5Sharder,
    Error, EvaluatorConfig, Result,
};

/// Evaluates flags published in a [`FlagStore`](crate::FlagStore).
///
/// In order to create an evaluator instance, first create [`EvaluatorConfig`].
///
/// # Examples
/// ```
/// # use std::sync::Arc;
/// # use flag_eval::{Entity, EvaluatorConfig, FlagStore, Error};
/// let store = Arc::new(FlagStore::new());
/// let evaluator = EvaluatorConfig::new(store).to_evaluator();
///
/// let result = evaluator.evaluate("unknown", &Entity::new("user-1", serde_json::json!({})));
/// assert!(matches!(result, Err(Error::FlagNotFound)));
/// ```
#[derive(Debug, Clone)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

/// Result of evaluating one flag for one entity in [`Evaluator::evaluate_batch`].
#[derive(Debug, Clone)]
pub struct BatchEvaluation {
    /// Entity id the flag was evaluated for. Differs from the input if an id was generated.
    pub entity_id: String,
    #[allow(missing_docs)]
    pub flag_key: String,
    #[allow(missing_docs)]
    pub result: Result<Decision>,
}

impl Evaluator {
    /// Create a new `Evaluator` using the specified configuration.
    pub fn new(config: EvaluatorConfig) -> Self {
        Evaluator { config }
    }

    /// Evaluate the flag identified by `flag_key` for `entity`.
    ///
    /// Returns [`Error::FlagNotFound`] if no such flag is published, and
    /// [`Error::InvalidEntityContext`] if the entity context is not an object.
    pub fn evaluate(&self, flag_key: &str, entity: &Entity) -> Result<Decision> {
        let snapshot = self.config.store.snapshot();
        let entity = self.prepare_entity(entity);
        self.evaluate_with_visitor(
            &mut NoopEvalVisitor,
            snapshot.get_by_key(flag_key).map(Arc::as_ref),
            flag_key,
            &entity,
        )
    }

    /// Evaluate the flag identified by `flag_id` for `entity`.
    pub fn evaluate_by_id(&self, flag_id: u64, entity: &Entity) -> Result<Decision> {
        let snapshot = self.config.store.snapshot();
        let Some(flag) = snapshot.get(flag_id) else {
            log::warn!(target: "flag_eval", flag_id; "evaluating a flag that is not published");
            return Err(Error::FlagNotFound);
        };
        let entity = self.prepare_entity(entity);
        self.evaluate_with_visitor(&mut NoopEvalVisitor, Some(&**flag), flag.key(), &entity)
    }

    /// Evaluate the flag identified by `flag_key` and record how the decision was made.
    pub fn evaluate_details(
        &self,
        flag_key: &str,
        entity: &Entity,
    ) -> (Result<Decision>, EvaluationDetails) {
        let snapshot = self.config.store.snapshot();
        let entity = self.prepare_entity(entity);
        let mut builder = EvalDetailsBuilder::new(flag_key.into(), &entity, Utc::now());
        let result = self.evaluate_with_visitor(
            &mut builder,
            snapshot.get_by_key(flag_key).map(Arc::as_ref),
            flag_key,
            &entity,
        );
        (result, builder.build())
    }

    /// Evaluate every flag in `flag_keys` for every entity in `entities`.
    ///
    /// Returns one result per `(entity, flag)` pair, entity-major. All pairs are evaluated
    /// against the same snapshot of the store, and an error in one pair doesn't affect others.
    pub fn evaluate_batch(
        &self,
        entities: &[Entity],
        flag_keys: &[impl AsRef<str>],
    ) -> Vec<BatchEvaluation> {
        let snapshot = self.config.store.snapshot();

        let mut results = Vec::with_capacity(entities.len() * flag_keys.len());
        for entity in entities {
            let entity = self.prepare_entity(entity);
            for flag_key in flag_keys {
                let flag_key = flag_key.as_ref();
                let result = self.evaluate_with_visitor(
                    &mut NoopEvalVisitor,
                    snapshot.get_by_key(flag_key).map(Arc::as_ref),
                    flag_key,
                    &entity,
                );
                results.push(BatchEvaluation {
                    entity_id: entity.id.clone(),
                    flag_key: flag_key.to_owned(),
                    result,
                });
            }
        }
        results
    }

    fn evaluate_with_visitor<V: EvalVisitor>(
        &self,
        visitor: &mut V,
        flag: Option<&CompiledFlag>,
        flag_key: &str,
        entity: &Entity,
    ) -> Result<Decision> {
        let result = match flag {
            Some(flag) => flag.eval(visitor, entity, &Md5Sharder),
            None => {
                let result = Err(Error::FlagNotFound);
                visitor.on_result(&result);
                result
            }
        };

        let entity_id = entity.id.as_str();
        match &result {
            Ok(decision) => {
                log::trace!(target: "flag_eval",
                            flag_key,
                            entity_id,
                            decision:serde = decision;
                            "evaluated a flag");
            }
            Err(Error::FlagNotFound) => {
                log::warn!(target: "flag_eval",
                           flag_key,
                           entity_id;
                           "evaluating a flag that is not published");
            }
            Err(err) => {
                log::warn!(target: "flag_eval",
                           flag_key,
                           entity_id;
                           "error occurred while evaluating a flag: {err}");
            }
        }

        result
    }

    /// Fill in a missing entity id and expose the id to constraints, if configured.
    fn prepare_entity<'e>(&self, entity: &'e Entity) -> Cow<'e, Entity> {
        let mut entity = Cow::Borrowed(entity);

        if entity.id.is_empty() && self.config.generate_missing_entity_id {
            let entity_id = format!("randomly_generated_{}", rand::random::<u32>());
            log::debug!(target: "flag_eval", entity_id = entity_id.as_str(); "generated entity id");
            entity.to_mut().id = entity_id;
        }

        if let Some(attribute) = &self.config.entity_id_attribute {
            let missing = matches!(
                &entity.context,
                ContextValue::Object(context) if !context.contains_key(attribute)
            );
            if missing {
                let entity = entity.to_mut();
                if let ContextValue::Object(context) = &mut entity.context {
                    context.insert(attribute.clone(), ContextValue::String(entity.id.clone()));
                }
            }
        }

        entity
    }
}
