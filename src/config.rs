use std::sync::Arc;

use crate::{Evaluator, FlagStore};

/// Configuration for [`Evaluator`].
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub(crate) store: Arc<FlagStore>,
    pub(crate) entity_id_attribute: Option<String>,
    pub(crate) generate_missing_entity_id: bool,
}

impl EvaluatorConfig {
    /// Create a default configuration reading flags from `store`.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use flag_eval::{EvaluatorConfig, FlagStore};
    /// EvaluatorConfig::new(Arc::new(FlagStore::new()));
    /// ```
    pub fn new(store: Arc<FlagStore>) -> Self {
        EvaluatorConfig {
            store,
            entity_id_attribute: None,
            generate_missing_entity_id: true,
        }
    }

    /// Expose the entity id to constraints under `attribute`.
    ///
    /// The id is only added if the entity context doesn't already have `attribute`.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use flag_eval::{EvaluatorConfig, FlagStore};
    /// let evaluator = EvaluatorConfig::new(Arc::new(FlagStore::new()))
    ///     .entity_id_attribute("entity_id")
    ///     .to_evaluator();
    /// ```
    pub fn entity_id_attribute(&mut self, attribute: impl Into<String>) -> &mut Self {
        self.entity_id_attribute = Some(attribute.into());
        self
    }

    /// Whether to replace an empty entity id with a random one (`randomly_generated_<n>`).
    /// Enabled by default.
    ///
    /// When disabled, entities with an empty id are sampled on the empty string and therefore all
    /// land in the same bucket.
    pub fn generate_missing_entity_id(&mut self, enabled: bool) -> &mut Self {
        self.generate_missing_entity_id = enabled;
        self
    }

    /// Create a new [`Evaluator`] using the specified configuration.
    pub fn to_evaluator(&self) -> Evaluator {
        Evaluator::new(self.clone())
    }
}
