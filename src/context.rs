use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing the attributes of an entity.
///
/// # Examples
/// ```
/// # use flag_eval::{ContextValue, EntityContext};
/// let context = [
///     ("age".to_owned(), 30.0.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("dl_state".to_owned(), "CA".into()),
/// ].into_iter().collect::<EntityContext>();
/// let _value = ContextValue::Object(context);
/// ```
pub type EntityContext = HashMap<String, ContextValue>;

/// A dynamically-typed value supplied by the caller.
///
/// All JSON numbers are represented as `f64`. Integers beyond 53 bits lose precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum ContextValue {
    /// A null value.
    Null,
    /// A boolean value.
    Boolean(bool),
    /// A numerical value.
    Number(f64),
    /// A string value.
    String(String),
    /// A list of values.
    Array(Vec<ContextValue>),
    /// A nested key/value mapping.
    Object(EntityContext),
}

impl ContextValue {
    /// Return the value as a number if it is numeric.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ContextValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Return the value as a string slice if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Return the value as a list if it is an array.
    pub fn as_array(&self) -> Option<&[ContextValue]> {
        match self {
            ContextValue::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Return the value as a key/value mapping if it is an object.
    pub fn as_object(&self) -> Option<&EntityContext> {
        match self {
            ContextValue::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<serde_json::Value> for ContextValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ContextValue::Null,
            serde_json::Value::Bool(b) => ContextValue::Boolean(b),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(ContextValue::Number)
                .unwrap_or(ContextValue::Null),
            serde_json::Value::String(s) => ContextValue::String(s),
            serde_json::Value::Array(values) => {
                ContextValue::Array(values.into_iter().map(ContextValue::from).collect())
            }
            serde_json::Value::Object(map) => ContextValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, ContextValue::from(value)))
                    .collect(),
            ),
        }
    }
}

/// The entity a flag is evaluated for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Entity identifier. Used for deterministic sampling unless `bucket_key` is set.
    pub id: String,
    /// Entity attributes. Must be an object to be evaluated.
    #[serde(default = "empty_context")]
    pub context: ContextValue,
    /// Replaces `id` as the input for rollout and variant bucketing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_key: Option<String>,
}

fn empty_context() -> ContextValue {
    ContextValue::Object(EntityContext::new())
}

impl Entity {
    /// Create a new entity with the given id and context.
    ///
    /// ```
    /// # use flag_eval::Entity;
    /// let entity = Entity::new("user-1", serde_json::json!({"dl_state": "CA"}));
    /// ```
    pub fn new(id: impl Into<String>, context: impl Into<ContextValue>) -> Entity {
        Entity {
            id: id.into(),
            context: context.into(),
            bucket_key: None,
        }
    }

    /// Bucket the entity by `bucket_key` instead of its id.
    pub fn with_bucket_key(mut self, bucket_key: impl Into<String>) -> Entity {
        self.bucket_key = Some(bucket_key.into());
        self
    }

    /// The string hashed for rollout and variant sampling.
    pub fn sampling_key(&self) -> &str {
        self.bucket_key.as_deref().unwrap_or(&self.id)
    }
}
