use std::sync::Arc;

use crate::constraint::Operator;

/// Represents a result type for operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur while preparing or evaluating a flag.
///
/// Preparation errors (everything but [`Error::InvalidEntityContext`] and [`Error::FlagNotFound`])
/// mean that the flag definition must not be published to evaluation traffic.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Constraint has an empty property, operator, or value.
    #[error("empty Property/Operator/Value: {property}/{operator}/{value}")]
    InvalidConstraint {
        /// Constraint property.
        property: String,
        /// Constraint operator.
        operator: String,
        /// Constraint value.
        value: String,
    },

    /// Constraint operator is not part of the supported vocabulary.
    #[error("not supported operator: {0}")]
    UnsupportedOperator(String),

    /// Constraint value is not valid JSON.
    #[error("invalid constraint value for {property:?}, note: strings must be wrapped with quotes \"...\"")]
    InvalidConstraintValue {
        /// Constraint property.
        property: String,
        /// Underlying parse error.
        // serde_json::Error is not clonable, so we're wrapping it in an Arc.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// Constraint value decoded to a type the operator does not accept.
    #[error("unsupported value type for {operator} on {property:?}: {value}")]
    UnsupportedValueType {
        /// Constraint property.
        property: String,
        /// Constraint operator.
        operator: Operator,
        /// Constraint value as it was supplied.
        value: String,
    },

    /// Regex operator value failed to compile.
    #[error("invalid constraint regex for {property:?}")]
    RegexCompileError {
        /// Constraint property.
        property: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// Rollout or distribution percent is outside of `[0, 100]`.
    #[error("invalid percent {percent} in segment {segment_id}")]
    InvalidPercent {
        /// Segment that holds the percent.
        segment_id: u64,
        /// The offending value.
        percent: f64,
    },

    /// Distribution references a variant that the flag does not declare.
    #[error("distribution in segment {segment_id} references unknown variant {variant_id}")]
    UnknownVariant {
        /// Segment that holds the distribution.
        segment_id: u64,
        /// Referenced variant id.
        variant_id: u64,
    },

    /// Entity context supplied for evaluation is not a key/value mapping.
    #[error("invalid entity_context, expected an object")]
    InvalidEntityContext,

    /// The requested flag is not published.
    #[error("flag not found")]
    FlagNotFound,
}

impl Error {
    /// Return `true` if the error was produced while preparing a flag for evaluation.
    pub fn is_prepare_error(&self) -> bool {
        !matches!(self, Error::InvalidEntityContext | Error::FlagNotFound)
    }

    pub(crate) fn invalid_value(property: &str, source: serde_json::Error) -> Error {
        Error::InvalidConstraintValue {
            property: property.to_owned(),
            source: Arc::new(source),
        }
    }
}
