//! The decision core of a feature-flag and experimentation service.
//!
//! # Overview
//!
//! A [`Flag`](models::Flag) is loaded from storage by the caller and compiled once with
//! [`prepare`] into an immutable [`CompiledFlag`]. Evaluating a compiled flag for an [`Entity`]
//! walks its segments in rank order. The first segment that passes the rollout gate, matches all
//! of its constraints, and buckets the entity into a variant decides the [`Decision`].
//!
//! Sampling is deterministic: the same entity always lands in the same bucket of the same segment,
//! on any instance, with no per-entity state.
//!
//! For serving traffic, compiled flags are published into a [`FlagStore`] and evaluated through an
//! [`Evaluator`] created from [`EvaluatorConfig`]. Publication is copy-on-write, so evaluations
//! never see a partially updated flag.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Errors returned by [`prepare`] mean the flag definition is invalid and must not be served. The
//! store keeps the previously published version in that case. Evaluation errors only affect a
//! single call.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `flag_eval`
//! target for logging messages. Consider integrating a `log`-compatible logger implementation for
//! better visibility into flag publication and evaluation.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use flag_eval::{models::Flag, Entity, EvaluatorConfig, FlagStore};
//! let flag: Flag = serde_json::from_str(r#"{
//!     "id": 1,
//!     "key": "new_checkout",
//!     "enabled": true,
//!     "segments": [{
//!         "id": 1,
//!         "rank": 0,
//!         "rolloutPercent": 100,
//!         "constraints": [{"property": "dl_state", "operator": "EQ", "value": "\"CA\""}],
//!         "distributions": [{"variantId": 1, "percent": 100}]
//!     }],
//!     "variants": [{"id": 1, "key": "on"}]
//! }"#).unwrap();
//!
//! let store = Arc::new(FlagStore::new());
//! store.publish(&[flag]).unwrap();
//!
//! let evaluator = EvaluatorConfig::new(store).to_evaluator();
//! let entity = Entity::new("user-1", serde_json::json!({"dl_state": "CA"}));
//! let decision = evaluator.evaluate("new_checkout", &entity).unwrap();
//! assert!(decision.is_matched());
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod models;

mod config;
mod constraint;
mod constraint_set;
mod context;
mod distribution;
mod error;
mod eval_details;
mod eval_details_builder;
mod eval_visitor;
mod evaluator;
mod flag;
mod flag_store;
mod segment;
mod sharder;
mod str;

pub use config::EvaluatorConfig;
pub use constraint::{CompiledConstraint, Operator, Predicate, Scalar, ScalarSet};
pub use constraint_set::ConstraintSet;
pub use context::{ContextValue, Entity, EntityContext};
pub use distribution::{DistributionTable, PERCENT_MULTIPLIER, TOTAL_BUCKETS};
pub use error::{Error, Result};
pub use eval_details::{
    ConstraintEvaluationDetails, DecisionReason, EvaluationDetails, SegmentEvaluationDetails,
    SegmentEvaluationResult,
};
pub use evaluator::{BatchEvaluation, Evaluator};
pub use flag::{prepare, Assignment, CompiledFlag, Decision};
pub use flag_store::{FlagSnapshot, FlagStore};
pub use segment::{CompiledSegment, CompiledVariant};
pub use sharder::{Md5Sharder, Sharder};
pub use str::Str;
