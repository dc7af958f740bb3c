//! Constraint compilation and evaluation.
//!
//! A [`Constraint`] is compiled once into a [`CompiledConstraint`]: the operator is resolved, the
//! JSON value is parsed into a typed target, and regexes are built. Evaluation then only matches on
//! the [`Predicate`] tag and never fails.
//!
//! Type mismatches between the context value and the target are not errors. A positive operator
//! (`EQ`, `EREG`, `IN`, `CONTAINS`) does not match, and its negated counterpart (`NEQ`, `NEREG`,
//! `NOTIN`, `NOTCONTAINS`) does. Ordering operators (`LT`, `LTE`, `GT`, `GTE`) never match a
//! non-numeric value. Numeric strings are not coerced.
use std::{collections::HashSet, fmt, str::FromStr};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    context::{ContextValue, EntityContext},
    models::Constraint,
    Error, Result, Str,
};

/// Constraint operator vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    /// Equal. Value must be a number, string, or boolean.
    Eq,
    /// Not equal. Value must be a number, string, or boolean.
    Neq,
    /// Less than. Value must be a number.
    Lt,
    /// Less than or equal. Value must be a number.
    Lte,
    /// Greater than. Value must be a number.
    Gt,
    /// Greater than or equal. Value must be a number.
    Gte,
    /// Matches regex. Value must be a string holding the pattern.
    Ereg,
    /// Does not match regex. Value must be a string holding the pattern.
    Nereg,
    /// One of. Value must be an array of numbers or an array of strings.
    In,
    /// Not one of. Value must be an array of numbers or an array of strings.
    NotIn,
    /// Context array contains the value. Value must be a number or a string.
    Contains,
    /// Context array does not contain the value. Value must be a number or a string.
    NotContains,
}

impl Operator {
    /// All supported operators.
    pub const ALL: [Operator; 12] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
        Operator::Ereg,
        Operator::Nereg,
        Operator::In,
        Operator::NotIn,
        Operator::Contains,
        Operator::NotContains,
    ];

    /// Wire name of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "EQ",
            Operator::Neq => "NEQ",
            Operator::Lt => "LT",
            Operator::Lte => "LTE",
            Operator::Gt => "GT",
            Operator::Gte => "GTE",
            Operator::Ereg => "EREG",
            Operator::Nereg => "NEREG",
            Operator::In => "IN",
            Operator::NotIn => "NOTIN",
            Operator::Contains => "CONTAINS",
            Operator::NotContains => "NOTCONTAINS",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Operator> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| Error::UnsupportedOperator(s.to_owned()))
    }
}

/// A single comparison target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Compared against numeric context values.
    Number(f64),
    /// Compared against string context values.
    String(String),
    /// Compared against boolean context values.
    Boolean(bool),
}

impl Scalar {
    fn from_json(value: serde_json::Value) -> Option<Scalar> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(Scalar::Number),
            serde_json::Value::String(s) => Some(Scalar::String(s)),
            serde_json::Value::Bool(b) => Some(Scalar::Boolean(b)),
            _ => None,
        }
    }

    /// Exact typed equality. Values of a different type never match.
    fn matches(&self, value: &ContextValue) -> bool {
        match (self, value) {
            (Scalar::Number(target), ContextValue::Number(v)) => v == target,
            (Scalar::String(target), ContextValue::String(v)) => v == target,
            (Scalar::Boolean(target), ContextValue::Boolean(v)) => v == target,
            _ => false,
        }
    }
}

/// Homogeneous target set of `IN`/`NOTIN`.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarSet {
    /// Numbers. Only numeric context values can be members.
    Numbers(Box<[f64]>),
    /// Strings. Only string context values can be members.
    Strings(HashSet<String>),
}

impl ScalarSet {
    fn from_json(values: Vec<serde_json::Value>) -> Option<ScalarSet> {
        match values.first() {
            None => Some(ScalarSet::Strings(HashSet::new())),
            Some(serde_json::Value::Number(_)) => values
                .iter()
                .map(serde_json::Value::as_f64)
                .collect::<Option<Box<[f64]>>>()
                .map(ScalarSet::Numbers),
            Some(serde_json::Value::String(_)) => values
                .into_iter()
                .map(|value| match value {
                    serde_json::Value::String(s) => Some(s),
                    _ => None,
                })
                .collect::<Option<HashSet<String>>>()
                .map(ScalarSet::Strings),
            Some(_) => None,
        }
    }

    fn contains(&self, value: &ContextValue) -> bool {
        match (self, value) {
            (ScalarSet::Numbers(targets), ContextValue::Number(v)) => targets.contains(v),
            (ScalarSet::Strings(targets), ContextValue::String(v)) => targets.contains(v),
            _ => false,
        }
    }
}

/// Compiled form of a constraint operator and its parsed value.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum Predicate {
    Eq(Scalar),
    Neq(Scalar),
    Lt(f64),
    Lte(f64),
    Gt(f64),
    Gte(f64),
    Ereg(Regex),
    Nereg(Regex),
    In(ScalarSet),
    NotIn(ScalarSet),
    Contains(Scalar),
    NotContains(Scalar),
}

impl Predicate {
    /// Operator this predicate was compiled from.
    pub fn operator(&self) -> Operator {
        match self {
            Predicate::Eq(_) => Operator::Eq,
            Predicate::Neq(_) => Operator::Neq,
            Predicate::Lt(_) => Operator::Lt,
            Predicate::Lte(_) => Operator::Lte,
            Predicate::Gt(_) => Operator::Gt,
            Predicate::Gte(_) => Operator::Gte,
            Predicate::Ereg(_) => Operator::Ereg,
            Predicate::Nereg(_) => Operator::Nereg,
            Predicate::In(_) => Operator::In,
            Predicate::NotIn(_) => Operator::NotIn,
            Predicate::Contains(_) => Operator::Contains,
            Predicate::NotContains(_) => Operator::NotContains,
        }
    }

    fn compile(
        constraint: &Constraint,
        operator: Operator,
        target: serde_json::Value,
    ) -> Result<Predicate> {
        let unsupported = || Error::UnsupportedValueType {
            property: constraint.property.clone(),
            operator,
            value: constraint.value.clone(),
        };

        let predicate = match operator {
            Operator::Eq => Predicate::Eq(Scalar::from_json(target).ok_or_else(unsupported)?),
            Operator::Neq => Predicate::Neq(Scalar::from_json(target).ok_or_else(unsupported)?),
            Operator::Lt => Predicate::Lt(target.as_f64().ok_or_else(unsupported)?),
            Operator::Lte => Predicate::Lte(target.as_f64().ok_or_else(unsupported)?),
            Operator::Gt => Predicate::Gt(target.as_f64().ok_or_else(unsupported)?),
            Operator::Gte => Predicate::Gte(target.as_f64().ok_or_else(unsupported)?),
            Operator::Ereg | Operator::Nereg => {
                let serde_json::Value::String(pattern) = target else {
                    return Err(unsupported());
                };
                let regex = Regex::new(&pattern).map_err(|source| Error::RegexCompileError {
                    property: constraint.property.clone(),
                    source,
                })?;
                if operator == Operator::Ereg {
                    Predicate::Ereg(regex)
                } else {
                    Predicate::Nereg(regex)
                }
            }
            Operator::In | Operator::NotIn => {
                let serde_json::Value::Array(values) = target else {
                    return Err(unsupported());
                };
                let set = ScalarSet::from_json(values).ok_or_else(unsupported)?;
                if operator == Operator::In {
                    Predicate::In(set)
                } else {
                    Predicate::NotIn(set)
                }
            }
            Operator::Contains | Operator::NotContains => {
                let scalar = match Scalar::from_json(target) {
                    Some(Scalar::Boolean(_)) | None => return Err(unsupported()),
                    Some(scalar) => scalar,
                };
                if operator == Operator::Contains {
                    Predicate::Contains(scalar)
                } else {
                    Predicate::NotContains(scalar)
                }
            }
        };
        Ok(predicate)
    }

    /// Apply the predicate to a present context value.
    fn eval(&self, value: &ContextValue) -> bool {
        match self {
            Predicate::Eq(target) => target.matches(value),
            Predicate::Neq(target) => !target.matches(value),
            Predicate::Lt(target) => value.as_number().is_some_and(|v| v < *target),
            Predicate::Lte(target) => value.as_number().is_some_and(|v| v <= *target),
            Predicate::Gt(target) => value.as_number().is_some_and(|v| v > *target),
            Predicate::Gte(target) => value.as_number().is_some_and(|v| v >= *target),
            Predicate::Ereg(regex) => value.as_str().is_some_and(|s| regex.is_match(s)),
            Predicate::Nereg(regex) => !value.as_str().is_some_and(|s| regex.is_match(s)),
            Predicate::In(targets) => targets.contains(value),
            Predicate::NotIn(targets) => !targets.contains(value),
            Predicate::Contains(target) => array_contains(value, target),
            Predicate::NotContains(target) => !array_contains(value, target),
        }
    }
}

fn array_contains(value: &ContextValue, target: &Scalar) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().any(|item| target.matches(item)))
}

/// A constraint ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledConstraint {
    property: Str,
    predicate: Predicate,
}

impl CompiledConstraint {
    /// Compile `constraint`, validating its operator and value.
    pub fn compile(constraint: &Constraint) -> Result<CompiledConstraint> {
        let Constraint {
            property,
            operator,
            value,
            ..
        } = constraint;

        if property.is_empty() || operator.is_empty() || value.trim().is_empty() {
            return Err(Error::InvalidConstraint {
                property: property.clone(),
                operator: operator.clone(),
                value: value.clone(),
            });
        }

        let operator: Operator = operator.parse()?;

        let target: serde_json::Value = serde_json::from_str(value.trim())
            .map_err(|err| Error::invalid_value(property, err))?;

        let predicate = Predicate::compile(constraint, operator, target)?;

        Ok(CompiledConstraint {
            property: property.as_str().into(),
            predicate,
        })
    }

    /// Context key this constraint reads.
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Compiled operator and target.
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Evaluate the constraint against an entity context.
    ///
    /// Fails only if `entity_context` is not an object. A missing property never matches.
    pub fn matches(&self, entity_context: &ContextValue) -> Result<bool> {
        let context = entity_context
            .as_object()
            .ok_or(Error::InvalidEntityContext)?;
        Ok(self.eval(context))
    }

    pub(crate) fn lookup<'a>(&self, context: &'a EntityContext) -> Option<&'a ContextValue> {
        context.get(self.property())
    }

    pub(crate) fn eval_value(&self, value: Option<&ContextValue>) -> bool {
        value.is_some_and(|value| self.predicate.eval(value))
    }

    pub(crate) fn eval(&self, context: &EntityContext) -> bool {
        self.eval_value(self.lookup(context))
    }
}
