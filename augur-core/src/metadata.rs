//! Metadata matching: a small conjunctive predicate language over events.
//!
//! A [`MetadataMatcher`] is a list of constraints, all of which must hold
//! (AND-only; there is no disjunction). Each constraint targets either a
//! metadata key or a built-in event property and applies one of nine
//! operators. Matchers are how per-aggregate or per-type filtering works
//! inside a shared physical stream without separate storage.
//!
//! Operator/value combinations are validated when the constraint is added,
//! so an invalid matcher cannot be constructed. Comparisons between
//! heterogeneous value types are false rather than errors.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::event::RecordedEvent;

/// Comparison operator for a single constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Equals,
    /// `≠`
    NotEquals,
    /// `<`
    LowerThan,
    /// `≤`
    LowerThanEquals,
    /// `>`
    GreaterThan,
    /// `≥`
    GreaterThanEquals,
    /// Membership in a value list.
    In,
    /// Absence from a value list.
    NotIn,
    /// Regular-expression match over string values.
    Regex,
}

/// Built-in event properties addressable by a constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Property {
    /// The event's unique id, compared as its string form.
    EventId,
    /// The event name.
    EventName,
    /// The store-assigned version.
    Version,
    /// The occurrence timestamp, compared as epoch milliseconds.
    CreatedAt,
}

/// What a constraint inspects: a metadata key or a built-in property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    /// A metadata entry by key.
    Metadata(String),
    /// A built-in event property.
    Property(Property),
}

impl Field {
    /// Convenience constructor for a metadata field.
    #[must_use]
    pub fn metadata(key: impl Into<String>) -> Self {
        Self::Metadata(key.into())
    }
}

/// The comparison value supplied with a constraint.
#[derive(Clone, Debug)]
pub enum MatchValue {
    /// A single scalar, for the comparison operators.
    Scalar(Value),
    /// A list of values, for `in`/`not-in`.
    List(Vec<Value>),
    /// A regex pattern source, for `regex`.
    Pattern(String),
}

/// Error raised when an operator/value combination is invalid.
#[derive(Debug, Error)]
pub enum MatcherError {
    /// The operator needs a single scalar value.
    #[error("operator `{0:?}` requires a single scalar value")]
    ScalarRequired(Operator),
    /// `in`/`not-in` need a value list.
    #[error("operator `{0:?}` requires a list of values")]
    ListRequired(Operator),
    /// `regex` needs a pattern.
    #[error("operator `Regex` requires a pattern value")]
    PatternRequired,
    /// The pattern did not compile.
    #[error("invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    /// Null is not a matchable scalar.
    #[error("null is not a matchable value")]
    NullValue,
}

#[derive(Clone, Debug)]
enum Expected {
    Scalar(Value),
    List(Vec<Value>),
    Pattern(Regex),
}

#[derive(Clone, Debug)]
struct Constraint {
    field: Field,
    operator: Operator,
    expected: Expected,
}

impl Constraint {
    fn new(field: Field, operator: Operator, value: MatchValue) -> Result<Self, MatcherError> {
        let expected = match (operator, value) {
            (Operator::Regex, MatchValue::Pattern(source)) => {
                Expected::Pattern(Regex::new(&source)?)
            }
            (Operator::Regex, _) => return Err(MatcherError::PatternRequired),
            (Operator::In | Operator::NotIn, MatchValue::List(values)) => Expected::List(values),
            (op @ (Operator::In | Operator::NotIn), _) => {
                return Err(MatcherError::ListRequired(op));
            }
            (_, MatchValue::Scalar(Value::Null)) => return Err(MatcherError::NullValue),
            (_, MatchValue::Scalar(value)) => Expected::Scalar(value),
            (op, _) => return Err(MatcherError::ScalarRequired(op)),
        };
        Ok(Self {
            field,
            operator,
            expected,
        })
    }

    fn matches(&self, event: &RecordedEvent) -> bool {
        let actual = match &self.field {
            Field::Metadata(key) => match event.metadata_value(key) {
                Some(value) => value.clone(),
                None => return false,
            },
            Field::Property(property) => property_value(*property, event),
        };

        match (&self.expected, self.operator) {
            (Expected::Scalar(expected), Operator::Equals) => actual == *expected,
            (Expected::Scalar(expected), Operator::NotEquals) => actual != *expected,
            (Expected::Scalar(expected), Operator::LowerThan) => {
                compare(&actual, expected) == Some(Ordering::Less)
            }
            (Expected::Scalar(expected), Operator::LowerThanEquals) => matches!(
                compare(&actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            (Expected::Scalar(expected), Operator::GreaterThan) => {
                compare(&actual, expected) == Some(Ordering::Greater)
            }
            (Expected::Scalar(expected), Operator::GreaterThanEquals) => matches!(
                compare(&actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            (Expected::List(values), Operator::In) => values.contains(&actual),
            (Expected::List(values), Operator::NotIn) => !values.contains(&actual),
            (Expected::Pattern(pattern), Operator::Regex) => {
                actual.as_str().is_some_and(|s| pattern.is_match(s))
            }
            // Constraint::new rules out every other combination.
            _ => false,
        }
    }
}

fn property_value(property: Property, event: &RecordedEvent) -> Value {
    match property {
        Property::EventId => Value::String(event.id.to_string()),
        Property::EventName => Value::String(event.name.clone()),
        Property::Version => Value::from(event.version),
        Property::CreatedAt => Value::from(event.created_at.timestamp_millis()),
    }
}

/// Order two JSON scalars when they are of comparable types.
///
/// Numbers compare numerically, strings lexicographically; everything else
/// (including mixed types) is incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Conjunctive predicate over event metadata and built-in properties.
#[derive(Clone, Debug, Default)]
pub struct MetadataMatcher {
    constraints: Vec<Constraint>,
}

impl MetadataMatcher {
    /// Create a matcher with no constraints (matches every event).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constraint; all constraints must hold for an event to match.
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError`] when the operator/value combination is
    /// invalid (see the variant docs).
    pub fn and(
        mut self,
        field: Field,
        operator: Operator,
        value: MatchValue,
    ) -> Result<Self, MatcherError> {
        self.constraints.push(Constraint::new(field, operator, value)?);
        Ok(self)
    }

    /// Shorthand for an equality constraint on a metadata key.
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError::NullValue`] when `value` is null.
    pub fn and_metadata_eq(self, key: impl Into<String>, value: Value) -> Result<Self, MatcherError> {
        self.and(
            Field::Metadata(key.into()),
            Operator::Equals,
            MatchValue::Scalar(value),
        )
    }

    /// Whether every constraint holds for `event`.
    #[must_use]
    pub fn matches(&self, event: &RecordedEvent) -> bool {
        self.constraints.iter().all(|c| c.matches(event))
    }

    /// Number of constraints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Whether the matcher has no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}
