//! Capability descriptors and the predicate that decides when two of them
//! name the same registration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wildcard accepted by [`PatternMatcher`] in place of any value.
pub const WILDCARD: &str = "*";

/// A capability descriptor published to (or targeted through) the Hub.
///
/// Selectors are structured JSON patterns, e.g.
/// `{"service": "printer", "floor": 3}`. Two selectors are considered the
/// same registration when a [`MatchPredicate`] says so, not when they are
/// structurally equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(Value);

impl Selector {
    pub fn new(pattern: Value) -> Self {
        Self(pattern)
    }

    pub fn pattern(&self) -> &Value {
        &self.0
    }

    pub fn into_pattern(self) -> Value {
        self.0
    }
}

impl From<Value> for Selector {
    fn from(v: Value) -> Self {
        Self(v)
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        Self(Value::String(s.to_string()))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decides whether two selectors denote the same registration.
///
/// Implementations must be symmetric: `matches(a, b) == matches(b, a)`.
pub trait MatchPredicate: Send + Sync + 'static {
    fn matches(&self, a: &Selector, b: &Selector) -> bool;
}

impl<F> MatchPredicate for F
where
    F: Fn(&Selector, &Selector) -> bool + Send + Sync + 'static,
{
    fn matches(&self, a: &Selector, b: &Selector) -> bool {
        self(a, b)
    }
}

/// Default predicate: structural matching with wildcards.
///
/// - `"*"` matches anything.
/// - Objects match when every key present on *both* sides matches.
/// - Arrays match element-wise and must have equal length.
/// - Any other pair matches when equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternMatcher;

impl MatchPredicate for PatternMatcher {
    fn matches(&self, a: &Selector, b: &Selector) -> bool {
        values_match(&a.0, &b.0)
    }
}

fn values_match(a: &Value, b: &Value) -> bool {
    if is_wildcard(a) || is_wildcard(b) {
        return true;
    }
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .filter_map(|(k, xv)| y.get(k).map(|yv| (xv, yv)))
            .all(|(xv, yv)| values_match(xv, yv)),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(xv, yv)| values_match(xv, yv))
        }
        _ => a == b,
    }
}

fn is_wildcard(v: &Value) -> bool {
    v.as_str() == Some(WILDCARD)
}
