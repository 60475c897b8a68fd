//! Expression evaluation capability.
//!
//! Conditions and value expressions in a [`Policy`](crate::policy::Policy)
//! are evaluated through [`ExpressionEvaluator`] against named [`Bindings`].
//! The engine ships a Rhai implementation; any evaluator producing booleans
//! and string lists over the same bindings can replace it.

use std::fmt;

use idsync_connector::Entity;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;

/// Names under which bindings are exposed to expressions.
pub const SOURCE: &str = "source";
pub const DESTINATION: &str = "destination";

/// Named values visible to one evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bindings<'a> {
    pub source: Option<&'a Entity>,
    pub destination: Option<&'a Entity>,
    /// Source values of the attribute being computed.
    pub source_attribute: &'a [String],
    /// Destination values of the attribute being computed.
    pub destination_attribute: &'a [String],
}

impl<'a> Bindings<'a> {
    #[must_use]
    pub fn source(entity: &'a Entity) -> Self {
        Self {
            source: Some(entity),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn destination(entity: Option<&'a Entity>) -> Self {
        Self {
            destination: entity,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn pair(source: Option<&'a Entity>, destination: Option<&'a Entity>) -> Self {
        Self {
            source,
            destination,
            ..Self::default()
        }
    }

    /// Bind the per-attribute value lists.
    #[must_use]
    pub fn with_attribute(self, source: &'a [String], destination: &'a [String]) -> Self {
        Self {
            source_attribute: source,
            destination_attribute: destination,
            ..self
        }
    }
}

/// Boolean and string-list evaluation over named bindings.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate a boolean expression.
    fn eval_bool(&self, expression: &str, bindings: &Bindings<'_>) -> SyncResult<bool>;

    /// Evaluate an expression producing zero or more string values.
    fn eval_string_list(&self, expression: &str, bindings: &Bindings<'_>)
        -> SyncResult<Vec<String>>;

    /// Whether `expression` mentions the binding `name` or one derived
    /// from it (`name_values`, `name_identifier`, ...).
    fn references(&self, expression: &str, name: &str) -> bool {
        references_identifier(expression, name)
    }
}

/// Scan for `name`, or an identifier prefixed with `name_`, outside string
/// literals.
pub fn references_identifier(expression: &str, name: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let matches = |word: &str| {
        word.strip_prefix(name)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('_'))
    };
    let mut quote: Option<char> = None;
    let mut word = String::new();
    let mut escaped = false;

    for c in expression.chars().chain(std::iter::once(' ')) {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if is_ident(c) {
            word.push(c);
            continue;
        }
        if matches(&word) {
            return true;
        }
        word.clear();
        if c == '"' || c == '\'' || c == '`' {
            quote = Some(c);
        }
    }
    false
}

/// A gating condition: a literal or an expression.
///
/// Literal `true`/`false` never reach the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawCondition", into = "String")]
pub enum Condition {
    #[default]
    Always,
    Never,
    Expression(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCondition {
    Literal(bool),
    Text(String),
}

impl From<RawCondition> for Condition {
    fn from(raw: RawCondition) -> Self {
        match raw {
            RawCondition::Literal(true) => Condition::Always,
            RawCondition::Literal(false) => Condition::Never,
            RawCondition::Text(text) => Condition::from(text.as_str()),
        }
    }
}

impl From<&str> for Condition {
    fn from(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            Condition::Always
        } else if trimmed.eq_ignore_ascii_case("false") {
            Condition::Never
        } else {
            Condition::Expression(trimmed.to_string())
        }
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.to_string()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => f.write_str("true"),
            Condition::Never => f.write_str("false"),
            Condition::Expression(expr) => f.write_str(expr),
        }
    }
}

impl Condition {
    /// Evaluate the condition, consulting the evaluator only for expressions.
    pub fn evaluate(
        &self,
        evaluator: &dyn ExpressionEvaluator,
        bindings: &Bindings<'_>,
    ) -> SyncResult<bool> {
        match self {
            Condition::Always => Ok(true),
            Condition::Never => Ok(false),
            Condition::Expression(expr) => evaluator.eval_bool(expr, bindings),
        }
    }

    /// Whether the condition mentions the binding `name`.
    pub fn references(&self, evaluator: &dyn ExpressionEvaluator, name: &str) -> bool {
        match self {
            Condition::Expression(expr) => evaluator.references(expr, name),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEvaluator {
        calls: AtomicUsize,
    }

    impl ExpressionEvaluator for CountingEvaluator {
        fn eval_bool(&self, _expression: &str, _bindings: &Bindings<'_>) -> SyncResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        fn eval_string_list(
            &self,
            _expression: &str,
            _bindings: &Bindings<'_>,
        ) -> SyncResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_literal_conditions_bypass_evaluator() {
        let evaluator = CountingEvaluator {
            calls: AtomicUsize::new(0),
        };
        let bindings = Bindings::default();

        assert!(Condition::from("TRUE").evaluate(&evaluator, &bindings).unwrap());
        assert!(!Condition::from(" false ").evaluate(&evaluator, &bindings).unwrap());
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);

        assert!(Condition::from("destination.active == \"yes\"")
            .evaluate(&evaluator, &bindings)
            .unwrap());
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_condition_deserializes_from_bool_and_string() {
        let parsed: Vec<Condition> =
            serde_json::from_str(r#"[true, false, "source.uid != \"\""]"#).unwrap();
        assert_eq!(parsed[0], Condition::Always);
        assert_eq!(parsed[1], Condition::Never);
        assert_eq!(parsed[2], Condition::Expression("source.uid != \"\"".to_string()));
    }

    #[test]
    fn test_references_identifier() {
        assert!(references_identifier("destination.cn == \"x\"", DESTINATION));
        assert!(references_identifier("!is_empty(destination)", DESTINATION));
        assert!(references_identifier("destination_values.cn.len() > 0", DESTINATION));
        assert!(references_identifier(
            "destination_identifier.starts_with(\"uid=temp\")",
            DESTINATION
        ));
        assert!(references_identifier("destination_attribute.len() == 0", DESTINATION));
        assert!(!references_identifier("destinations.len() > 0", DESTINATION));
        assert!(!references_identifier("source_values.cn == \"destination_x\"", DESTINATION));
        assert!(!references_identifier("source.desc == \"destination\"", DESTINATION));
        assert!(!references_identifier("true", DESTINATION));
    }
}
