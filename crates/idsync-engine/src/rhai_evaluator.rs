//! Rhai expression evaluator.
//!
//! Implements [`ExpressionEvaluator`] with a fresh, sandboxed Rhai engine per
//! evaluation. Bindings are exposed as scope constants:
//!
//! | name | value |
//! |---|---|
//! | `source`, `destination` | map of attribute name to first value, or `()` |
//! | `source_values`, `destination_values` | map of attribute name to array of values |
//! | `source_attribute`, `destination_attribute` | values of the attribute being computed |
//! | `source_identifier`, `destination_identifier` | identifier string, or `()` |
//!
//! Attribute maps carry both the original and the lower-cased name, so
//! `source.telephoneNumber` and `source.telephonenumber` both resolve.

use rhai::{Array, Dynamic, Engine, Map, Scope, AST};
use serde::Serialize;
use tracing::{debug, info, warn};

use idsync_connector::{fold_case, Entity};

use crate::error::{SyncError, SyncResult};
use crate::expression::{Bindings, ExpressionEvaluator};

/// Default maximum number of operations in the Rhai engine.
const DEFAULT_MAX_OPERATIONS: u64 = 100_000;

/// Default maximum call stack depth.
const DEFAULT_MAX_CALL_STACK_DEPTH: usize = 64;

/// Default maximum string size in bytes.
const DEFAULT_MAX_STRING_SIZE: usize = 65536;

/// Default maximum array size.
const DEFAULT_MAX_ARRAY_SIZE: usize = 10_000;

/// Default maximum map size.
const DEFAULT_MAX_MAP_SIZE: usize = 10_000;

const BINDING_NAMES: [&str; 8] = [
    "source",
    "destination",
    "source_values",
    "destination_values",
    "source_attribute",
    "destination_attribute",
    "source_identifier",
    "destination_identifier",
];

/// Sandbox limits for the Rhai evaluator.
#[derive(Debug, Clone)]
pub struct RhaiEvaluatorConfig {
    /// Maximum number of operations before termination.
    pub max_operations: u64,
    /// Maximum call stack depth.
    pub max_call_stack_depth: usize,
    /// Maximum string size in bytes.
    pub max_string_size: usize,
    /// Maximum array size.
    pub max_array_size: usize,
    /// Maximum map size.
    pub max_map_size: usize,
}

impl Default for RhaiEvaluatorConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_call_stack_depth: DEFAULT_MAX_CALL_STACK_DEPTH,
            max_string_size: DEFAULT_MAX_STRING_SIZE,
            max_array_size: DEFAULT_MAX_ARRAY_SIZE,
            max_map_size: DEFAULT_MAX_MAP_SIZE,
        }
    }
}

/// A syntax problem found by [`RhaiEvaluator::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptValidationError {
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub message: String,
}

/// Rhai-based expression evaluator.
pub struct RhaiEvaluator {
    config: RhaiEvaluatorConfig,
    library: Option<AST>,
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiEvaluator {
    /// Create an evaluator with default limits and no library.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RhaiEvaluatorConfig::default(),
            library: None,
        }
    }

    /// Create an evaluator with custom limits.
    #[must_use]
    pub fn with_config(config: RhaiEvaluatorConfig) -> Self {
        Self {
            config,
            library: None,
        }
    }

    /// Compile a library script whose functions are available to every
    /// expression.
    pub fn with_library(mut self, script: &str) -> SyncResult<Self> {
        let engine = self.create_engine();
        let ast = engine
            .compile(script)
            .map_err(|e| SyncError::configuration(format!("library script: {e}")))?;
        self.library = Some(ast);
        Ok(self)
    }

    /// Create a sandboxed Rhai engine.
    fn create_engine(&self) -> Engine {
        let mut engine = Engine::new();

        engine.set_max_operations(self.config.max_operations);
        engine.set_max_call_levels(self.config.max_call_stack_depth);
        engine.set_max_string_size(self.config.max_string_size);
        engine.set_max_array_size(self.config.max_array_size);
        engine.set_max_map_size(self.config.max_map_size);
        engine.set_strict_variables(true);

        engine.register_fn("log_info", |msg: &str| {
            info!(script_log = %msg, "Expression log");
        });

        engine.register_fn("log_warn", |msg: &str| {
            warn!(script_log = %msg, "Expression warning");
        });

        engine.register_fn("log_debug", |msg: &str| {
            debug!(script_log = %msg, "Expression debug");
        });

        engine
    }

    /// Check an expression for syntax errors without evaluating it.
    #[must_use]
    pub fn validate(&self, expression: &str) -> Vec<ScriptValidationError> {
        let engine = self.create_engine();
        let mut scope = Scope::new();
        for name in BINDING_NAMES {
            scope.push_constant_dynamic(name, Dynamic::UNIT);
        }
        match engine.compile_with_scope(&scope, expression) {
            Ok(_) => vec![],
            Err(e) => vec![ScriptValidationError {
                line: e.position().line(),
                column: e.position().position(),
                message: e.to_string(),
            }],
        }
    }

    fn build_scope(bindings: &Bindings<'_>) -> Scope<'static> {
        let mut scope = Scope::new();

        scope.push_constant_dynamic("source", first_values(bindings.source));
        scope.push_constant_dynamic("destination", first_values(bindings.destination));
        scope.push_constant_dynamic("source_values", all_values(bindings.source));
        scope.push_constant_dynamic("destination_values", all_values(bindings.destination));
        scope.push_constant_dynamic("source_attribute", string_array(bindings.source_attribute));
        scope.push_constant_dynamic(
            "destination_attribute",
            string_array(bindings.destination_attribute),
        );
        scope.push_constant_dynamic("source_identifier", identifier(bindings.source));
        scope.push_constant_dynamic("destination_identifier", identifier(bindings.destination));

        scope
    }

    fn eval(&self, expression: &str, bindings: &Bindings<'_>) -> SyncResult<Dynamic> {
        let engine = self.create_engine();
        let mut scope = Self::build_scope(bindings);

        let ast = engine
            .compile_with_scope(&scope, expression)
            .map_err(|e| SyncError::evaluation(expression, format!("Compilation error: {e}")))?;
        let ast = match &self.library {
            Some(library) => library.merge(&ast),
            None => ast,
        };

        engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| SyncError::evaluation(expression, format!("Runtime error: {e}")))
    }
}

impl ExpressionEvaluator for RhaiEvaluator {
    fn eval_bool(&self, expression: &str, bindings: &Bindings<'_>) -> SyncResult<bool> {
        let value = self.eval(expression, bindings)?;
        if value.is_bool() {
            return value
                .as_bool()
                .map_err(|t| SyncError::evaluation(expression, format!("expected bool, got {t}")));
        }
        if value.is_string() {
            let text = value.to_string();
            if text.eq_ignore_ascii_case("true") {
                return Ok(true);
            }
            if text.eq_ignore_ascii_case("false") {
                return Ok(false);
            }
        }
        Err(SyncError::evaluation(
            expression,
            format!("expected a boolean, got {}", value.type_name()),
        ))
    }

    fn eval_string_list(
        &self,
        expression: &str,
        bindings: &Bindings<'_>,
    ) -> SyncResult<Vec<String>> {
        let value = self.eval(expression, bindings)?;
        Ok(to_string_list(value))
    }
}

fn to_string_list(value: Dynamic) -> Vec<String> {
    if value.is_unit() {
        return Vec::new();
    }
    if value.is_array() {
        return value
            .into_array()
            .unwrap_or_default()
            .into_iter()
            .filter(|item| !item.is_unit())
            .map(|item| item.to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    let text = value.to_string();
    if text.is_empty() {
        Vec::new()
    } else {
        vec![text]
    }
}

fn first_values(entity: Option<&Entity>) -> Dynamic {
    let Some(entity) = entity else {
        return Dynamic::UNIT;
    };
    let mut map = Map::new();
    for attribute in entity.attributes() {
        let value: Dynamic = attribute.first_value().map_or(Dynamic::UNIT, Dynamic::from);
        map.insert(fold_case(attribute.name()).into(), value.clone());
        map.insert(attribute.name().into(), value);
    }
    Dynamic::from_map(map)
}

fn all_values(entity: Option<&Entity>) -> Dynamic {
    let mut map = Map::new();
    if let Some(entity) = entity {
        for attribute in entity.attributes() {
            let values = string_array(&attribute.string_values());
            map.insert(fold_case(attribute.name()).into(), values.clone());
            map.insert(attribute.name().into(), values);
        }
    }
    Dynamic::from_map(map)
}

fn string_array(values: &[String]) -> Dynamic {
    let array: Array = values.iter().cloned().map(Dynamic::from).collect();
    Dynamic::from_array(array)
}

fn identifier(entity: Option<&Entity>) -> Dynamic {
    entity
        .and_then(Entity::identifier)
        .map_or(Dynamic::UNIT, |id| Dynamic::from(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Entity {
        Entity::new("uid=alice,ou=people")
            .with("uid", ["alice"])
            .with("telephoneNumber", ["111", "222"])
    }

    #[test]
    fn test_string_concatenation_over_source() {
        let evaluator = RhaiEvaluator::new();
        let entity = alice();
        let values = evaluator
            .eval_string_list(r#""uid=" + source.uid"#, &Bindings::source(&entity))
            .unwrap();
        assert_eq!(values, vec!["uid=alice"]);
    }

    #[test]
    fn test_case_insensitive_attribute_access() {
        let evaluator = RhaiEvaluator::new();
        let entity = alice();
        let bindings = Bindings::source(&entity);
        assert_eq!(
            evaluator.eval_string_list("source.telephonenumber", &bindings).unwrap(),
            vec!["111"]
        );
        assert_eq!(
            evaluator
                .eval_string_list("source_values.telephoneNumber", &bindings)
                .unwrap(),
            vec!["111", "222"]
        );
    }

    #[test]
    fn test_bool_results() {
        let evaluator = RhaiEvaluator::new();
        let entity = alice();
        let bindings = Bindings::pair(None, Some(&entity));
        assert!(evaluator
            .eval_bool(r#"destination.uid == "alice""#, &bindings)
            .unwrap());
        assert!(evaluator.eval_bool(r#"type_of(source) == "()""#, &bindings).unwrap());
        assert!(!evaluator.eval_bool(r#""FALSE""#, &bindings).unwrap());

        let err = evaluator.eval_bool("42", &bindings).unwrap_err();
        assert_eq!(err.kind(), "evaluation");
    }

    #[test]
    fn test_unit_and_empty_results_are_empty_lists() {
        let evaluator = RhaiEvaluator::new();
        let bindings = Bindings::default();
        assert!(evaluator.eval_string_list("()", &bindings).unwrap().is_empty());
        assert!(evaluator.eval_string_list(r#""""#, &bindings).unwrap().is_empty());
        assert_eq!(
            evaluator.eval_string_list(r#"["a", (), "", 3]"#, &bindings).unwrap(),
            vec!["a", "3"]
        );
    }

    #[test]
    fn test_attribute_bindings() {
        let evaluator = RhaiEvaluator::new();
        let src = vec!["x".to_string()];
        let dst = vec!["y".to_string(), "z".to_string()];
        let bindings = Bindings::default().with_attribute(&src, &dst);
        assert_eq!(
            evaluator
                .eval_string_list("destination_attribute + source_attribute", &bindings)
                .unwrap(),
            vec!["y", "z", "x"]
        );
    }

    #[test]
    fn test_library_functions_are_available() {
        let evaluator = RhaiEvaluator::new()
            .with_library(r#"fn mail_of(uid) { uid + "@example.com" }"#)
            .unwrap();
        let entity = alice();
        assert_eq!(
            evaluator
                .eval_string_list("mail_of(source.uid)", &Bindings::source(&entity))
                .unwrap(),
            vec!["alice@example.com"]
        );

        assert!(RhaiEvaluator::new().with_library("fn broken(").is_err());
    }

    #[test]
    fn test_undefined_variable_is_evaluation_error() {
        let evaluator = RhaiEvaluator::new();
        let err = evaluator
            .eval_string_list("srce.uid", &Bindings::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::Evaluation { .. }));
    }

    #[test]
    fn test_runaway_script_is_stopped() {
        let evaluator = RhaiEvaluator::new();
        let err = evaluator
            .eval_bool("let x = 0; loop { x += 1; }", &Bindings::default())
            .unwrap_err();
        assert_eq!(err.kind(), "evaluation");
    }

    #[test]
    fn test_validate_reports_position() {
        let evaluator = RhaiEvaluator::new();
        assert!(evaluator.validate(r#""uid=" + source.uid"#).is_empty());

        let errors = evaluator.validate("source.uid +");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, Some(1));
    }
}
