//! Node `condition` gates, evaluated as JEXL expressions.
//!
//! An expression sees exactly two names: `outputs` (every recorded node
//! output, keyed by node id) and `global_context`. Both support dot access
//! (`outputs.tests.failed`) and bracket access (`outputs['tests']`).
//! JEXL provides `&&`, `||`, comparisons, `in`, arithmetic and ternaries.
//! Helpers are registered as transforms and applied with `|`:
//!
//! | transform | meaning |
//! |---|---|
//! | `x\|len` | length of a string, array or object |
//! | `xs\|any`, `xs\|all` | truthiness of any / all elements |
//! | `x\|bool`, `x\|not` | truthiness and its negation |
//! | `x\|int`, `x\|float`, `x\|str` | type coercion (`null` when impossible) |
//! | `obj\|get('key', default)` | lookup with a fallback |
//!
//! Every number in scope is converted to a float before evaluation, so
//! `outputs.tests.failed == 0` holds for an integer `0` output. The final
//! value is reduced with [`truthy`].
//!
//! ```
//! use std::collections::HashMap;
//! use serde_json::{json, Map};
//! use engine::ConditionEvaluator;
//!
//! let mut outputs = HashMap::new();
//! outputs.insert("tests".to_string(), json!({ "passed": 42, "failed": 0 }));
//!
//! let evaluator = ConditionEvaluator::new();
//! let run = evaluator
//!     .evaluate("outputs.tests.failed == 0 && outputs|len > 0", &outputs, &Map::new())
//!     .unwrap();
//! assert!(run);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::{json, Map, Value};
use thiserror::Error;

/// Longest accepted expression, in bytes. Parsing and evaluation both
/// recurse per operator, so longer inputs are refused up front.
pub const MAX_EXPRESSION_LEN: usize = 512;

/// Errors from evaluating a condition. The engine logs these and runs the
/// node anyway.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("condition is {len} bytes long; the limit is {}", MAX_EXPRESSION_LEN)]
    TooLong { len: usize },

    #[error("condition could not be evaluated: {0}")]
    Eval(String),

    #[error("condition evaluation panicked")]
    Panicked,
}

/// Python-style truthiness: `null`, `false`, zero, and empty strings,
/// arrays and objects are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Evaluates node conditions against a run's outputs and global context.
///
/// Built once per engine; the transform table is fixed at construction.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl fmt::Debug for ConditionEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionEvaluator").finish_non_exhaustive()
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("len", |args: &[Value]| Ok(json!(length(args.first()))))
            .with_transform("any", |args: &[Value]| {
                Ok(json!(match args.first() {
                    Some(Value::Array(items)) => items.iter().any(truthy),
                    Some(other) => truthy(other),
                    None => false,
                }))
            })
            .with_transform("all", |args: &[Value]| {
                Ok(json!(match args.first() {
                    Some(Value::Array(items)) => items.iter().all(truthy),
                    Some(other) => truthy(other),
                    None => true,
                }))
            })
            .with_transform("bool", |args: &[Value]| {
                Ok(json!(args.first().map_or(false, truthy)))
            })
            .with_transform("not", |args: &[Value]| {
                Ok(json!(!args.first().map_or(false, truthy)))
            })
            .with_transform("int", |args: &[Value]| {
                Ok(to_float(args.first()).map_or(Value::Null, |f| json!(f.trunc())))
            })
            .with_transform("float", |args: &[Value]| {
                Ok(to_float(args.first()).map_or(Value::Null, |f| json!(f)))
            })
            .with_transform("str", |args: &[Value]| {
                Ok(json!(args.first().map_or_else(String::new, to_text)))
            })
            .with_transform("get", |args: &[Value]| {
                let fallback = args.get(2).cloned().unwrap_or(Value::Null);
                Ok(lookup(args.first(), args.get(1)).unwrap_or(fallback))
            });

        Self { evaluator }
    }

    /// Evaluate `expression` and reduce the result with [`truthy`].
    ///
    /// # Errors
    /// [`ConditionError::TooLong`] before any parsing, otherwise whatever
    /// the evaluator reports (syntax errors, unknown transforms, bad
    /// operand types).
    pub fn evaluate(
        &self,
        expression: &str,
        outputs: &HashMap<String, Value>,
        global_context: &Map<String, Value>,
    ) -> Result<bool, ConditionError> {
        if expression.len() > MAX_EXPRESSION_LEN {
            return Err(ConditionError::TooLong { len: expression.len() });
        }

        let scope = json!({
            "outputs": outputs
                .iter()
                .map(|(id, value)| (id.clone(), as_floats(value)))
                .collect::<Map<String, Value>>(),
            "global_context": as_floats(&Value::Object(global_context.clone())),
        });

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.evaluator.eval_in_context(expression, &scope)
        }))
        .map_err(|_| ConditionError::Panicked)?;

        result
            .map(|value| truthy(&value))
            .map_err(|e| ConditionError::Eval(e.to_string()))
    }
}

/// Copy of `value` with every number widened to `f64`, matching how JEXL
/// reads number literals.
fn as_floats(value: &Value) -> Value {
    match value {
        Value::Number(n) => n.as_f64().map_or(Value::Null, |f| json!(f)),
        Value::Array(items) => Value::Array(items.iter().map(as_floats).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), as_floats(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn length(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::String(s)) => s.chars().count() as f64,
        Some(Value::Array(items)) => items.len() as f64,
        Some(Value::Object(map)) => map.len() as f64,
        _ => 0.0,
    }
}

fn to_float(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        // Whole floats print without a fraction, so `10|str == '10'`.
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn lookup(container: Option<&Value>, key: Option<&Value>) -> Option<Value> {
    match (container?, key?) {
        (Value::Object(map), Value::String(key)) => map.get(key).cloned(),
        (Value::Array(items), Value::Number(index)) => {
            let index = index.as_f64()?.trunc();
            let index = if index < 0.0 { items.len() as f64 + index } else { index };
            if index < 0.0 {
                return None;
            }
            items.get(index as usize).cloned()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> HashMap<String, Value> {
        let mut outputs = HashMap::new();
        outputs.insert(
            "tests".to_string(),
            json!({ "passed": 10, "failed": 0, "suites": ["unit", "e2e"], "ok": true }),
        );
        outputs.insert("lint".to_string(), json!({ "warnings": 3 }));
        outputs
    }

    fn global() -> Map<String, Value> {
        let mut global = Map::new();
        global.insert("env".into(), json!("prod"));
        global.insert("threshold".into(), json!(2.5));
        global.insert("flags".into(), json!({ "deploy": false }));
        global.insert("votes".into(), json!([false, 0, "x"]));
        global.insert("checks".into(), json!([true, 1, ""]));
        global.insert("count".into(), json!("42"));
        global
    }

    fn eval(src: &str) -> Result<bool, ConditionError> {
        ConditionEvaluator::new().evaluate(src, &outputs(), &global())
    }

    #[test]
    fn comparisons_over_outputs_and_globals() {
        assert!(eval("outputs['tests'].failed == 0").unwrap());
        assert!(eval("outputs.tests.passed >= 10").unwrap());
        assert!(eval("outputs.lint.warnings > global_context.threshold").unwrap());
        assert!(eval("global_context['env'] != 'staging'").unwrap());
        assert!(!eval("outputs.tests.passed < 10").unwrap());
    }

    #[test]
    fn boolean_operators() {
        assert!(eval("outputs.tests.ok && (global_context.flags.deploy)|not").unwrap());
        assert!(eval("false || outputs.lint.warnings == 3").unwrap());
        assert!(!eval("outputs.tests.ok && global_context.flags.deploy").unwrap());
    }

    #[test]
    fn membership() {
        assert!(eval("'e2e' in outputs.tests.suites").unwrap());
        assert!(!eval("'smoke' in outputs.tests.suites").unwrap());
    }

    #[test]
    fn transforms() {
        assert!(eval("outputs|len == 2").unwrap());
        assert!(eval("outputs.tests.suites|len == 2").unwrap());
        assert!(eval("global_context.votes|any").unwrap());
        assert!(!eval("global_context.checks|all").unwrap());
        assert!(eval("global_context.count|int == 42").unwrap());
        assert!(eval("global_context.threshold|int == 2").unwrap());
        assert!(eval("outputs.tests.passed|str == '10'").unwrap());
        assert!(eval("outputs.tests.suites|bool").unwrap());
        assert!(eval("outputs|get('deploy', 'none') == 'none'").unwrap());
        assert!(eval("outputs.tests|get('passed') == 10").unwrap());
    }

    #[test]
    fn result_is_reduced_to_truthiness() {
        assert!(eval("outputs.tests").unwrap());
        assert!(!eval("outputs.tests.failed").unwrap());
        assert!(!eval("null").unwrap());
    }

    #[test]
    fn integer_extremes_do_not_overflow() {
        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), json!({ "v": i64::MIN }));
        let evaluator = ConditionEvaluator::new();
        assert_eq!(evaluator.evaluate("0 - outputs.a.v > 0", &outputs, &Map::new()), Ok(true));
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(matches!(eval("outputs.tests.failed =="), Err(ConditionError::Eval(_))));
        assert!(matches!(eval("outputs['tests'"), Err(ConditionError::Eval(_))));
    }

    #[test]
    fn long_operator_chains_are_refused() {
        let chain = format!("{}true", "true && ".repeat(10_000));
        assert_eq!(eval(&chain), Err(ConditionError::TooLong { len: chain.len() }));

        let path = format!("outputs{}", ".a".repeat(5_000));
        assert!(matches!(eval(&path), Err(ConditionError::TooLong { .. })));
    }

    #[test]
    fn helpers_handle_edge_values() {
        assert_eq!(to_text(&json!(2.5)), "2.5");
        assert_eq!(to_text(&json!(7.0)), "7");
        assert_eq!(lookup(Some(&json!([1, 2, 3])), Some(&json!(-1.0))), Some(json!(3)));
        assert_eq!(lookup(Some(&json!([1])), Some(&json!(-5.0))), None);
        assert_eq!(to_float(Some(&json!("x"))), None);
        assert!(!truthy(&json!({})));
        assert!(!truthy(&json!(0.0)));
    }
}
