//! Expression Compiler
//!
//! Reduces an [`Expression`] tree bottom-up into an executable closure over
//! `serde_json::Value` documents. Compilation is a single recursive `match`:
//! structural nodes (argument, constant, property, composition) are reduced by
//! their shape, operations by their [`ExpressionType`].
//!
//! # Null Semantics
//!
//! - Arithmetic treats absent operands as the operation's neutral default
//!   (`0`, or `1` for a divisor)
//! - Ordering comparisons are false when either side is absent
//! - `Not(x)` is true unless `x` is exactly `true`
//! - String predicates never match an absent subject; an absent pattern
//!   matches every present subject
//!
//! Aggregations (`Sum`, `Average`, `Min`, `Max`) are only evaluated by
//! backends; compiling one fails with
//! [`RepositoryError::UnsupportedExpression`] flagged `aggregate_only`.

use crate::error::{RepositoryError, Result};
use crate::expressions::expression::{Expression, ExpressionType, Node};
use crate::expressions::math::{self, ArithmeticOp};
use crate::models::values::{compare_values, is_true, sort_order, to_text, values_equal};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

type Evaluator = dyn Fn(&Value) -> Value + Send + Sync;

/// Executable form of an expression
#[derive(Clone)]
pub struct CompiledExpression {
    evaluator: Arc<Evaluator>,
}

impl CompiledExpression {
    fn new<F>(evaluator: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            evaluator: Arc::new(evaluator),
        }
    }

    pub fn evaluate(&self, argument: &Value) -> Value {
        (self.evaluator)(argument)
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompiledExpression")
    }
}

/// Compiled boolean expression
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    expression: CompiledExpression,
}

impl CompiledPredicate {
    /// Whether the predicate holds; null counts as false
    pub fn test(&self, argument: &Value) -> bool {
        is_true(&self.expression.evaluate(argument))
    }
}

#[derive(Debug, Clone)]
struct SortKey {
    expression: CompiledExpression,
    ascending: bool,
}

/// Compiled ordering over one or more sort keys
#[derive(Debug, Clone, Default)]
pub struct CompiledComparator {
    keys: Vec<SortKey>,
}

impl CompiledComparator {
    /// Break ties of `self` with `next`
    pub fn then(mut self, next: CompiledComparator) -> Self {
        self.keys.extend(next.keys);
        self
    }

    pub fn compare(&self, left: &Value, right: &Value) -> Ordering {
        for key in &self.keys {
            let ordering = sort_order(
                &key.expression.evaluate(left),
                &key.expression.evaluate(right),
            );
            let ordering = if key.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

pub fn compile_predicate(expression: &Expression) -> Result<CompiledPredicate> {
    Ok(CompiledPredicate {
        expression: compile(expression)?,
    })
}

/// Ordering by `expression`; nulls sort first when ascending
pub fn compile_comparator(expression: &Expression, ascending: bool) -> Result<CompiledComparator> {
    Ok(CompiledComparator {
        keys: vec![SortKey {
            expression: compile(expression)?,
            ascending,
        }],
    })
}

pub fn compile(expression: &Expression) -> Result<CompiledExpression> {
    match expression.node() {
        Node::Argument(_) => Ok(CompiledExpression::new(Value::clone)),
        Node::Constant(constant) => {
            let value = constant.value().clone();
            Ok(CompiledExpression::new(move |_| value.clone()))
        }
        Node::Property { target, property } => {
            let property = property.clone();
            if matches!(target.node(), Node::Argument(_)) {
                return Ok(CompiledExpression::new(move |argument| property.get(argument)));
            }
            let target = compile(target)?;
            Ok(CompiledExpression::new(move |argument| {
                property.get(&target.evaluate(argument))
            }))
        }
        Node::Composition { source, expression } => {
            let source = compile(source)?;
            let expression = compile(expression)?;
            Ok(CompiledExpression::new(move |argument| {
                expression.evaluate(&source.evaluate(argument))
            }))
        }
        Node::Unary(operand) => compile_unary(expression.kind(), operand),
        Node::Binary(left, right) => compile_binary(expression.kind(), left, right),
    }
}

fn compile_unary(kind: ExpressionType, operand: &Expression) -> Result<CompiledExpression> {
    use ExpressionType::*;

    if kind.is_aggregate() {
        return Err(RepositoryError::aggregate_only(kind));
    }

    let reducer: fn(Value) -> Value = match kind {
        AsString => |v| to_text(&v).map(Value::String).unwrap_or(Value::Null),
        AsComparable => |v| v,
        AsBoolean => as_boolean,
        AsNumeric => as_numeric,
        Negate => |v| math::negate(&v),
        Not => |v| Value::Bool(!is_true(&v)),
        IsNull => |v| Value::Bool(v.is_null()),
        IsEmpty => |v| {
            Value::Bool(match &v {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                Value::Array(items) => items.is_empty(),
                _ => false,
            })
        },
        Length => |v| {
            Value::from(match &v {
                Value::Null => 0,
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                other => other.to_string().chars().count(),
            })
        },
        ToLower => |v| map_text(v, |s| s.to_lowercase()),
        ToUpper => |v| map_text(v, |s| s.to_uppercase()),
        Trim => |v| map_text(v, |s| s.trim().to_string()),
        Count => |v| {
            Value::from(match &v {
                Value::Null => 0,
                Value::Array(items) => items.len(),
                _ => 1,
            })
        },
        other => return Err(RepositoryError::unsupported(other)),
    };

    let operand = compile(operand)?;
    Ok(CompiledExpression::new(move |argument| {
        reducer(operand.evaluate(argument))
    }))
}

fn compile_binary(
    kind: ExpressionType,
    left: &Expression,
    right: &Expression,
) -> Result<CompiledExpression> {
    use ExpressionType::*;

    let lhs = compile(left)?;
    let rhs = compile(right)?;

    match kind {
        And => {
            return Ok(CompiledExpression::new(move |argument| {
                Value::Bool(is_true(&lhs.evaluate(argument)) && is_true(&rhs.evaluate(argument)))
            }))
        }
        Or => {
            return Ok(CompiledExpression::new(move |argument| {
                Value::Bool(is_true(&lhs.evaluate(argument)) || is_true(&rhs.evaluate(argument)))
            }))
        }
        Matches => return compile_matches(lhs, right, rhs),
        _ => {}
    }

    let reducer: fn(&Value, &Value) -> Value = match kind {
        Add => |a, b| math::apply(ArithmeticOp::Add, a, b),
        Sub => |a, b| math::apply(ArithmeticOp::Sub, a, b),
        Mul => |a, b| math::apply(ArithmeticOp::Mul, a, b),
        Div => |a, b| math::apply(ArithmeticOp::Div, a, b),
        Equals => |a, b| Value::Bool(values_equal(a, b)),
        GreaterThan => |a, b| Value::Bool(compare_values(a, b) == Some(Ordering::Greater)),
        LessThan => |a, b| Value::Bool(compare_values(a, b) == Some(Ordering::Less)),
        Contains => |a, b| match a {
            Value::Array(items) if !b.is_null() => {
                Value::Bool(items.iter().any(|item| values_equal(item, b)))
            }
            _ => text_predicate(a, b, |s, p| s.contains(p)),
        },
        StartsWith => |a, b| text_predicate(a, b, |s, p| s.starts_with(p)),
        EndsWith => |a, b| text_predicate(a, b, |s, p| s.ends_with(p)),
        Concat => |a, b| {
            let mut text = to_text(a).unwrap_or_default();
            text.push_str(&to_text(b).unwrap_or_default());
            Value::String(text)
        },
        SearchText => |a, b| match to_text(a) {
            Some(text) => Value::Bool(text.contains(to_text(b).unwrap_or_default().as_str())),
            None => Value::Bool(false),
        },
        ValueIn => |a, b| match (a, b) {
            (Value::Null, _) => Value::Bool(false),
            (_, Value::Array(items)) => Value::Bool(items.iter().any(|item| values_equal(a, item))),
            _ => Value::Bool(false),
        },
        other => return Err(RepositoryError::unsupported(other)),
    };

    Ok(CompiledExpression::new(move |argument| {
        reducer(&lhs.evaluate(argument), &rhs.evaluate(argument))
    }))
}

fn compile_matches(
    subject: CompiledExpression,
    pattern_node: &Expression,
    pattern: CompiledExpression,
) -> Result<CompiledExpression> {
    if let Node::Constant(constant) = pattern_node.node() {
        if let Some(source) = constant.value().as_str() {
            let regex = full_match_regex(source);
            return Ok(CompiledExpression::new(move |argument| {
                let matched = match (&regex, to_text(&subject.evaluate(argument))) {
                    (Some(regex), Some(text)) => regex.is_match(&text),
                    _ => false,
                };
                Value::Bool(matched)
            }));
        }
    }

    Ok(CompiledExpression::new(move |argument| {
        let matched = match (
            to_text(&subject.evaluate(argument)),
            to_text(&pattern.evaluate(argument)),
        ) {
            (None, None) => true,
            (Some(text), Some(source)) => full_match_regex(&source)
                .map(|regex| regex.is_match(&text))
                .unwrap_or(false),
            _ => false,
        };
        Value::Bool(matched)
    }))
}

fn full_match_regex(pattern: &str) -> Option<Regex> {
    match Regex::new(&format!("^(?:{})$", pattern)) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Invalid regular expression '{}': {}", pattern, e);
            None
        }
    }
}

fn text_predicate(subject: &Value, pattern: &Value, test: fn(&str, &str) -> bool) -> Value {
    let matched = match (to_text(subject), to_text(pattern)) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(subject), Some(pattern)) => test(&subject, &pattern),
    };
    Value::Bool(matched)
}

fn map_text(value: Value, f: fn(&str) -> String) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(f(&s)),
        other => Value::String(f(&other.to_string())),
    }
}

fn as_boolean(value: Value) -> Value {
    match value {
        Value::Bool(_) | Value::Null => value,
        Value::Number(n) => Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) => Value::Bool(s.eq_ignore_ascii_case("true")),
        Value::Array(items) => Value::Bool(!items.is_empty()),
        Value::Object(_) => Value::Bool(true),
    }
}

fn as_numeric(value: Value) -> Value {
    match value {
        Value::Number(_) | Value::Null => value,
        Value::Bool(b) => Value::from(i64::from(b)),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Value::from(i)
            } else if let Ok(f) = trimmed.parse::<f64>() {
                math::float_value(f)
            } else {
                Value::Null
            }
        }
        Value::Array(_) | Value::Object(_) => Value::Null,
    }
}

#[cfg(test)]
#[path = "compiler_test.rs"]
mod compiler_test;
