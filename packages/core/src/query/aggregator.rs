//! Aggregations
//!
//! Aggregations are pushed down to the backend. The reference reducer below is
//! what in-process backends use once they have evaluated the operand for every
//! matching entity.

use crate::expressions::{float_value, Expr, Expression, Numeric};
use crate::models::values::sort_order;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Aggregation over the entities matched by a query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Aggregator {
    Count,
    Sum(Arc<Expression>),
    Average(Arc<Expression>),
    Min(Arc<Expression>),
    Max(Arc<Expression>),
}

impl Aggregator {
    pub fn sum<S, N>(expression: &Expr<S, N, Numeric>) -> Self {
        Aggregator::Sum(expression.expression().clone())
    }

    pub fn average<S, N>(expression: &Expr<S, N, Numeric>) -> Self {
        Aggregator::Average(expression.expression().clone())
    }

    pub fn min<S, T, C>(expression: &Expr<S, T, C>) -> Self {
        Aggregator::Min(expression.expression().clone())
    }

    pub fn max<S, T, C>(expression: &Expr<S, T, C>) -> Self {
        Aggregator::Max(expression.expression().clone())
    }

    /// Operand evaluated per entity, `None` for `Count`
    pub fn operand(&self) -> Option<&Arc<Expression>> {
        match self {
            Aggregator::Count => None,
            Aggregator::Sum(e) | Aggregator::Average(e) | Aggregator::Min(e) | Aggregator::Max(e) => {
                Some(e)
            }
        }
    }

    /// Reduce operand values (one per matching entity) to the aggregate
    ///
    /// Nulls are ignored. `Count` counts entities; `Sum` of nothing is 0;
    /// `Average`, `Min` and `Max` of nothing are null.
    pub fn reduce(&self, values: Vec<Value>) -> Value {
        match self {
            Aggregator::Count => Value::from(values.len()),
            Aggregator::Sum(_) => sum(values.iter().filter(|v| !v.is_null())),
            Aggregator::Average(_) => {
                let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                if numbers.is_empty() {
                    Value::Null
                } else {
                    float_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            Aggregator::Min(_) => extreme(values, Ordering::Less),
            Aggregator::Max(_) => extreme(values, Ordering::Greater),
        }
    }
}

fn sum<'a>(values: impl Iterator<Item = &'a Value>) -> Value {
    let mut integer: Option<i64> = Some(0);
    let mut float = 0.0;
    for value in values {
        if let Some(f) = value.as_f64() {
            float += f;
        }
        integer = match (integer, value.as_i64()) {
            (Some(total), Some(i)) => total.checked_add(i),
            _ => None,
        };
    }
    match integer {
        Some(total) => Value::from(total),
        None => float_value(float),
    }
}

fn extreme(values: Vec<Value>, wanted: Ordering) -> Value {
    values
        .into_iter()
        .filter(|v| !v.is_null())
        .reduce(|best, candidate| {
            if sort_order(&candidate, &best) == wanted {
                candidate
            } else {
                best
            }
        })
        .unwrap_or(Value::Null)
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregator::Count => write!(f, "Count"),
            Aggregator::Sum(e) => write!(f, "Sum({})", e),
            Aggregator::Average(e) => write!(f, "Average({})", e),
            Aggregator::Min(e) => write!(f, "Min({})", e),
            Aggregator::Max(e) => write!(f, "Max({})", e),
        }
    }
}
