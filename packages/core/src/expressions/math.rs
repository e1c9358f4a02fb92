//! Arithmetic over JSON numbers
//!
//! Integer operands use checked arithmetic and widen to floating point on
//! overflow. Integer division by zero yields null; floating point results that
//! are not finite also yield null since JSON cannot represent them.

use serde_json::{Number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

pub(crate) fn float_value(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Apply `op`, substituting the operation's neutral defaults for absent operands
pub(crate) fn apply(op: ArithmeticOp, left: &Value, right: &Value) -> Value {
    let zero = Value::from(0);
    let one = Value::from(1);
    let left = if left.is_null() { &zero } else { left };
    let right = match (right.is_null(), op) {
        (true, ArithmeticOp::Div) => &one,
        (true, _) => &zero,
        (false, _) => right,
    };

    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        let checked = match op {
            ArithmeticOp::Add => a.checked_add(b),
            ArithmeticOp::Sub => a.checked_sub(b),
            ArithmeticOp::Mul => a.checked_mul(b),
            ArithmeticOp::Div if b == 0 => return Value::Null,
            ArithmeticOp::Div => a.checked_div(b),
        };
        if let Some(result) = checked {
            return Value::from(result);
        }
    }

    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => float_value(match op {
            ArithmeticOp::Add => a + b,
            ArithmeticOp::Sub => a - b,
            ArithmeticOp::Mul => a * b,
            ArithmeticOp::Div => a / b,
        }),
        _ => Value::Null,
    }
}

pub(crate) fn negate(value: &Value) -> Value {
    match value {
        Value::Number(n) => match n.as_i64().and_then(i64::checked_neg) {
            Some(negated) => Value::from(negated),
            None => n.as_f64().map(|f| float_value(-f)).unwrap_or(Value::Null),
        },
        _ => Value::Null,
    }
}
