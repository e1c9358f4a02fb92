//! Expression Algebra
//!
//! Typed query expressions and their compiler:
//!
//! - [`Expression`] - untyped immutable AST node, structurally comparable
//! - [`Expr`] - typed builder enforcing source, result type and capability
//! - [`PropertyExpression`] - validated property path used by projections
//! - [`compile`] - bottom-up reduction of a tree into an executable closure

mod compiler;
mod expression;
mod math;
mod property;
mod typed;

pub use compiler::{
    compile, compile_comparator, compile_predicate, CompiledComparator, CompiledExpression,
    CompiledPredicate,
};
pub(crate) use math::float_value;
pub use expression::{Capability, Constant, Expression, ExpressionType, Node, OperationType};
pub use property::PropertyExpression;
pub use typed::{
    Boolean, BooleanExpression, CapabilityMarker, Collection, CollectionExpression, Comparable,
    ComparableExpression, Expr, Numeric, NumericExpression, Object, ObjectExpression, Ordered,
    StringExpression, Text, TypedProperty,
};
