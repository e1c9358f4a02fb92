//! Typed Expression Builder
//!
//! [`Expr<S, T, C>`] wraps an untyped [`Expression`] node with three phantom
//! parameters: the source type `S` the expression is evaluated against, the
//! result type `T`, and a capability marker `C` deciding which operators are
//! available. Mixing sources or comparing a string with a number is rejected
//! at compile time; the underlying nodes stay untyped so providers and
//! decorators can process them dynamically.
//!
//! # Capabilities
//!
//! | Marker       | Operators                                                  |
//! |--------------|------------------------------------------------------------|
//! | `Object`     | `eq`, `not_eq`, `is_null`, `is_in`, `search_text`, casts   |
//! | `Comparable` | the above plus `greater_than`, `less_than`, `between`, ... |
//! | `Numeric`    | comparable plus `add`, `sub`, `mul`, `div`, `negate`       |
//! | `Text`       | comparable plus `contains`, `matches`, `length`, ...       |
//! | `Boolean`    | `and`, `or`, `not`                                         |
//! | `Collection` | `count`, `is_empty` and the aggregate-only reducers        |
//!
//! # Example
//!
//! ```rust,ignore
//! let product = Expr::<Product, Product>::arg();
//! let cheap_acme = product
//!     .property(&Product::price())
//!     .less_than(100)
//!     .and(&product.property(&Product::vendor()).property(&Vendor::name()).eq("ACME"));
//! ```

use crate::expressions::expression::{Capability, Expression, ExpressionType};
use crate::models::{Entity, PropertyMeta, ValueType};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Compile-time marker for an expression [`Capability`]
pub trait CapabilityMarker: Send + Sync + 'static {
    const CAPABILITY: Capability;
}

/// Capabilities supporting ordering comparisons
pub trait Ordered: CapabilityMarker {}

macro_rules! capability_marker {
    ($(#[$doc:meta])* $name:ident => $capability:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name;

        impl CapabilityMarker for $name {
            const CAPABILITY: Capability = Capability::$capability;
        }
    };
}

capability_marker!(
    /// Any value
    Object => Object
);
capability_marker!(Boolean => Boolean);
capability_marker!(Numeric => Numeric);
capability_marker!(
    /// String values
    Text => String
);
capability_marker!(Comparable => Comparable);
capability_marker!(Collection => Collection);

impl Ordered for Comparable {}
impl Ordered for Numeric {}
impl Ordered for Text {}

pub type ObjectExpression<S, T> = Expr<S, T, Object>;
pub type BooleanExpression<S> = Expr<S, bool, Boolean>;
pub type NumericExpression<S, N> = Expr<S, N, Numeric>;
pub type StringExpression<S> = Expr<S, String, Text>;
pub type ComparableExpression<S, T> = Expr<S, T, Comparable>;
pub type CollectionExpression<S, E> = Expr<S, Vec<E>, Collection>;

fn constant_value<V: Serialize + ?Sized>(value: &V) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// A property of `T` holding values of type `U`
pub struct TypedProperty<T, U, C = Object> {
    meta: PropertyMeta,
    _marker: PhantomData<fn(&T) -> (U, C)>,
}

impl<T, U, C> TypedProperty<T, U, C> {
    pub fn new(meta: PropertyMeta) -> Self {
        Self {
            meta,
            _marker: PhantomData,
        }
    }

    pub fn meta(&self) -> &PropertyMeta {
        &self.meta
    }
}

impl<T: Entity, U, C> TypedProperty<T, U, C> {
    /// Look up a property of `T` by name
    pub fn named(name: &str) -> Option<Self> {
        T::meta_class().property(name).cloned().map(Self::new)
    }
}

impl<T, U, C> Clone for TypedProperty<T, U, C> {
    fn clone(&self) -> Self {
        Self::new(self.meta.clone())
    }
}

impl<T, U, C> fmt::Debug for TypedProperty<T, U, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedProperty({:?})", self.meta)
    }
}

/// Typed handle on an expression tree evaluated against `S`, producing `T`
pub struct Expr<S, T, C = Object> {
    node: Arc<Expression>,
    _marker: PhantomData<fn(&S) -> (T, C)>,
}

impl<S, T, C> Clone for Expr<S, T, C> {
    fn clone(&self) -> Self {
        Self::from_expression(self.node.clone())
    }
}

impl<S, T, C> fmt::Debug for Expr<S, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({})", self.node)
    }
}

impl<S, T, C> fmt::Display for Expr<S, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.node, f)
    }
}

impl<S: Entity> Expr<S, S, Object> {
    /// The entity a query is evaluated against
    pub fn arg() -> Self {
        Self::from_expression(Expression::argument(ValueType::entity::<S>()))
    }
}

impl<S, T, C> Expr<S, T, C> {
    /// Wrap an untyped node; the caller vouches for the type parameters
    pub fn from_expression(node: Arc<Expression>) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub fn expression(&self) -> &Arc<Expression> {
        &self.node
    }

    pub fn into_expression(self) -> Arc<Expression> {
        self.node
    }

    fn retype<U, D>(&self) -> Expr<S, U, D> {
        Expr::from_expression(self.node.clone())
    }

    fn unary<U, D: CapabilityMarker>(&self, kind: ExpressionType) -> Expr<S, U, D> {
        Expr::from_expression(Expression::unary(kind, D::CAPABILITY, self.node.clone()))
    }

    fn binary<U, D: CapabilityMarker>(
        &self,
        kind: ExpressionType,
        right: Arc<Expression>,
    ) -> Expr<S, U, D> {
        Expr::from_expression(Expression::binary(
            kind,
            D::CAPABILITY,
            self.node.clone(),
            right,
        ))
    }
}

impl<S, T, C: CapabilityMarker> Expr<S, T, C> {
    pub fn argument(value_type: ValueType) -> Self {
        Self::from_expression(Expression::argument(value_type))
    }

    pub fn constant(value: impl Into<T>) -> Self
    where
        T: Serialize,
    {
        let value: T = value.into();
        Self::from_expression(Expression::constant_with(
            constant_value(&value),
            C::CAPABILITY,
        ))
    }

    pub fn property<U, D>(&self, property: &TypedProperty<T, U, D>) -> Expr<S, U, D> {
        self.property_meta(property.meta())
    }

    /// Property access without the compile-time owner check
    pub fn property_meta<U, D>(&self, property: &PropertyMeta) -> Expr<S, U, D> {
        Expr::from_expression(Expression::property(self.node.clone(), property.clone()))
    }

    /// `expression` applied to the result of `self`
    pub fn compose<R, D>(&self, expression: &Expr<T, R, D>) -> Expr<S, R, D> {
        Expr::from_expression(Expression::composition(
            self.node.clone(),
            expression.node.clone(),
        ))
    }

    pub fn eq(&self, value: impl Into<T>) -> BooleanExpression<S>
    where
        T: Serialize,
    {
        let value = constant_value(&value.into());
        if value.is_null() {
            return self.is_null();
        }
        self.binary(ExpressionType::Equals, Expression::constant(value))
    }

    pub fn eq_expr<D>(&self, other: &Expr<S, T, D>) -> BooleanExpression<S> {
        self.binary(ExpressionType::Equals, other.node.clone())
    }

    pub fn not_eq(&self, value: impl Into<T>) -> BooleanExpression<S>
    where
        T: Serialize,
    {
        let value = constant_value(&value.into());
        if value.is_null() {
            return self.is_not_null();
        }
        self.binary::<bool, Boolean>(ExpressionType::Equals, Expression::constant(value))
            .not()
    }

    pub fn not_eq_expr<D>(&self, other: &Expr<S, T, D>) -> BooleanExpression<S> {
        self.eq_expr(other).not()
    }

    pub fn is_null(&self) -> BooleanExpression<S> {
        self.unary(ExpressionType::IsNull)
    }

    pub fn is_not_null(&self) -> BooleanExpression<S> {
        self.is_null().not()
    }

    pub fn is_in<I>(&self, values: I) -> BooleanExpression<S>
    where
        I: IntoIterator,
        I::Item: Into<T>,
        T: Serialize,
    {
        let values: Vec<Value> = values
            .into_iter()
            .map(|v| constant_value(&v.into()))
            .collect();
        self.binary(ExpressionType::ValueIn, Expression::constant(Value::Array(values)))
    }

    pub fn is_in_expr(&self, values: &CollectionExpression<S, T>) -> BooleanExpression<S> {
        self.binary(ExpressionType::ValueIn, values.node.clone())
    }

    pub fn search_text(&self, pattern: &str) -> BooleanExpression<S> {
        self.binary(ExpressionType::SearchText, Expression::constant(Value::from(pattern)))
    }

    pub fn as_comparable(&self) -> ComparableExpression<S, T> {
        if C::CAPABILITY.satisfies(Capability::Comparable) {
            self.retype()
        } else {
            self.unary(ExpressionType::AsComparable)
        }
    }

    pub fn as_string(&self) -> StringExpression<S> {
        if C::CAPABILITY == Capability::String {
            self.retype()
        } else {
            self.unary(ExpressionType::AsString)
        }
    }

    pub fn as_boolean(&self) -> BooleanExpression<S> {
        if C::CAPABILITY == Capability::Boolean {
            self.retype()
        } else {
            self.unary(ExpressionType::AsBoolean)
        }
    }

    pub fn as_numeric<N>(&self) -> NumericExpression<S, N> {
        if C::CAPABILITY == Capability::Numeric {
            self.retype()
        } else {
            self.unary(ExpressionType::AsNumeric)
        }
    }
}

impl<S, T, C: Ordered> Expr<S, T, C> {
    pub fn greater_than(&self, value: impl Into<T>) -> BooleanExpression<S>
    where
        T: Serialize,
    {
        self.binary(
            ExpressionType::GreaterThan,
            Expression::constant(constant_value(&value.into())),
        )
    }

    pub fn greater_than_expr<D: Ordered>(&self, other: &Expr<S, T, D>) -> BooleanExpression<S> {
        self.binary(ExpressionType::GreaterThan, other.node.clone())
    }

    pub fn less_than(&self, value: impl Into<T>) -> BooleanExpression<S>
    where
        T: Serialize,
    {
        self.binary(
            ExpressionType::LessThan,
            Expression::constant(constant_value(&value.into())),
        )
    }

    pub fn less_than_expr<D: Ordered>(&self, other: &Expr<S, T, D>) -> BooleanExpression<S> {
        self.binary(ExpressionType::LessThan, other.node.clone())
    }

    pub fn greater_or_equal(&self, value: impl Into<T>) -> BooleanExpression<S>
    where
        T: Serialize + Clone,
    {
        let value: T = value.into();
        self.greater_than(value.clone()).or(&self.eq(value))
    }

    pub fn greater_or_equal_expr<D: Ordered>(&self, other: &Expr<S, T, D>) -> BooleanExpression<S> {
        self.greater_than_expr(other).or(&self.eq_expr(other))
    }

    pub fn less_or_equal(&self, value: impl Into<T>) -> BooleanExpression<S>
    where
        T: Serialize + Clone,
    {
        let value: T = value.into();
        self.less_than(value.clone()).or(&self.eq(value))
    }

    pub fn less_or_equal_expr<D: Ordered>(&self, other: &Expr<S, T, D>) -> BooleanExpression<S> {
        self.less_than_expr(other).or(&self.eq_expr(other))
    }

    /// Inclusive range check
    pub fn between(&self, min: impl Into<T>, max: impl Into<T>) -> BooleanExpression<S>
    where
        T: Serialize + Clone,
    {
        self.greater_or_equal(min).and(&self.less_or_equal(max))
    }

    pub fn between_expr<D: Ordered, E: Ordered>(
        &self,
        min: &Expr<S, T, D>,
        max: &Expr<S, T, E>,
    ) -> BooleanExpression<S> {
        self.greater_or_equal_expr(min)
            .and(&self.less_or_equal_expr(max))
    }
}

impl<S, N> Expr<S, N, Numeric> {
    fn arithmetic(&self, kind: ExpressionType, right: Arc<Expression>) -> Self {
        self.binary(kind, right)
    }

    pub fn add(&self, value: impl Into<N>) -> Self
    where
        N: Serialize,
    {
        self.arithmetic(ExpressionType::Add, Expression::constant(constant_value(&value.into())))
    }

    pub fn add_expr(&self, other: &Self) -> Self {
        self.arithmetic(ExpressionType::Add, other.node.clone())
    }

    pub fn sub(&self, value: impl Into<N>) -> Self
    where
        N: Serialize,
    {
        self.arithmetic(ExpressionType::Sub, Expression::constant(constant_value(&value.into())))
    }

    pub fn sub_expr(&self, other: &Self) -> Self {
        self.arithmetic(ExpressionType::Sub, other.node.clone())
    }

    pub fn mul(&self, value: impl Into<N>) -> Self
    where
        N: Serialize,
    {
        self.arithmetic(ExpressionType::Mul, Expression::constant(constant_value(&value.into())))
    }

    pub fn mul_expr(&self, other: &Self) -> Self {
        self.arithmetic(ExpressionType::Mul, other.node.clone())
    }

    pub fn div(&self, value: impl Into<N>) -> Self
    where
        N: Serialize,
    {
        self.arithmetic(ExpressionType::Div, Expression::constant(constant_value(&value.into())))
    }

    pub fn div_expr(&self, other: &Self) -> Self {
        self.arithmetic(ExpressionType::Div, other.node.clone())
    }

    pub fn negate(&self) -> Self {
        self.unary(ExpressionType::Negate)
    }
}

impl<S> Expr<S, bool, Boolean> {
    /// Short-circuit conjunction
    pub fn and(&self, other: &Self) -> Self {
        self.binary(ExpressionType::And, other.node.clone())
    }

    /// Short-circuit disjunction
    pub fn or(&self, other: &Self) -> Self {
        self.binary(ExpressionType::Or, other.node.clone())
    }

    /// True unless `self` is exactly `true` (so `not(null)` is true)
    pub fn not(&self) -> Self {
        self.unary(ExpressionType::Not)
    }
}

impl<S> Expr<S, String, Text> {
    fn text_constant(value: &str) -> Arc<Expression> {
        Expression::constant(Value::from(value))
    }

    pub fn contains(&self, substring: &str) -> BooleanExpression<S> {
        self.binary(ExpressionType::Contains, Self::text_constant(substring))
    }

    pub fn contains_expr(&self, substring: &Self) -> BooleanExpression<S> {
        self.binary(ExpressionType::Contains, substring.node.clone())
    }

    pub fn starts_with(&self, prefix: &str) -> BooleanExpression<S> {
        self.binary(ExpressionType::StartsWith, Self::text_constant(prefix))
    }

    pub fn starts_with_expr(&self, prefix: &Self) -> BooleanExpression<S> {
        self.binary(ExpressionType::StartsWith, prefix.node.clone())
    }

    pub fn ends_with(&self, suffix: &str) -> BooleanExpression<S> {
        self.binary(ExpressionType::EndsWith, Self::text_constant(suffix))
    }

    pub fn ends_with_expr(&self, suffix: &Self) -> BooleanExpression<S> {
        self.binary(ExpressionType::EndsWith, suffix.node.clone())
    }

    /// Full-string regular expression match
    pub fn matches(&self, pattern: &str) -> BooleanExpression<S> {
        self.binary(ExpressionType::Matches, Self::text_constant(pattern))
    }

    pub fn matches_expr(&self, pattern: &Self) -> BooleanExpression<S> {
        self.binary(ExpressionType::Matches, pattern.node.clone())
    }

    pub fn length(&self) -> NumericExpression<S, i64> {
        self.unary(ExpressionType::Length)
    }

    pub fn concat(&self, suffix: &str) -> Self {
        self.binary(ExpressionType::Concat, Self::text_constant(suffix))
    }

    pub fn concat_expr(&self, suffix: &Self) -> Self {
        self.binary(ExpressionType::Concat, suffix.node.clone())
    }

    pub fn to_lower(&self) -> Self {
        self.unary(ExpressionType::ToLower)
    }

    pub fn to_upper(&self) -> Self {
        self.unary(ExpressionType::ToUpper)
    }

    pub fn trim(&self) -> Self {
        self.unary(ExpressionType::Trim)
    }

    pub fn is_empty(&self) -> BooleanExpression<S> {
        self.unary(ExpressionType::IsEmpty)
    }
}

impl<S, E> Expr<S, Vec<E>, Collection> {
    pub fn count(&self) -> NumericExpression<S, i64> {
        self.unary(ExpressionType::Count)
    }

    pub fn is_empty(&self) -> BooleanExpression<S> {
        self.unary(ExpressionType::IsEmpty)
    }

    /// Aggregate only: evaluated by the backend
    pub fn sum(&self) -> NumericExpression<S, E> {
        self.unary(ExpressionType::Sum)
    }

    /// Aggregate only: evaluated by the backend
    pub fn average(&self) -> NumericExpression<S, f64> {
        self.unary(ExpressionType::Average)
    }

    /// Aggregate only: evaluated by the backend
    pub fn min(&self) -> ComparableExpression<S, E> {
        self.unary(ExpressionType::Min)
    }

    /// Aggregate only: evaluated by the backend
    pub fn max(&self) -> ComparableExpression<S, E> {
        self.unary(ExpressionType::Max)
    }
}

#[cfg(test)]
#[path = "typed_test.rs"]
mod typed_test;
