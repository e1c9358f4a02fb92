//! Expression Nodes
//!
//! Untyped, immutable AST shared by the typed builder API, the compiler and
//! backend adapters. Nodes are reference counted so sub-trees can be shared
//! between derived queries without copying.
//!
//! # Structure
//!
//! Every node carries an [`ExpressionType`] (the operation), a [`Capability`]
//! (which operators the typed API exposes on it) and a [`Node`] payload. The
//! leaves of a tree are always `Argument` or `Constant` nodes.

use crate::models::{PropertyMeta, ValueType};
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Operation performed by an expression node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionType {
    Argument,
    Constant,
    Property,
    Composition,
    AsString,
    AsComparable,
    AsBoolean,
    AsNumeric,
    Add,
    Sub,
    Mul,
    Div,
    Negate,
    And,
    Or,
    Not,
    Equals,
    GreaterThan,
    LessThan,
    IsNull,
    IsEmpty,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Length,
    Concat,
    ToLower,
    ToUpper,
    Trim,
    Count,
    Average,
    Min,
    Max,
    Sum,
    SearchText,
    ValueIn,
}

/// Structural category of an expression type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Argument,
    Constant,
    Property,
    UnaryOperation,
    BinaryOperation,
    Composition,
}

impl ExpressionType {
    pub fn operation_type(&self) -> OperationType {
        use ExpressionType::*;
        match self {
            Argument => OperationType::Argument,
            Constant => OperationType::Constant,
            Property => OperationType::Property,
            Composition => OperationType::Composition,
            AsString | AsComparable | AsBoolean | AsNumeric | Negate | Not | IsNull | IsEmpty
            | Length | ToLower | ToUpper | Trim | Count | Average | Min | Max | Sum => {
                OperationType::UnaryOperation
            }
            Add | Sub | Mul | Div | And | Or | Equals | GreaterThan | LessThan | Contains
            | StartsWith | EndsWith | Matches | Concat | SearchText | ValueIn => {
                OperationType::BinaryOperation
            }
        }
    }

    /// Aggregations are evaluated by the backend, never by the compiler
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            ExpressionType::Average | ExpressionType::Min | ExpressionType::Max | ExpressionType::Sum
        )
    }
}

impl fmt::Display for ExpressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Operator family available on an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Object,
    Boolean,
    Numeric,
    String,
    Comparable,
    Collection,
}

impl Capability {
    /// Whether an expression of this capability can be used where `required` is expected
    pub fn satisfies(self, required: Capability) -> bool {
        self == required
            || required == Capability::Object
            || (required == Capability::Comparable
                && matches!(self, Capability::Numeric | Capability::String))
    }

    /// Capability naturally associated with a value type
    pub fn of_type(value_type: &ValueType) -> Capability {
        match value_type {
            ValueType::Boolean => Capability::Boolean,
            ValueType::Integer | ValueType::Float => Capability::Numeric,
            ValueType::String => Capability::String,
            ValueType::List(_) => Capability::Collection,
            ValueType::Entity(_) | ValueType::Any => Capability::Object,
        }
    }
}

/// Constant payload
///
/// Equality is structural over the JSON value; hashing goes through the
/// value's serialized form so the two stay consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant(Value);

impl Constant {
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_string().hash(state);
    }
}

/// Payload of an expression node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Argument(ValueType),
    Constant(Constant),
    Property {
        target: Arc<Expression>,
        property: PropertyMeta,
    },
    Unary(Arc<Expression>),
    Binary(Arc<Expression>, Arc<Expression>),
    Composition {
        source: Arc<Expression>,
        expression: Arc<Expression>,
    },
}

/// Immutable expression node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression {
    kind: ExpressionType,
    capability: Capability,
    node: Node,
}

impl Expression {
    /// The entity (or value) a query is evaluated against
    pub fn argument(value_type: ValueType) -> Arc<Self> {
        Arc::new(Self {
            kind: ExpressionType::Argument,
            capability: Capability::of_type(&value_type),
            node: Node::Argument(value_type),
        })
    }

    pub fn constant(value: Value) -> Arc<Self> {
        let capability = match &value {
            Value::Bool(_) => Capability::Boolean,
            Value::Number(_) => Capability::Numeric,
            Value::String(_) => Capability::String,
            Value::Array(_) => Capability::Collection,
            Value::Null | Value::Object(_) => Capability::Object,
        };
        Self::constant_with(value, capability)
    }

    pub fn constant_with(value: Value, capability: Capability) -> Arc<Self> {
        Arc::new(Self {
            kind: ExpressionType::Constant,
            capability,
            node: Node::Constant(Constant(value)),
        })
    }

    pub fn property(target: Arc<Expression>, property: PropertyMeta) -> Arc<Self> {
        Arc::new(Self {
            kind: ExpressionType::Property,
            capability: Capability::of_type(property.value_type()),
            node: Node::Property { target, property },
        })
    }

    /// `expression` evaluated on the result of `source`
    pub fn composition(source: Arc<Expression>, expression: Arc<Expression>) -> Arc<Self> {
        Arc::new(Self {
            kind: ExpressionType::Composition,
            capability: expression.capability,
            node: Node::Composition { source, expression },
        })
    }

    pub fn unary(kind: ExpressionType, capability: Capability, operand: Arc<Expression>) -> Arc<Self> {
        debug_assert_eq!(kind.operation_type(), OperationType::UnaryOperation);
        Arc::new(Self {
            kind,
            capability,
            node: Node::Unary(operand),
        })
    }

    pub fn binary(
        kind: ExpressionType,
        capability: Capability,
        left: Arc<Expression>,
        right: Arc<Expression>,
    ) -> Arc<Self> {
        debug_assert_eq!(kind.operation_type(), OperationType::BinaryOperation);
        Arc::new(Self {
            kind,
            capability,
            node: Node::Binary(left, right),
        })
    }

    pub fn kind(&self) -> ExpressionType {
        self.kind
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn operation_type(&self) -> OperationType {
        self.kind.operation_type()
    }

    /// Result type of the expression, resolved from its shape
    pub fn object_type(&self) -> ValueType {
        use ExpressionType::*;
        match &self.node {
            Node::Argument(value_type) => value_type.clone(),
            Node::Constant(constant) => ValueType::infer(constant.value()),
            Node::Property { property, .. } => property.value_type().clone(),
            Node::Composition { expression, .. } => expression.object_type(),
            Node::Unary(operand) => match self.kind {
                IsNull | IsEmpty | Not | AsBoolean => ValueType::Boolean,
                Length | Count => ValueType::Integer,
                AsString | ToLower | ToUpper | Trim => ValueType::String,
                Average => ValueType::Float,
                Sum | Min | Max => match operand.object_type() {
                    ValueType::List(inner) => *inner,
                    _ => ValueType::Any,
                },
                AsNumeric => match operand.object_type() {
                    numeric if numeric.is_numeric() => numeric,
                    _ => ValueType::Float,
                },
                _ => operand.object_type(),
            },
            Node::Binary(left, _) => match self.kind {
                Add | Sub | Mul | Div => left.object_type(),
                Concat => ValueType::String,
                _ => ValueType::Boolean,
            },
        }
    }

    /// Type of the argument at the root of the expression, if any
    pub fn argument_type(&self) -> Option<ValueType> {
        match &self.node {
            Node::Argument(value_type) => Some(value_type.clone()),
            Node::Constant(_) => None,
            Node::Property { target, .. } => target.argument_type(),
            Node::Composition { source, .. } => source.argument_type(),
            Node::Unary(operand) => operand.argument_type(),
            Node::Binary(left, right) => left.argument_type().or_else(|| right.argument_type()),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Node::Argument(_) => write!(f, "$"),
            Node::Constant(constant) => match constant.value() {
                Value::String(s) => write!(f, "{:?}", s),
                other => write!(f, "{}", other),
            },
            Node::Property { target, property } => write!(f, "{}.{}", target, property.name()),
            Node::Composition { source, expression } => write!(f, "{} |> {}", source, expression),
            Node::Unary(operand) => write!(f, "{}({})", self.kind, operand),
            Node::Binary(left, right) => write!(f, "{}({}, {})", self.kind, left, right),
        }
    }
}
