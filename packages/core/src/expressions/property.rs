//! Property Paths
//!
//! [`PropertyExpression`] is an untyped, validated handle on a chain of
//! property accesses rooted at a query argument, such as `vendor.name`. Query
//! projections are sets of property expressions.

use crate::error::{RepositoryError, Result};
use crate::expressions::expression::{Expression, Node};
use crate::expressions::typed::Expr;
use crate::models::{MetaClass, PropertyMeta, ValueType};
use std::fmt;
use std::sync::Arc;

/// Property access chain rooted at an argument
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyExpression {
    expression: Arc<Expression>,
    target: Arc<Expression>,
    property: PropertyMeta,
}

impl PropertyExpression {
    /// Validate that `expression` is a property chain ending in an argument
    pub fn new(expression: Arc<Expression>) -> Result<Self> {
        let not_a_path =
            || RepositoryError::invalid_query(format!("'{}' is not a property path", expression));

        let (target, property) = match expression.node() {
            Node::Property { target, property } => (target.clone(), property.clone()),
            _ => return Err(not_a_path()),
        };
        let mut current = target.as_ref();
        while let Node::Property { target, .. } = current.node() {
            current = target.as_ref();
        }
        if !matches!(current.node(), Node::Argument(_)) {
            return Err(not_a_path());
        }
        Ok(Self {
            expression: expression.clone(),
            target,
            property,
        })
    }

    fn from_parts(target: Arc<Expression>, property: PropertyMeta) -> Self {
        Self {
            expression: Expression::property(target.clone(), property.clone()),
            target,
            property,
        }
    }

    /// Direct property of the argument of type `meta`
    pub fn root(meta: &'static MetaClass, property: &PropertyMeta) -> Self {
        Self::from_parts(Expression::argument(meta.as_type()), property.clone())
    }

    /// Resolve a dotted path such as `"vendor.name"` against `meta`
    pub fn of(meta: &'static MetaClass, path: &str) -> Result<Self> {
        let mut current_meta = Some(meta);
        let mut current: Option<PropertyExpression> = None;
        for segment in path.split('.') {
            let owner = current_meta.ok_or_else(|| {
                RepositoryError::invalid_query(format!(
                    "'{}' descends into a non-entity property",
                    path
                ))
            })?;
            let property = owner.property(segment).ok_or_else(|| {
                RepositoryError::invalid_query(format!(
                    "{} has no property '{}'",
                    owner.name(),
                    segment
                ))
            })?;
            current_meta = property.referenced_meta_class();
            current = Some(match current {
                Some(parent) => parent.child(property),
                None => Self::root(meta, property),
            });
        }
        current.ok_or_else(|| RepositoryError::invalid_query("empty property path"))
    }

    pub fn expression(&self) -> &Arc<Expression> {
        &self.expression
    }

    /// Last property of the chain
    pub fn property(&self) -> &PropertyMeta {
        &self.property
    }

    /// The chain without its last property, `None` for a direct property
    pub fn parent(&self) -> Option<PropertyExpression> {
        match self.target.node() {
            Node::Property { target, property } => {
                Some(Self::from_parts(target.clone(), property.clone()))
            }
            _ => None,
        }
    }

    /// Extend the chain with `property`
    pub fn child(&self, property: &PropertyMeta) -> PropertyExpression {
        Self::from_parts(self.expression.clone(), property.clone())
    }

    /// Type of the argument the chain is rooted at
    pub fn root_type(&self) -> ValueType {
        let mut current = self.expression.as_ref();
        loop {
            match current.node() {
                Node::Property { target, .. } => current = target.as_ref(),
                Node::Argument(value_type) => return value_type.clone(),
                _ => return ValueType::Any,
            }
        }
    }

    /// Properties from the root to the leaf
    pub fn segments(&self) -> Vec<PropertyMeta> {
        let mut segments = Vec::new();
        let mut current = self.expression.as_ref();
        while let Node::Property { target, property } = current.node() {
            segments.push(property.clone());
            current = target.as_ref();
        }
        segments.reverse();
        segments
    }

    /// Dotted path, e.g. `vendor.name`
    pub fn path(&self) -> String {
        self.segments()
            .iter()
            .map(PropertyMeta::name)
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn depth(&self) -> usize {
        self.segments().len()
    }
}

impl fmt::Display for PropertyExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl<S, T, C> TryFrom<Expr<S, T, C>> for PropertyExpression {
    type Error = RepositoryError;

    fn try_from(value: Expr<S, T, C>) -> Result<Self> {
        Self::new(value.into_expression())
    }
}

impl<S, T, C> TryFrom<&Expr<S, T, C>> for PropertyExpression {
    type Error = RepositoryError;

    fn try_from(value: &Expr<S, T, C>) -> Result<Self> {
        Self::new(value.expression().clone())
    }
}
