//! Query Descriptor
//!
//! [`QueryInfo`] is the immutable, backend-independent description of a query:
//! entity metadata, optional predicate, optional mapping, ordering, pagination
//! and the set of properties to project. Decorators derive new descriptors
//! through [`QueryInfo::to_builder`]; a descriptor is never mutated in place.
//!
//! # Example
//!
//! ```rust,ignore
//! let query = QueryInfo::builder(Product::meta_class())
//!     .predicate(price.greater_than(10).into_expression())
//!     .sort(name.into_expression(), true)
//!     .limit(20)
//!     .build();
//! query.validate()?;
//! ```

use crate::error::{RepositoryError, Result};
use crate::expressions::{
    compile, compile_comparator, compile_predicate, Capability, CompiledComparator,
    CompiledExpression, CompiledPredicate, Expression, ExpressionType, PropertyExpression,
};
use crate::models::{MetaClass, ValueType};
use crate::query::projection::project;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// One ordering key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortingInfo {
    pub expression: Arc<Expression>,
    pub ascending: bool,
}

/// Immutable query descriptor
#[derive(Clone)]
pub struct QueryInfo {
    meta_class: &'static MetaClass,
    predicate: Option<Arc<Expression>>,
    mapping: Option<Arc<Expression>>,
    sorting: Vec<SortingInfo>,
    skip: Option<u64>,
    limit: Option<u64>,
    properties: Vec<PropertyExpression>,
}

impl QueryInfo {
    pub fn builder(meta_class: &'static MetaClass) -> QueryInfoBuilder {
        QueryInfoBuilder {
            inner: QueryInfo {
                meta_class,
                predicate: None,
                mapping: None,
                sorting: Vec::new(),
                skip: None,
                limit: None,
                properties: Vec::new(),
            },
        }
    }

    pub fn to_builder(&self) -> QueryInfoBuilder {
        QueryInfoBuilder {
            inner: self.clone(),
        }
    }

    pub fn meta_class(&self) -> &'static MetaClass {
        self.meta_class
    }

    pub fn predicate(&self) -> Option<&Arc<Expression>> {
        self.predicate.as_ref()
    }

    pub fn mapping(&self) -> Option<&Arc<Expression>> {
        self.mapping.as_ref()
    }

    pub fn sorting(&self) -> &[SortingInfo] {
        &self.sorting
    }

    pub fn skip(&self) -> Option<u64> {
        self.skip
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn properties(&self) -> &[PropertyExpression] {
        &self.properties
    }

    /// Type of the values the query yields, after mapping
    pub fn object_type(&self) -> ValueType {
        match &self.mapping {
            Some(mapping) => mapping.object_type(),
            None => self.meta_class.as_type(),
        }
    }

    /// Metadata of the yielded entities, `None` when the mapping yields plain values
    pub fn result_meta_class(&self) -> Option<&'static MetaClass> {
        match &self.mapping {
            Some(mapping) => mapping.object_type().entity_type().map(|e| e.meta_class()),
            None => Some(self.meta_class),
        }
    }

    /// Check the descriptor can be executed
    ///
    /// Compiles the predicate, mapping and sort keys so unsupported expressions
    /// surface before any stream is opened, and checks every projected
    /// property is rooted at the query's result type.
    pub fn validate(&self) -> Result<()> {
        self.check_argument("predicate", self.predicate.as_deref())?;
        self.check_argument("mapping", self.mapping.as_deref())?;
        for sorting in &self.sorting {
            self.check_argument("sort key", Some(sorting.expression.as_ref()))?;
        }
        if let Some(predicate) = &self.predicate {
            if predicate.capability() != Capability::Boolean {
                return Err(RepositoryError::invalid_query(format!(
                    "predicate '{}' is not a boolean expression",
                    predicate
                )));
            }
        }

        let result_type = self.object_type();
        for property in &self.properties {
            if property.root_type() != result_type {
                return Err(RepositoryError::invalid_query(format!(
                    "projected property '{}' is rooted at {}, expected {}",
                    property,
                    property.root_type(),
                    result_type
                )));
            }
        }

        CompiledQuery::new(self).map(|_| ())
    }

    fn check_argument(&self, role: &str, expression: Option<&Expression>) -> Result<()> {
        let Some(expression) = expression else {
            return Ok(());
        };
        match expression.argument_type() {
            Some(ValueType::Entity(entity)) if entity.name() != self.meta_class.name() => {
                Err(RepositoryError::invalid_query(format!(
                    "{} '{}' is evaluated against {}, query targets {}",
                    role,
                    expression,
                    entity.name(),
                    self.meta_class.name()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Query selecting the entity with the given key
    pub fn by_key(meta_class: &'static MetaClass, key: Value) -> Result<QueryInfo> {
        let key_property = meta_class.key_property().ok_or_else(|| {
            RepositoryError::invalid_query(format!("{} has no key property", meta_class.name()))
        })?;
        let predicate = Expression::binary(
            ExpressionType::Equals,
            Capability::Boolean,
            Expression::property(Expression::argument(meta_class.as_type()), key_property.clone()),
            Expression::constant(key),
        );
        Ok(QueryInfo::builder(meta_class)
            .predicate(predicate)
            .limit(1)
            .build())
    }
}

impl fmt::Debug for QueryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("QueryInfo");
        debug.field("meta_class", &self.meta_class.name());
        if let Some(predicate) = &self.predicate {
            debug.field("predicate", &predicate.to_string());
        }
        if let Some(mapping) = &self.mapping {
            debug.field("mapping", &mapping.to_string());
        }
        debug
            .field("sorting", &self.sorting.len())
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field(
                "properties",
                &self
                    .properties
                    .iter()
                    .map(PropertyExpression::path)
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`QueryInfo`]
#[derive(Debug, Clone)]
pub struct QueryInfoBuilder {
    inner: QueryInfo,
}

impl QueryInfoBuilder {
    /// Apply a transformation, for pipelines deriving one query from another
    pub fn apply<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        f(self)
    }

    /// Replace the predicate
    pub fn predicate(mut self, predicate: Arc<Expression>) -> Self {
        self.inner.predicate = Some(predicate);
        self
    }

    /// And-combine with the existing predicate
    pub fn filter(mut self, predicate: Arc<Expression>) -> Self {
        self.inner.predicate = Some(match self.inner.predicate.take() {
            Some(existing) => Expression::binary(
                ExpressionType::And,
                Capability::Boolean,
                existing,
                predicate,
            ),
            None => predicate,
        });
        self
    }

    pub fn clear_predicate(mut self) -> Self {
        self.inner.predicate = None;
        self
    }

    pub fn mapping(mut self, mapping: Arc<Expression>) -> Self {
        self.inner.mapping = Some(mapping);
        self
    }

    pub fn clear_mapping(mut self) -> Self {
        self.inner.mapping = None;
        self
    }

    pub fn sort(mut self, expression: Arc<Expression>, ascending: bool) -> Self {
        self.inner.sorting.push(SortingInfo {
            expression,
            ascending,
        });
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.inner.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.inner.limit = Some(limit);
        self
    }

    pub fn clear_paging(mut self) -> Self {
        self.inner.skip = None;
        self.inner.limit = None;
        self
    }

    /// Add a projected property; duplicates are ignored
    pub fn property(mut self, property: PropertyExpression) -> Self {
        if !self.inner.properties.contains(&property) {
            self.inner.properties.push(property);
        }
        self
    }

    pub fn properties_add_all<I>(self, properties: I) -> Self
    where
        I: IntoIterator<Item = PropertyExpression>,
    {
        properties
            .into_iter()
            .fold(self, |builder, property| builder.property(property))
    }

    pub fn clear_properties(mut self) -> Self {
        self.inner.properties.clear();
        self
    }

    pub fn build(self) -> QueryInfo {
        self.inner
    }
}

fn saturating_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Executable form of a [`QueryInfo`], shared by in-process evaluators
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    predicate: Option<CompiledPredicate>,
    mapping: Option<CompiledExpression>,
    comparator: CompiledComparator,
    properties: Vec<PropertyExpression>,
    skip: usize,
    limit: Option<usize>,
}

impl CompiledQuery {
    pub fn new(query: &QueryInfo) -> Result<Self> {
        let predicate = query
            .predicate()
            .map(|p| compile_predicate(p))
            .transpose()?;
        let mapping = query.mapping().map(|m| compile(m)).transpose()?;
        let mut comparator = CompiledComparator::default();
        for sorting in query.sorting() {
            comparator = comparator.then(compile_comparator(&sorting.expression, sorting.ascending)?);
        }
        Ok(Self {
            predicate,
            mapping,
            comparator,
            properties: query.properties().to_vec(),
            skip: query.skip().map(saturating_usize).unwrap_or(0),
            limit: query.limit().map(saturating_usize),
        })
    }

    pub fn matches(&self, entity: &Value) -> bool {
        self.predicate
            .as_ref()
            .map(|p| p.test(entity))
            .unwrap_or(true)
    }

    /// Mapping and projection applied to a matching entity
    pub fn shape(&self, entity: &Value) -> Value {
        let mapped = match &self.mapping {
            Some(mapping) => mapping.evaluate(entity),
            None => entity.clone(),
        };
        project(&mapped, &self.properties)
    }

    /// Filter, sort and paginate a snapshot of entities, without shaping
    pub fn select<'a, I>(&self, entities: I) -> Vec<&'a Value>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut matching: Vec<&Value> = entities.into_iter().filter(|e| self.matches(e)).collect();
        if !self.comparator.is_empty() {
            matching.sort_by(|a, b| self.comparator.compare(a, b));
        }
        matching
            .into_iter()
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Filter, sort, paginate and shape a snapshot of entities
    pub fn execute<'a, I>(&self, entities: I) -> Vec<Value>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        self.select(entities)
            .into_iter()
            .map(|e| self.shape(e))
            .collect()
    }
}
