//! Mandatory Property Expansion
//!
//! A projection names the properties a caller wants; the backend also needs
//! the properties those depend on. For every requested property the decorator
//! adds, in order:
//!
//! 1. its parent path (`vendor` for `vendor.name`)
//! 2. the property itself
//! 3. the inputs of a computed property (`depends_on`)
//! 4. the key and `mandatory` properties of a referenced or embedded entity
//!
//! followed by the key and `mandatory` properties of the result type. The
//! expansion is deduplicated in first-seen order and is a fixed point:
//! expanding an expanded set returns it unchanged. An empty projection means
//! "all properties" and passes through untouched.

use crate::error::Result;
use crate::expressions::PropertyExpression;
use crate::models::{MetaClass, PropertyMeta};
use crate::query::{
    Aggregator, Decorator, EntityStream, NotificationStream, QueryInfo, QueryProvider, Snapshot,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

/// Expand `requested` with every property it mandates
pub fn expand_properties(
    requested: &[PropertyExpression],
    result_meta: Option<&'static MetaClass>,
) -> Vec<PropertyExpression> {
    let mut expanded = Vec::new();
    let mut path_types = HashSet::new();
    for property in requested {
        include(property, &mut expanded, &mut path_types);
    }
    if let Some(meta) = result_meta {
        for property in meta.always_required() {
            include(
                &PropertyExpression::root(meta, property),
                &mut expanded,
                &mut path_types,
            );
        }
    }
    expanded
}

/// Metaclass declaring the last segment of `property`
fn declaring_meta(property: &PropertyExpression) -> Option<&'static MetaClass> {
    match property.parent() {
        Some(parent) => parent.property().referenced_meta_class(),
        None => property
            .root_type()
            .entity_type()
            .map(|entity| entity.meta_class()),
    }
}

fn sibling(property: &PropertyExpression, meta: &PropertyMeta) -> Option<PropertyExpression> {
    match property.parent() {
        Some(parent) => Some(parent.child(meta)),
        None => declaring_meta(property).map(|declaring| PropertyExpression::root(declaring, meta)),
    }
}

fn include(
    property: &PropertyExpression,
    expanded: &mut Vec<PropertyExpression>,
    path_types: &mut HashSet<&'static str>,
) {
    if expanded.contains(property) {
        return;
    }
    if let Some(parent) = property.parent() {
        include(&parent, expanded, path_types);
    }
    if !expanded.contains(property) {
        expanded.push(property.clone());
    }

    if let Some(declaring) = declaring_meta(property) {
        for input in property.property().depends_on() {
            let input = declaring
                .property(input)
                .and_then(|meta| sibling(property, meta));
            if let Some(input) = input {
                include(&input, expanded, path_types);
            }
        }
    }

    // Types already on the current path are not descended into again
    if let Some(referenced) = property.property().referenced_meta_class() {
        if path_types.insert(referenced.name()) {
            for required in referenced.always_required() {
                include(&property.child(required), expanded, path_types);
            }
            path_types.remove(referenced.name());
        }
    }
}

fn paths(properties: &[PropertyExpression]) -> String {
    properties
        .iter()
        .map(PropertyExpression::path)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Query provider decorator adding mandatory properties to projections
pub struct MandatoryPropertiesProvider {
    inner: Arc<dyn QueryProvider>,
}

impl MandatoryPropertiesProvider {
    pub fn new(inner: Arc<dyn QueryProvider>) -> Self {
        Self { inner }
    }

    pub fn decorator() -> impl Decorator {
        |inner: Arc<dyn QueryProvider>| -> Arc<dyn QueryProvider> { Arc::new(Self::new(inner)) }
    }

    fn include_mandatory(query: QueryInfo) -> QueryInfo {
        if query.properties().is_empty() {
            return query;
        }
        let expanded = expand_properties(query.properties(), query.result_meta_class());
        trace!(
            "Requested properties: [{}], final properties: [{}]",
            paths(query.properties()),
            paths(&expanded)
        );
        query
            .to_builder()
            .apply(|builder| builder.clear_properties().properties_add_all(expanded))
            .build()
    }
}

#[async_trait]
impl QueryProvider for MandatoryPropertiesProvider {
    async fn insert(&self, meta: &'static MetaClass, entity: Value) -> Result<Value> {
        self.inner.insert(meta, entity).await
    }

    async fn update(
        &self,
        meta: &'static MetaClass,
        entity: Value,
        expected_version: Option<u64>,
    ) -> Result<Value> {
        self.inner.update(meta, entity, expected_version).await
    }

    async fn upsert(&self, meta: &'static MetaClass, entity: Value) -> Result<Value> {
        self.inner.upsert(meta, entity).await
    }

    async fn delete(&self, meta: &'static MetaClass, key: Value) -> Result<bool> {
        self.inner.delete(meta, key).await
    }

    async fn find(&self, meta: &'static MetaClass, key: Value) -> Result<Option<Value>> {
        self.inner.find(meta, key).await
    }

    async fn query(&self, query: QueryInfo) -> Result<EntityStream> {
        self.inner.query(Self::include_mandatory(query)).await
    }

    async fn snapshot(&self, query: QueryInfo) -> Result<Snapshot> {
        self.inner.snapshot(Self::include_mandatory(query)).await
    }

    async fn live_query(&self, query: QueryInfo) -> Result<NotificationStream> {
        self.inner.live_query(Self::include_mandatory(query)).await
    }

    async fn aggregate(&self, query: QueryInfo, aggregator: Aggregator) -> Result<Value> {
        self.inner.aggregate(query, aggregator).await
    }

    async fn drop_all(&self) -> Result<()> {
        self.inner.drop_all().await
    }

    fn supports_change_feed(&self) -> bool {
        self.inner.supports_change_feed()
    }
}
