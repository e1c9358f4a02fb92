//! QueryProvider Trait - Backend Abstraction Layer
//!
//! This module defines the `QueryProvider` trait: the contract every backend
//! adapter and every decorator satisfies. A provider manages collections of
//! entity documents (one collection per entity type) and offers one-shot
//! queries, live queries, single-entity writes and aggregation.
//!
//! # Architecture
//!
//! - **Object Safe**: Providers are used as `Arc<dyn QueryProvider>` so
//!   decorators can wrap any backend without knowing its concrete type
//! - **Dynamic Documents**: Entities travel as `serde_json::Value`; the typed
//!   repository facade encodes and decodes at the edge
//! - **Streams**: Query results and notifications are `'static` boxed streams;
//!   dropping a stream releases every resource feeding it
//!
//! # Raw Providers vs Decorators
//!
//! A raw provider's `live_query` returns the collection's change feed: every
//! committed change to the collection, unfiltered, subscribed eagerly when the
//! call returns. The `LiveQueryProvider` decorator turns that feed into
//! per-query notifications (initial snapshot, predicate transitions,
//! duplicate suppression). It reads its initial state through `snapshot`,
//! whose per-key versions tell it which feed events the snapshot already
//! reflects.
//!
//! # Examples
//!
//! ```rust,no_run
//! use entityflow_core::query::{QueryInfo, QueryProvider};
//! use entityflow_core::models::MetaClass;
//! use futures::StreamExt;
//!
//! async fn dump(provider: &dyn QueryProvider, meta: &'static MetaClass) -> entityflow_core::Result<()> {
//!     let mut results = provider.query(QueryInfo::builder(meta).build()).await?;
//!     while let Some(entity) = results.next().await {
//!         println!("{}", entity?);
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::{RepositoryError, Result};
use crate::models::{MetaClass, Notification};
use crate::query::aggregator::Aggregator;
use crate::query::query_info::QueryInfo;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Finite stream of query results
pub type EntityStream = BoxStream<'static, Result<Value>>;

/// Unbounded stream of change notifications
pub type NotificationStream = BoxStream<'static, Result<Notification>>;

/// Point-in-time read of a collection
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Entities matching the query, unshaped
    pub entities: Vec<Value>,
    /// Last committed version per canonical key, deleted keys included
    ///
    /// Empty when the backend does not track versions.
    pub versions: HashMap<String, u64>,
}

/// Abstraction over a queryable, mutable entity store
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the decorator chain is shared across
/// tasks.
///
/// # Method Categories
///
/// - **Writes**: `insert`, `update`, `upsert`, `delete`, `drop_all`
/// - **Reads**: `find`, `query`, `snapshot`, `aggregate`
/// - **Live**: `live_query`, `supports_change_feed`
#[async_trait]
pub trait QueryProvider: Send + Sync {
    /// Insert a new entity
    ///
    /// # Errors
    ///
    /// - `DuplicateKey` if an entity with the same key exists
    /// - `UniqueConstraint` if a unique index rejects the document
    async fn insert(&self, meta: &'static MetaClass, entity: Value) -> Result<Value>;

    /// Replace an existing entity
    ///
    /// When `expected_version` is set the write only succeeds if the stored
    /// version matches.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the entity does not exist
    /// - `ConcurrentModification` if the stored version differs from `expected_version`
    async fn update(
        &self,
        meta: &'static MetaClass,
        entity: Value,
        expected_version: Option<u64>,
    ) -> Result<Value>;

    /// Insert or replace
    async fn upsert(&self, meta: &'static MetaClass, entity: Value) -> Result<Value>;

    /// Delete by key; `Ok(false)` when nothing was stored under the key
    async fn delete(&self, meta: &'static MetaClass, key: Value) -> Result<bool>;

    /// Fetch by key
    ///
    /// The default implementation runs a key-equality query limited to one
    /// result.
    async fn find(&self, meta: &'static MetaClass, key: Value) -> Result<Option<Value>> {
        let mut results = self.query(QueryInfo::by_key(meta, key)?).await?;
        results.next().await.transpose()
    }

    /// Run a one-shot query
    ///
    /// Predicate, sort, pagination, mapping and projection are applied. The
    /// returned stream is finite.
    async fn query(&self, query: QueryInfo) -> Result<EntityStream>;

    /// Read the entities matching `query` with the versions they were read at
    ///
    /// The default implementation runs `query` and reports no versions.
    async fn snapshot(&self, query: QueryInfo) -> Result<Snapshot> {
        let entities = self.query(query).await?.try_collect().await?;
        Ok(Snapshot {
            entities,
            versions: HashMap::new(),
        })
    }

    /// Subscribe to changes
    ///
    /// Raw providers return the collection's change feed; decorators refine it
    /// into per-query notifications.
    async fn live_query(&self, query: QueryInfo) -> Result<NotificationStream>;

    /// Evaluate an aggregation over the entities matching `query`
    async fn aggregate(&self, query: QueryInfo, aggregator: Aggregator) -> Result<Value>;

    /// Remove every stored entity
    async fn drop_all(&self) -> Result<()>;

    /// `false` when the backend has no change feed and live queries must poll
    fn supports_change_feed(&self) -> bool {
        true
    }
}

/// Wraps a provider with additional behaviour
pub trait Decorator: Send + Sync {
    fn decorate(&self, inner: Arc<dyn QueryProvider>) -> Arc<dyn QueryProvider>;
}

impl<F> Decorator for F
where
    F: Fn(Arc<dyn QueryProvider>) -> Arc<dyn QueryProvider> + Send + Sync,
{
    fn decorate(&self, inner: Arc<dyn QueryProvider>) -> Arc<dyn QueryProvider> {
        self(inner)
    }
}

/// Ordered list of decorators; the first entry ends up outermost
#[derive(Default)]
pub struct Decorators {
    decorators: Vec<Box<dyn Decorator>>,
}

impl Decorators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, decorator: impl Decorator + 'static) -> Self {
        self.decorators.push(Box::new(decorator));
        self
    }

    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }

    /// Wrap `provider` so that the first decorator is outermost
    pub fn chain(&self, provider: Arc<dyn QueryProvider>) -> Arc<dyn QueryProvider> {
        self.decorators
            .iter()
            .rev()
            .fold(provider, |inner, decorator| decorator.decorate(inner))
    }
}

/// Key of an entity document, or `InvalidEntity` when absent
pub fn require_key(meta: &MetaClass, entity: &Value) -> Result<Value> {
    if !entity.is_object() {
        return Err(RepositoryError::invalid_entity(format!(
            "{} document must be an object",
            meta.name()
        )));
    }
    meta.key_of(entity).ok_or_else(|| {
        RepositoryError::invalid_entity(format!("{} document has no key", meta.name()))
    })
}
