//! Repository - Typed Facade over the Provider Pipeline
//!
//! This module turns typed expressions into [`QueryInfo`] descriptors, sends
//! them through the decorator chain and decodes the resulting documents into
//! entity structs.
//!
//! # Architecture
//!
//! - **Builder**: [`RepositoryBuilder`] assembles the recommended decorator
//!   order from a [`RepositoryConfig`]; disabled decorators are skipped
//! - **Entity Sets**: [`EntitySet<T>`] offers keyed CRUD for one entity type
//! - **Queries**: [`EntityQuery<S, T>`] accumulates predicate, sort, paging,
//!   projection and mapping, then executes as a one-shot stream, a live
//!   notification stream or an aggregate
//!
//! # Examples
//!
//! ```rust,no_run
//! use entityflow_core::db::MemoryQueryProvider;
//! use entityflow_core::services::Repository;
//! use std::sync::Arc;
//!
//! # async fn example() -> entityflow_core::Result<()> {
//! let repository = Repository::builder(Arc::new(MemoryQueryProvider::new())).build()?;
//! # Ok(())
//! # }
//! ```

use crate::db::MemoryQueryProvider;
use crate::decorators::{
    LiveQueryProvider, MandatoryPropertiesProvider, SchedulingProvider,
    UpdateReferencesFirstProvider,
};
use crate::error::{RepositoryError, Result, ResultExt};
use crate::expressions::{BooleanExpression, Expr, Ordered, PropertyExpression};
use crate::models::{Entity, MetaClass, Notification};
use crate::query::{Aggregator, Decorator, Decorators, QueryInfo, QueryInfoBuilder, QueryProvider};
use crate::services::RepositoryConfig;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Assembles a [`Repository`] over a raw provider
pub struct RepositoryBuilder {
    raw: Arc<dyn QueryProvider>,
    config: RepositoryConfig,
    runtime: Option<Handle>,
    extra: Decorators,
}

impl RepositoryBuilder {
    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime the scheduler dispatches onto (defaults to the current one)
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Additional decorator placed directly above the raw provider
    pub fn decorator(mut self, decorator: impl Decorator + 'static) -> Self {
        self.extra = self.extra.with(decorator);
        self
    }

    pub fn build(self) -> Result<Repository> {
        let config = self.config;
        config
            .validate()
            .map_err(RepositoryError::configuration)?;

        let mut decorators = Decorators::new();
        let mut names = Vec::new();

        if config.scheduling {
            let runtime = match self.runtime {
                Some(runtime) => runtime,
                None => Handle::try_current().map_err(|e| {
                    RepositoryError::configuration(format!(
                        "scheduling requires a tokio runtime: {}",
                        e
                    ))
                })?,
            };
            decorators = decorators.with(SchedulingProvider::decorator(
                runtime,
                config.max_concurrent_requests,
                config.admission_timeout(),
                config.stream_buffer,
            ));
            names.push("scheduling");
        }
        if config.live_queries {
            decorators = decorators.with(LiveQueryProvider::decorator(config.live_poll_interval()));
            names.push("live_queries");
        }
        if config.mandatory_properties {
            decorators = decorators.with(MandatoryPropertiesProvider::decorator());
            names.push("mandatory_properties");
        }
        if config.update_references_first {
            decorators = decorators.with(UpdateReferencesFirstProvider::decorator());
            names.push("update_references_first");
        }

        let provider = decorators.chain(self.extra.chain(self.raw));
        debug!(
            "Built repository pipeline: [{}] + {} custom",
            names.join(", "),
            self.extra.len()
        );

        Ok(Repository { provider, config })
    }
}

/// Entry point for typed access to a provider pipeline
#[derive(Clone)]
pub struct Repository {
    provider: Arc<dyn QueryProvider>,
    config: RepositoryConfig,
}

impl Repository {
    pub fn builder(raw: Arc<dyn QueryProvider>) -> RepositoryBuilder {
        RepositoryBuilder {
            raw,
            config: RepositoryConfig::default(),
            runtime: None,
            extra: Decorators::new(),
        }
    }

    /// Repository over a fresh in-memory store sized by `config`
    pub fn in_memory(config: RepositoryConfig) -> Result<Repository> {
        let store = MemoryQueryProvider::new().with_change_feed_capacity(config.change_feed_capacity);
        Self::builder(Arc::new(store)).config(config).build()
    }

    /// Outermost provider of the pipeline
    pub fn provider(&self) -> &Arc<dyn QueryProvider> {
        &self.provider
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn entities<T: Entity>(&self) -> EntitySet<T> {
        EntitySet {
            provider: self.provider.clone(),
            _entity: PhantomData,
        }
    }

    /// Remove every stored entity
    pub async fn drop_all(&self) -> Result<()> {
        self.provider.drop_all().await
    }
}

/// Keyed access to the entities of one type
pub struct EntitySet<T> {
    provider: Arc<dyn QueryProvider>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntitySet<T> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> EntitySet<T> {
    fn meta() -> &'static MetaClass {
        T::meta_class()
    }

    pub async fn find(&self, key: &T::Key) -> Result<Option<T>> {
        let key = serde_json::to_value(key)?;
        match self.provider.find(Self::meta(), key).await? {
            Some(document) => decode(document).map(Some),
            None => Ok(None),
        }
    }

    pub async fn insert(&self, entity: &T) -> Result<T> {
        let document = serde_json::to_value(entity)?;
        decode(self.provider.insert(Self::meta(), document).await?)
    }

    /// Replace a stored entity, optionally checking its current version
    pub async fn update(&self, entity: &T, expected_version: Option<u64>) -> Result<T> {
        let document = serde_json::to_value(entity)?;
        decode(
            self.provider
                .update(Self::meta(), document, expected_version)
                .await?,
        )
    }

    pub async fn upsert(&self, entity: &T) -> Result<T> {
        let document = serde_json::to_value(entity)?;
        decode(self.provider.upsert(Self::meta(), document).await?)
    }

    /// Returns whether an entity was removed
    pub async fn delete(&self, key: &T::Key) -> Result<bool> {
        let key = serde_json::to_value(key)?;
        self.provider.delete(Self::meta(), key).await
    }

    pub fn query(&self) -> EntityQuery<T, T> {
        EntityQuery {
            provider: self.provider.clone(),
            builder: QueryInfo::builder(Self::meta()),
            _types: PhantomData,
        }
    }

    /// Shorthand for `query().filter(predicate)`
    pub fn filter(&self, predicate: &BooleanExpression<T>) -> EntityQuery<T, T> {
        self.query().filter(predicate)
    }
}

/// Query over entities of type `S` producing values of type `T`
pub struct EntityQuery<S, T> {
    provider: Arc<dyn QueryProvider>,
    builder: QueryInfoBuilder,
    _types: PhantomData<fn() -> (S, T)>,
}

impl<S, T> Clone for EntityQuery<S, T> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            builder: self.builder.clone(),
            _types: PhantomData,
        }
    }
}

impl<S: Entity> EntityQuery<S, S> {
    /// Map each matching entity through `mapping`
    ///
    /// Sorting and filtering still apply to the source entities.
    pub fn select<U, C>(self, mapping: &Expr<S, U, C>) -> EntityQuery<S, U>
    where
        U: DeserializeOwned + Send + 'static,
    {
        EntityQuery {
            provider: self.provider,
            builder: self.builder.mapping(mapping.expression().clone()),
            _types: PhantomData,
        }
    }
}

impl<S: Entity, T: Entity> EntityQuery<S, T> {
    /// Restrict results to `property` plus the properties always required
    pub fn include<U, C>(mut self, property: &Expr<T, U, C>) -> Result<Self> {
        let property = PropertyExpression::try_from(property)
            .context(format!("include on {}", T::NAME))?;
        self.builder = self.builder.property(property);
        Ok(self)
    }
}

impl<S: Entity, T: DeserializeOwned + Send + 'static> EntityQuery<S, T> {
    /// And-combine `predicate` with the current filter
    pub fn filter(mut self, predicate: &BooleanExpression<S>) -> Self {
        self.builder = self.builder.filter(predicate.expression().clone());
        self
    }

    pub fn order_by<U, C: Ordered>(mut self, expression: &Expr<S, U, C>) -> Self {
        self.builder = self.builder.sort(expression.expression().clone(), true);
        self
    }

    pub fn order_by_descending<U, C: Ordered>(mut self, expression: &Expr<S, U, C>) -> Self {
        self.builder = self.builder.sort(expression.expression().clone(), false);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.builder = self.builder.skip(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.builder = self.builder.limit(limit);
        self
    }

    /// The descriptor this query sends down the pipeline
    pub fn query_info(&self) -> QueryInfo {
        self.builder.clone().build()
    }

    pub async fn stream(&self) -> Result<BoxStream<'static, Result<T>>> {
        let results = self.provider.query(self.query_info()).await?;
        Ok(results.and_then(|v| futures::future::ready(decode(v))).boxed())
    }

    pub async fn to_list(&self) -> Result<Vec<T>> {
        self.stream().await?.try_collect().await
    }

    pub async fn first(&self) -> Result<Option<T>> {
        let query = self.clone().limit(1);
        let mut results = query.stream().await?;
        results.next().await.transpose()
    }

    /// Notifications for every change to the matching set
    ///
    /// Paging is ignored; the stream starts with one `Create` per current match.
    pub async fn live(&self) -> Result<BoxStream<'static, Result<Notification<T>>>> {
        let notifications = self.provider.live_query(self.query_info()).await?;
        Ok(notifications
            .and_then(|n| futures::future::ready(n.try_map(decode)))
            .boxed())
    }

    pub async fn count(&self) -> Result<u64> {
        let count = self
            .provider
            .aggregate(self.query_info(), Aggregator::Count)
            .await?;
        count
            .as_u64()
            .ok_or_else(|| RepositoryError::backend_unavailable(format!("count returned {}", count)))
    }

    /// Aggregate over the matching entities, decoding the result as `R`
    pub async fn aggregate<R: DeserializeOwned>(&self, aggregator: Aggregator) -> Result<R> {
        decode(self.provider.aggregate(self.query_info(), aggregator).await?)
    }
}

#[cfg(test)]
#[path = "repository_test.rs"]
mod repository_test;
