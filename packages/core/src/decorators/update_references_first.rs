//! Reference-First Writes
//!
//! Before an entity is inserted, updated or upserted, every entity it
//! references is made to exist in its own collection, so no stored document
//! points at a missing key.
//!
//! # Algorithm
//!
//! References are walked depth-first. For each referenced entity:
//!
//! - its own references are resolved first
//! - if it is missing it is inserted; if stored with different values for
//!   the fields the reference carries, the stored document is overlaid with
//!   them and upserted; otherwise nothing is written
//!
//! Entities on the current write path form a visiting set. A reference back
//! into that set closes a cycle: when the target does not exist yet, a
//! key-only stub is inserted and the walk does not descend. When the
//! top-level entity itself was stubbed, its final write becomes an upsert.

use crate::error::{RepositoryError, Result, ResultExt};
use crate::models::values::{canonical_key, values_equal};
use crate::models::MetaClass;
use crate::query::{
    require_key, Aggregator, Decorator, EntityStream, NotificationStream, QueryInfo,
    QueryProvider, Snapshot,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

type EntityId = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Insert,
    Update(Option<u64>),
    Upsert,
}

#[derive(Default)]
struct WalkState {
    visiting: Vec<EntityId>,
    stubbed: HashSet<EntityId>,
}

fn entity_id(meta: &MetaClass, key: &Value) -> EntityId {
    (meta.name().to_string(), canonical_key(key))
}

/// `stored` overlaid with the non-null fields of `reference`, when any of them differ
///
/// A null field in a reference means "not loaded" and never clears stored data.
fn refreshed(stored: &Value, reference: &Value) -> Option<Value> {
    let (Some(stored_fields), Some(reference_fields)) = (stored.as_object(), reference.as_object())
    else {
        return None;
    };
    let carried = || reference_fields.iter().filter(|(_, value)| !value.is_null());
    let stale = carried().any(|(name, value)| {
        stored_fields
            .get(name)
            .map_or(true, |stored| !values_equal(stored, value))
    });
    if !stale {
        return None;
    }
    let mut merged = stored_fields.clone();
    for (name, value) in carried() {
        merged.insert(name.clone(), value.clone());
    }
    Some(Value::Object(merged))
}

/// Query provider decorator writing referenced entities before their referrers
pub struct UpdateReferencesFirstProvider {
    inner: Arc<dyn QueryProvider>,
}

impl UpdateReferencesFirstProvider {
    pub fn new(inner: Arc<dyn QueryProvider>) -> Self {
        Self { inner }
    }

    pub fn decorator() -> impl Decorator {
        |inner: Arc<dyn QueryProvider>| -> Arc<dyn QueryProvider> { Arc::new(Self::new(inner)) }
    }

    async fn write(
        &self,
        meta: &'static MetaClass,
        entity: Value,
        mode: WriteMode,
    ) -> Result<Value> {
        let key = require_key(meta, &entity)?;
        let has_references = meta
            .properties()
            .iter()
            .any(|p| p.referenced_meta_class().is_some());
        if !has_references {
            return self.write_entity(meta, entity, mode).await;
        }

        if let WriteMode::Update(_) = mode {
            // Stubs must not make a missing entity updatable
            if self.inner.find(meta, key.clone()).await?.is_none() {
                return Err(RepositoryError::not_found(meta.name(), canonical_key(&key)));
            }
        }

        let top = entity_id(meta, &key);
        let mut state = WalkState::default();
        state.visiting.push(top.clone());
        self.resolve(meta, &entity, &mut state).await?;

        let mode = if mode == WriteMode::Insert && state.stubbed.contains(&top) {
            debug!("{} {} was stubbed, writing it as an upsert", top.0, top.1);
            WriteMode::Upsert
        } else {
            mode
        };
        self.write_entity(meta, entity, mode).await
    }

    async fn write_entity(
        &self,
        meta: &'static MetaClass,
        entity: Value,
        mode: WriteMode,
    ) -> Result<Value> {
        match mode {
            WriteMode::Insert => self.inner.insert(meta, entity).await,
            WriteMode::Update(expected_version) => {
                self.inner.update(meta, entity, expected_version).await
            }
            WriteMode::Upsert => self.inner.upsert(meta, entity).await,
        }
    }

    /// Write every entity referenced by `entity`, depth-first
    fn resolve<'a>(
        &'a self,
        meta: &'static MetaClass,
        entity: &'a Value,
        state: &'a mut WalkState,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            for property in meta.properties() {
                let Some(referenced) = property.referenced_meta_class() else {
                    continue;
                };
                let value = property.get(entity);
                if !value.is_object() {
                    continue;
                }
                let context = || format!("resolving reference {}.{}", meta.name(), property.name());

                if property.is_embedded() {
                    self.resolve(referenced, &value, state)
                        .await
                        .with_context(context)?;
                    continue;
                }
                self.resolve_reference(referenced, value, state)
                    .await
                    .with_context(context)?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn resolve_reference(
        &self,
        meta: &'static MetaClass,
        value: Value,
        state: &mut WalkState,
    ) -> Result<()> {
        let key = require_key(meta, &value)?;
        let id = entity_id(meta, &key);

        if state.visiting.contains(&id) {
            if !state.stubbed.contains(&id) && self.inner.find(meta, key.clone()).await?.is_none() {
                debug!("Breaking reference cycle at {} {} with a key stub", id.0, id.1);
                self.inner
                    .insert(meta, meta.key_stub(key))
                    .await
                    .map_err(|e| match e {
                        RepositoryError::UniqueConstraint { .. } => RepositoryError::reference_cycle(
                            format!("key stub for {} {} violates a unique index", id.0, id.1),
                        ),
                        other => other,
                    })?;
                state.stubbed.insert(id);
            }
            return Ok(());
        }

        state.visiting.push(id);
        let resolved = self.resolve(meta, &value, state).await;
        state.visiting.pop();
        resolved?;

        match self.inner.find(meta, key).await? {
            None => {
                self.inner.insert(meta, value).await?;
            }
            Some(stored) => {
                if let Some(merged) = refreshed(&stored, &value) {
                    self.inner.upsert(meta, merged).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueryProvider for UpdateReferencesFirstProvider {
    async fn insert(&self, meta: &'static MetaClass, entity: Value) -> Result<Value> {
        self.write(meta, entity, WriteMode::Insert)
            .await
            .with_context(|| format!("insert {}", meta.name()))
    }

    async fn update(
        &self,
        meta: &'static MetaClass,
        entity: Value,
        expected_version: Option<u64>,
    ) -> Result<Value> {
        self.write(meta, entity, WriteMode::Update(expected_version))
            .await
            .with_context(|| format!("update {}", meta.name()))
    }

    async fn upsert(&self, meta: &'static MetaClass, entity: Value) -> Result<Value> {
        self.write(meta, entity, WriteMode::Upsert)
            .await
            .with_context(|| format!("upsert {}", meta.name()))
    }

    async fn delete(&self, meta: &'static MetaClass, key: Value) -> Result<bool> {
        self.inner.delete(meta, key).await
    }

    async fn find(&self, meta: &'static MetaClass, key: Value) -> Result<Option<Value>> {
        self.inner.find(meta, key).await
    }

    async fn query(&self, query: QueryInfo) -> Result<EntityStream> {
        self.inner.query(query).await
    }

    async fn snapshot(&self, query: QueryInfo) -> Result<Snapshot> {
        self.inner.snapshot(query).await
    }

    async fn live_query(&self, query: QueryInfo) -> Result<NotificationStream> {
        self.inner.live_query(query).await
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
