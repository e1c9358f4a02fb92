//! In-Memory Query Provider
//!
//! Reference backend adapter: one ordered map of documents per table, guarded
//! by a tokio `RwLock`, with a broadcast change feed.
//!
//! # Architecture
//!
//! - **Versions**: every key carries a version; the first insert of a key is
//!   version 1 and each update or delete adds one. Versions survive deletes
//!   (as tombstones) so they only ever grow for a given key.
//! - **Change feed**: each committed write is broadcast as a [`StoreEvent`]
//!   while the write lock is held, so per-key event order is commit order.
//! - **Unique indexes**: non-key properties annotated `indexable(unique)` are
//!   checked on every write.
//! - **Schema**: an optional [`SchemaProvider`] is asked to create the table
//!   before each read or write touching it.
//! - **Snapshots**: [`QueryProvider::snapshot`] reports the version of every
//!   key in the table, tombstones included, read under the same lock as the
//!   entities.
//! - **Lag**: a subscriber that falls behind the broadcast buffer receives a
//!   `FeedLagged` error item; the feed keeps running afterwards.
//! - **Polling mode**: [`MemoryQueryProvider::without_change_feed`] disables
//!   the change feed so live queries must fall back to polling.
//!
//! # Examples
//!
//! ```rust,no_run
//! use entityflow_core::db::MemoryQueryProvider;
//! use entityflow_core::query::QueryProvider;
//! use entityflow_core::schema::{CacheSchemaProvider, MemorySchemaProvider};
//! use std::sync::Arc;
//!
//! let schema = CacheSchemaProvider::decorate(Arc::new(MemorySchemaProvider::new("app")));
//! let store: Arc<dyn QueryProvider> = Arc::new(MemoryQueryProvider::new().with_schema(schema));
//! ```

use crate::db::events::StoreEvent;
use crate::error::{RepositoryError, Result, ResultExt};
use crate::expressions::compile;
use crate::models::values::{canonical_key, values_equal};
use crate::models::MetaClass;
use crate::query::{
    require_key, Aggregator, CompiledQuery, EntityStream, NotificationStream, QueryInfo,
    QueryProvider, Snapshot,
};
use crate::schema::SchemaProvider;
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Default broadcast capacity of the change feed
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Row {
    value: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct Table {
    /// Live rows by canonical key
    rows: BTreeMap<String, Row>,
    /// Last version of deleted keys
    tombstones: HashMap<String, u64>,
}

impl Table {
    fn next_version(&self, key: &str) -> u64 {
        self.tombstones.get(key).copied().unwrap_or(0) + 1
    }

    /// Reject `entity` if a unique index already holds one of its values
    /// under another key
    fn check_unique(&self, meta: &MetaClass, table: &str, key: &str, entity: &Value) -> Result<()> {
        for property in meta
            .properties()
            .iter()
            .filter(|p| p.is_unique() && !p.is_key())
        {
            let value = property.get(entity);
            if value.is_null() {
                continue;
            }
            let taken = self
                .rows
                .iter()
                .any(|(other, row)| other != key && values_equal(&property.get(&row.value), &value));
            if taken {
                return Err(RepositoryError::unique_constraint(table, property.name()));
            }
        }
        Ok(())
    }
}

/// In-memory document store implementing [`QueryProvider`]
///
/// Cloning is cheap; clones share the same tables and change feed.
#[derive(Clone)]
pub struct MemoryQueryProvider {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    event_tx: broadcast::Sender<StoreEvent>,
    schema: Option<Arc<dyn SchemaProvider>>,
    change_feed: bool,
    latency: Option<Duration>,
}

impl Default for MemoryQueryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueryProvider {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(DEFAULT_CHANGE_FEED_CAPACITY);
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            schema: None,
            change_feed: true,
            latency: None,
        }
    }

    /// Ensure tables through `schema` before touching them
    pub fn with_schema(mut self, schema: Arc<dyn SchemaProvider>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_change_feed_capacity(mut self, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        self.event_tx = event_tx;
        self
    }

    /// Disable the change feed; `live_query` fails and decorators must poll
    pub fn without_change_feed(mut self) -> Self {
        self.change_feed = false;
        self
    }

    /// Delay every operation, simulating backend I/O
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Subscribe to every committed change, across all tables
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    /// Number of open change-feed receivers
    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }

    /// Ignores send errors: having no subscriber is normal
    fn emit_event(&self, event: StoreEvent) {
        let _ = self.event_tx.send(event);
    }

    fn table_name(&self, meta: &MetaClass) -> String {
        match &self.schema {
            Some(schema) => schema.table_name(meta),
            None => meta.name().to_string(),
        }
    }

    async fn prepare(&self, meta: &'static MetaClass) -> Result<String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(schema) = &self.schema {
            schema
                .create_or_update(meta)
                .await
                .with_context(|| format!("ensuring schema for {}", meta.name()))?;
        }
        Ok(self.table_name(meta))
    }

    fn insert_row(
        &self,
        table: &mut Table,
        meta: &MetaClass,
        table_name: &str,
        key: String,
        entity: Value,
    ) -> Result<Value> {
        table.check_unique(meta, table_name, &key, &entity)?;
        let version = table.next_version(&key);
        table.tombstones.remove(&key);
        table.rows.insert(
            key,
            Row {
                value: entity.clone(),
                version,
            },
        );
        self.emit_event(StoreEvent::EntityCreated {
            table: table_name.to_string(),
            new_value: entity.clone(),
            version,
        });
        Ok(entity)
    }

    fn replace_row(
        &self,
        table: &mut Table,
        meta: &MetaClass,
        table_name: &str,
        key: &str,
        entity: Value,
    ) -> Result<Value> {
        table.check_unique(meta, table_name, key, &entity)?;
        let row = table
            .rows
            .get_mut(key)
            .ok_or_else(|| RepositoryError::not_found(table_name, key))?;
        let old_value = std::mem::replace(&mut row.value, entity.clone());
        row.version += 1;
        self.emit_event(StoreEvent::EntityUpdated {
            table: table_name.to_string(),
            old_value,
            new_value: entity.clone(),
            version: row.version,
        });
        Ok(entity)
    }
}

#[async_trait]
impl QueryProvider for MemoryQueryProvider {
    async fn insert(&self, meta: &'static MetaClass, entity: Value) -> Result<Value> {
        let key = canonical_key(&require_key(meta, &entity)?);
        let table_name = self.prepare(meta).await?;

        let mut tables = self.tables.write().await;
        let table = tables.entry(table_name.clone()).or_default();
        if table.rows.contains_key(&key) {
            return Err(RepositoryError::duplicate_key(table_name, key));
        }
        self.insert_row(table, meta, &table_name, key, entity)
    }

    async fn update(
        &self,
        meta: &'static MetaClass,
        entity: Value,
        expected_version: Option<u64>,
    ) -> Result<Value> {
        let key = canonical_key(&require_key(meta, &entity)?);
        let table_name = self.prepare(meta).await?;

        let mut tables = self.tables.write().await;
        let table = tables.entry(table_name.clone()).or_default();
        let actual = table
            .rows
            .get(&key)
            .map(|row| row.version)
            .ok_or_else(|| RepositoryError::not_found(&table_name, &key))?;
        if let Some(expected) = expected_version {
            if expected != actual {
                return Err(RepositoryError::concurrent_modification(
                    table_name, key, expected, actual,
                ));
            }
        }
        self.replace_row(table, meta, &table_name, &key, entity)
    }

    async fn upsert(&self, meta: &'static MetaClass, entity: Value) -> Result<Value> {
        let key = canonical_key(&require_key(meta, &entity)?);
        let table_name = self.prepare(meta).await?;

        let mut tables = self.tables.write().await;
        let table = tables.entry(table_name.clone()).or_default();
        if table.rows.contains_key(&key) {
            self.replace_row(table, meta, &table_name, &key, entity)
        } else {
            self.insert_row(table, meta, &table_name, key, entity)
        }
    }

    async fn delete(&self, meta: &'static MetaClass, key: Value) -> Result<bool> {
        let key = canonical_key(&key);
        let table_name = self.prepare(meta).await?;

        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(&table_name) else {
            return Ok(false);
        };
        let Some(row) = table.rows.remove(&key) else {
            return Ok(false);
        };
        let version = row.version + 1;
        table.tombstones.insert(key, version);
        self.emit_event(StoreEvent::EntityDeleted {
            table: table_name,
            old_value: row.value,
            version,
        });
        Ok(true)
    }

    async fn query(&self, query: QueryInfo) -> Result<EntityStream> {
        query.validate()?;
        let compiled = CompiledQuery::new(&query)?;
        let table_name = self.prepare(query.meta_class()).await?;

        let results = {
            let tables = self.tables.read().await;
            match tables.get(&table_name) {
                Some(table) => compiled.execute(table.rows.values().map(|row| &row.value)),
                None => Vec::new(),
            }
        };
        debug!("Query on {} returned {} row(s)", table_name, results.len());
        Ok(stream::iter(results.into_iter().map(Ok)).boxed())
    }

    async fn snapshot(&self, query: QueryInfo) -> Result<Snapshot> {
        query.validate()?;
        let compiled = CompiledQuery::new(&query)?;
        let table_name = self.prepare(query.meta_class()).await?;

        let tables = self.tables.read().await;
        let Some(table) = tables.get(&table_name) else {
            return Ok(Snapshot::default());
        };
        let entities = compiled.execute(table.rows.values().map(|row| &row.value));
        let versions = table
            .rows
            .iter()
            .map(|(key, row)| (key.clone(), row.version))
            .chain(table.tombstones.iter().map(|(key, version)| (key.clone(), *version)))
            .collect();
        Ok(Snapshot { entities, versions })
    }

    async fn live_query(&self, query: QueryInfo) -> Result<NotificationStream> {
        if !self.change_feed {
            return Err(RepositoryError::configuration(format!(
                "change feed disabled for {}",
                query.meta_class().name()
            )));
        }
        query.validate()?;
        let table_name = self.prepare(query.meta_class()).await?;

        // Subscribe before returning so no commit after this call is missed
        let events = BroadcastStream::new(self.event_tx.subscribe());
        debug!("Change feed subscription opened on {}", table_name);

        let feed = events.filter_map(move |event| {
            let notification = match event {
                Ok(event) if event.table() == table_name => Some(Ok(event.to_notification())),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("Change feed on {} lagged by {} event(s)", table_name, skipped);
                    Some(Err(RepositoryError::feed_lagged(table_name.clone(), skipped)))
                }
            };
            future::ready(notification)
        });
        Ok(feed.boxed())
    }

    async fn aggregate(&self, query: QueryInfo, aggregator: Aggregator) -> Result<Value> {
        query.validate()?;
        let compiled = CompiledQuery::new(&query)?;
        let operand = aggregator.operand().map(|e| compile(e)).transpose()?;
        let table_name = self.prepare(query.meta_class()).await?;

        let tables = self.tables.read().await;
        let selected = match tables.get(&table_name) {
            Some(table) => compiled.select(table.rows.values().map(|row| &row.value)),
            None => Vec::new(),
        };
        let values = selected
            .into_iter()
            .map(|entity| match &operand {
                Some(operand) => operand.evaluate(entity),
                None => Value::Bool(true),
            })
            .collect();
        Ok(aggregator.reduce(values))
    }

    async fn drop_all(&self) -> Result<()> {
        let mut tables = self.tables.write().await;
        for (table_name, table) in tables.iter_mut() {
            let rows = std::mem::take(&mut table.rows);
            for (key, row) in rows {
                let version = row.version + 1;
                table.tombstones.insert(key, version);
                self.emit_event(StoreEvent::EntityDeleted {
                    table: table_name.clone(),
                    old_value: row.value,
                    version,
                });
            }
        }
        drop(tables);

        if let Some(schema) = &self.schema {
            schema.clear().await?;
        }
        debug!("Dropped all tables");
        Ok(())
    }

    fn supports_change_feed(&self) -> bool {
        self.change_feed
    }
}

#[cfg(test)]
#[path = "memory_store_test.rs"]
mod memory_store_test;
