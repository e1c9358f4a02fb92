//! Live Query Decorator
//!
//! Turns a backend's raw change feed into the notification stream of one
//! query:
//!
//! 1. Subscribe to the inner change feed
//! 2. Read a snapshot and emit one `Create` per matching entity
//! 3. Classify every change against the predicate and the set of entities
//!    currently matched
//!
//! | before      | after         | emitted                  |
//! |-------------|---------------|--------------------------|
//! | not matched | matches       | `Create`                 |
//! | matched     | still matches | `Update`                 |
//! | matched     | stops / gone  | `Delete` with old value  |
//! | not matched | does not      | nothing                  |
//!
//! Changes whose version is not newer than the last one seen for the key,
//! and changes that leave the tracked value as it is, are dropped. The
//! snapshot seeds the per-key versions, so feed events committed between
//! subscribing and reading the snapshot are not replayed. When the feed
//! reports that it lagged, a fresh snapshot is diffed against the tracked set
//! and the subscription carries on. Backends without a change feed are
//! polled: snapshots taken on a fixed interval are diffed against the
//! tracked set.
//!
//! Values are tracked as full entities; mapping and projection (expanded with
//! mandatory properties) are applied to emitted values only. `skip` and
//! `limit` do not apply to live queries.

use crate::decorators::expand_properties;
use crate::error::{RepositoryError, Result};
use crate::models::{MetaClass, Notification, NotificationType};
use crate::query::{
    Aggregator, CompiledQuery, Decorator, EntityStream, NotificationStream, QueryInfo,
    QueryProvider, Snapshot,
};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

/// Default interval between snapshots in polling mode
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Matched set of one live query
struct Tracker {
    meta: &'static MetaClass,
    query: CompiledQuery,
    matched: HashMap<String, Value>,
    versions: HashMap<String, u64>,
}

impl Tracker {
    fn new(meta: &'static MetaClass, query: CompiledQuery) -> Self {
        debug!("Live query on {} started", meta.name());
        Self {
            meta,
            query,
            matched: HashMap::new(),
            versions: HashMap::new(),
        }
    }

    fn key_of(&self, entity: &Value) -> Option<String> {
        let key = self.meta.canonical_key_of(entity);
        if key.is_none() {
            warn!("Ignoring {} document without key", self.meta.name());
        }
        key
    }

    fn shaped(&self, notification: Notification) -> Notification {
        notification.map(|value| self.query.shape(&value))
    }

    /// Initial snapshot: every entity becomes a `Create`
    fn snapshot(&mut self, snapshot: Snapshot) -> Vec<Notification> {
        self.versions = snapshot.versions;
        let mut created = Vec::new();
        for entity in snapshot.entities {
            if !self.query.matches(&entity) {
                continue;
            }
            if let Some(key) = self.key_of(&entity) {
                self.matched.insert(key, entity.clone());
                created.push(self.shaped(Notification::create(entity)));
            }
        }
        created
    }

    /// Classify one raw change
    fn apply(&mut self, change: Notification) -> Option<Notification> {
        let key = self.key_of(change.current()?)?;

        if let Some(version) = change.version {
            match self.versions.get(&key) {
                Some(&seen) if seen >= version => {
                    trace!("Suppressed duplicate change of {} v{}", key, version);
                    return None;
                }
                _ => {
                    self.versions.insert(key.clone(), version);
                }
            }
        }

        let after = match change.kind {
            NotificationType::Delete => None,
            NotificationType::Create | NotificationType::Update => change
                .new_value
                .filter(|value| self.query.matches(value)),
        };
        let result = self.transition(key, after)?;
        Some(self.shaped(result.with_version(change.version)))
    }

    /// Move `key` to its new state, `None` meaning "not matched"
    fn transition(&mut self, key: String, after: Option<Value>) -> Option<Notification> {
        match (self.matched.remove(&key), after) {
            (Some(before), Some(after)) if before == after => {
                trace!("Suppressed unchanged value of {}", key);
                self.matched.insert(key, before);
                None
            }
            (Some(before), Some(after)) => {
                self.matched.insert(key, after.clone());
                Some(Notification::update(before, after))
            }
            (None, Some(after)) => {
                self.matched.insert(key, after.clone());
                Some(Notification::create(after))
            }
            (Some(before), None) => Some(Notification::delete(before)),
            (None, None) => None,
        }
    }

    /// Catch up after missed feed events
    fn resync(&mut self, snapshot: Snapshot) -> Vec<Notification> {
        for (key, version) in snapshot.versions {
            let seen = self.versions.entry(key).or_insert(version);
            *seen = (*seen).max(version);
        }
        self.diff(snapshot.entities)
    }

    /// Polling: diff a fresh snapshot against the matched set
    fn diff(&mut self, entities: Vec<Value>) -> Vec<Notification> {
        let mut current = HashMap::new();
        let mut order = Vec::new();
        for entity in entities {
            if !self.query.matches(&entity) {
                continue;
            }
            if let Some(key) = self.key_of(&entity) {
                order.push(key.clone());
                current.insert(key, entity);
            }
        }

        let mut gone: Vec<String> = self
            .matched
            .keys()
            .filter(|key| !current.contains_key(*key))
            .cloned()
            .collect();
        gone.sort();

        let mut changes = Vec::new();
        for key in gone {
            changes.extend(self.transition(key, None));
        }
        for key in order {
            let entity = current.remove(&key);
            changes.extend(self.transition(key, entity));
        }
        changes
            .into_iter()
            .map(|change| self.shaped(change))
            .collect()
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        debug!("Live query on {} closed", self.meta.name());
    }
}

/// Change-feed subscription of one live query
struct ChangeFeed {
    inner: Arc<dyn QueryProvider>,
    raw: QueryInfo,
    tracker: Tracker,
    feed: NotificationStream,
}

impl ChangeFeed {
    /// Notifications for the next relevant change, `None` once the feed ends
    async fn next_batch(&mut self) -> Option<Vec<Result<Notification>>> {
        loop {
            match self.feed.next().await? {
                Ok(change) => {
                    if let Some(notification) = self.tracker.apply(change) {
                        return Some(vec![Ok(notification)]);
                    }
                }
                Err(e) if matches!(e.root_cause(), RepositoryError::FeedLagged { .. }) => {
                    warn!("{}, resynchronising live query", e);
                    let snapshot = match self.inner.snapshot(self.raw.clone()).await {
                        Ok(snapshot) => snapshot,
                        Err(e) => return Some(vec![Err(e)]),
                    };
                    let changes = self.tracker.resync(snapshot);
                    if !changes.is_empty() {
                        return Some(changes.into_iter().map(Ok).collect());
                    }
                }
                Err(e) => return Some(vec![Err(e)]),
            }
        }
    }
}

/// Query provider decorator implementing per-query live notifications
pub struct LiveQueryProvider {
    inner: Arc<dyn QueryProvider>,
    poll_interval: Duration,
}

impl LiveQueryProvider {
    pub fn new(inner: Arc<dyn QueryProvider>) -> Self {
        Self::with_poll_interval(inner, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(inner: Arc<dyn QueryProvider>, poll_interval: Duration) -> Self {
        Self {
            inner,
            poll_interval,
        }
    }

    pub fn decorator(poll_interval: Duration) -> impl Decorator {
        move |inner: Arc<dyn QueryProvider>| -> Arc<dyn QueryProvider> {
            Arc::new(Self::with_poll_interval(inner, poll_interval))
        }
    }

    /// Query for full matching entities, without paging, mapping or projection
    fn raw_query(query: &QueryInfo) -> QueryInfo {
        query
            .to_builder()
            .clear_paging()
            .clear_mapping()
            .clear_properties()
            .build()
    }

    /// Compiled form used to match and shape emitted values
    fn shaping_query(query: &QueryInfo) -> Result<CompiledQuery> {
        let expanded = if query.properties().is_empty() {
            Vec::new()
        } else {
            expand_properties(query.properties(), query.result_meta_class())
        };
        let shaping = query
            .to_builder()
            .clear_paging()
            .clear_properties()
            .properties_add_all(expanded)
            .build();
        CompiledQuery::new(&shaping)
    }

    async fn change_feed(&self, query: QueryInfo) -> Result<NotificationStream> {
        let raw = Self::raw_query(&query);
        let mut tracker = Tracker::new(query.meta_class(), Self::shaping_query(&query)?);

        let feed = self.inner.live_query(raw.clone()).await?;
        let initial = tracker.snapshot(self.inner.snapshot(raw.clone()).await?);

        let state = ChangeFeed {
            inner: self.inner.clone(),
            raw,
            tracker,
            feed,
        };
        let changes = stream::unfold(state, |mut state| async move {
            let batch = state.next_batch().await?;
            Some((batch, state))
        })
        .flat_map(stream::iter);
        Ok(stream::iter(initial.into_iter().map(Ok))
            .chain(changes)
            .boxed())
    }

    fn polling(&self, query: QueryInfo) -> Result<NotificationStream> {
        let tracker = Tracker::new(query.meta_class(), Self::shaping_query(&query)?);
        let raw = Self::raw_query(&query);
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let state = Some((self.inner.clone(), tracker, interval));
        let polls = stream::unfold(state, move |state| {
            let raw = raw.clone();
            async move {
                let (inner, mut tracker, mut interval) = state?;
                interval.tick().await;
                let snapshot = match inner.query(raw).await {
                    Ok(stream) => stream.try_collect::<Vec<Value>>().await,
                    Err(e) => Err(e),
                };
                match snapshot {
                    Ok(entities) => {
                        let changes: Vec<Result<Notification>> =
                            tracker.diff(entities).into_iter().map(Ok).collect();
                        Some((changes, Some((inner, tracker, interval))))
                    }
                    // The failure ends the subscription
                    Err(e) => Some((vec![Err(e)], None)),
                }
            }
        });
        Ok(polls.flat_map(stream::iter).boxed())
    }
}

#[async_trait]
impl QueryProvider for LiveQueryProvider {
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
        self.inner.query(query).await
    }

    async fn snapshot(&self, query: QueryInfo) -> Result<Snapshot> {
        self.inner.snapshot(query).await
    }

    async fn live_query(&self, query: QueryInfo) -> Result<NotificationStream> {
        query.validate()?;
        if self.inner.supports_change_feed() {
            self.change_feed(query).await
        } else {
            debug!(
                "No change feed for {}, polling every {:?}",
                query.meta_class().name(),
                self.poll_interval
            );
            self.polling(query)
        }
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

#[cfg(test)]
#[path = "live_query_test.rs"]
mod live_query_test;
