use super::*;
use crate::db::MemoryQueryProvider;
use crate::error::RepositoryError;
use crate::expressions::{Capability, Expr, Expression, ExpressionType, PropertyExpression};
use crate::models::Entity;
use crate::testing::{Product, Vendor};
use serde_json::json;
use std::sync::Mutex;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn product() -> Expr<Product, Product> {
    Expr::arg()
}

fn expensive() -> QueryInfo {
    QueryInfo::builder(Product::meta_class())
        .predicate(product().property(&Product::price()).greater_than(5).into_expression())
        .build()
}

async fn next(stream: &mut NotificationStream) -> Notification {
    timeout(WAIT, stream.next())
        .await
        .expect("notification in time")
        .expect("stream open")
        .expect("notification")
}

fn live(store: &MemoryQueryProvider) -> LiveQueryProvider {
    LiveQueryProvider::new(Arc::new(store.clone()))
}

/// Provider replaying a fixed snapshot and a fixed change feed
struct ScriptedProvider {
    snapshot: Vec<Value>,
    feed: Vec<Notification>,
}

#[async_trait]
impl QueryProvider for ScriptedProvider {
    async fn insert(&self, _meta: &'static MetaClass, _entity: Value) -> Result<Value> {
        Err(RepositoryError::backend_unavailable("read-only"))
    }

    async fn update(
        &self,
        _meta: &'static MetaClass,
        _entity: Value,
        _expected_version: Option<u64>,
    ) -> Result<Value> {
        Err(RepositoryError::backend_unavailable("read-only"))
    }

    async fn upsert(&self, _meta: &'static MetaClass, _entity: Value) -> Result<Value> {
        Err(RepositoryError::backend_unavailable("read-only"))
    }

    async fn delete(&self, _meta: &'static MetaClass, _key: Value) -> Result<bool> {
        Err(RepositoryError::backend_unavailable("read-only"))
    }

    async fn query(&self, _query: QueryInfo) -> Result<EntityStream> {
        Ok(stream::iter(self.snapshot.clone().into_iter().map(Ok)).boxed())
    }

    async fn live_query(&self, _query: QueryInfo) -> Result<NotificationStream> {
        Ok(stream::iter(self.feed.clone().into_iter().map(Ok)).boxed())
    }

    async fn aggregate(&self, _query: QueryInfo, _aggregator: Aggregator) -> Result<Value> {
        Err(RepositoryError::backend_unavailable("read-only"))
    }

    async fn drop_all(&self) -> Result<()> {
        Ok(())
    }
}

/// Store that commits queued updates after the feed subscription, just
/// before the snapshot is read
struct RacingProvider {
    inner: MemoryQueryProvider,
    pending: Mutex<Vec<Value>>,
}

#[async_trait]
impl QueryProvider for RacingProvider {
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

    async fn query(&self, query: QueryInfo) -> Result<EntityStream> {
        self.inner.query(query).await
    }

    async fn snapshot(&self, query: QueryInfo) -> Result<Snapshot> {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for entity in pending {
            self.inner.update(query.meta_class(), entity, None).await?;
        }
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
}

#[tokio::test]
async fn test_initial_snapshot_precedes_changes() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    for (key, price) in [("p-1", 10), ("p-2", 7), ("p-3", 9), ("p-4", 1)] {
        store.insert(meta, json!({"key": key, "price": price})).await.unwrap();
    }

    let mut notifications = live(&store).live_query(expensive()).await.unwrap();
    store.insert(meta, json!({"key": "p-5", "price": 20})).await.unwrap();

    let mut initial = Vec::new();
    for _ in 0..3 {
        let n = next(&mut notifications).await;
        assert_eq!(n.kind, NotificationType::Create);
        initial.push(n.new_value.unwrap()["key"].clone());
    }
    initial.sort_by_key(|k| k.to_string());
    assert_eq!(initial, vec![json!("p-1"), json!("p-2"), json!("p-3")]);

    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Create);
    assert_eq!(n.new_value.unwrap()["key"], "p-5");
    assert_eq!(n.version, Some(1));
}

#[tokio::test]
async fn test_entity_that_stops_matching_is_deleted() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    store.insert(meta, json!({"key": "p-1", "price": 10})).await.unwrap();

    let mut notifications = live(&store).live_query(expensive()).await.unwrap();
    assert_eq!(next(&mut notifications).await.kind, NotificationType::Create);

    store
        .update(meta, json!({"key": "p-1", "price": 3}), None)
        .await
        .unwrap();
    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Delete);
    assert_eq!(n.old_value, Some(json!({"key": "p-1", "price": 10})));
    assert_eq!(n.new_value, None);
    assert_eq!(n.version, Some(2));
}

#[tokio::test]
async fn test_entering_and_staying_in_the_result_set() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    store.insert(meta, json!({"key": "p-1", "price": 1})).await.unwrap();

    let mut notifications = live(&store).live_query(expensive()).await.unwrap();

    // Unrelated changes produce nothing
    store.update(meta, json!({"key": "p-1", "price": 2}), None).await.unwrap();
    store.update(meta, json!({"key": "p-1", "price": 8}), None).await.unwrap();
    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Create);
    assert_eq!(n.new_value, Some(json!({"key": "p-1", "price": 8})));

    store.update(meta, json!({"key": "p-1", "price": 9}), None).await.unwrap();
    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Update);
    assert_eq!(n.old_value, Some(json!({"key": "p-1", "price": 8})));
    assert_eq!(n.new_value, Some(json!({"key": "p-1", "price": 9})));

    store.delete(meta, json!("p-1")).await.unwrap();
    assert_eq!(next(&mut notifications).await.kind, NotificationType::Delete);
}

#[tokio::test]
async fn test_duplicate_deliveries_are_suppressed() {
    let v2 = Notification::update(
        json!({"key": "p-1", "price": 10}),
        json!({"key": "p-1", "price": 11}),
    )
    .with_version(Some(2));
    let scripted = ScriptedProvider {
        snapshot: vec![json!({"key": "p-1", "price": 10})],
        feed: vec![
            // Already reflected by the snapshot
            Notification::create(json!({"key": "p-1", "price": 10})),
            v2.clone(),
            v2,
            Notification::update(
                json!({"key": "p-1", "price": 10}),
                json!({"key": "p-1", "price": 12}),
            )
            .with_version(Some(1)),
        ],
    };
    let provider = LiveQueryProvider::new(Arc::new(scripted));

    let notifications: Vec<Notification> = provider
        .live_query(expensive())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    let kinds: Vec<_> = notifications.iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NotificationType::Create, NotificationType::Update]);
    assert_eq!(notifications[1].new_value, Some(json!({"key": "p-1", "price": 11})));
}

#[tokio::test]
async fn test_projection_is_applied_to_emitted_values() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    store
        .insert(meta, json!({"key": "p-1", "name": "Widget", "price": 10}))
        .await
        .unwrap();

    let query = expensive()
        .to_builder()
        .property(PropertyExpression::of(meta, "price").unwrap())
        .build();
    let mut notifications = live(&store).live_query(query).await.unwrap();

    let n = next(&mut notifications).await;
    assert_eq!(n.new_value, Some(json!({"key": "p-1", "price": 10})));
}

#[tokio::test]
async fn test_polling_mode_diffs_snapshots() {
    let store = MemoryQueryProvider::new().without_change_feed();
    let meta = Product::meta_class();
    store.insert(meta, json!({"key": "p-1", "price": 10})).await.unwrap();

    let provider =
        LiveQueryProvider::with_poll_interval(Arc::new(store.clone()), Duration::from_millis(20));
    let mut notifications = provider.live_query(expensive()).await.unwrap();
    assert_eq!(next(&mut notifications).await.kind, NotificationType::Create);

    store.insert(meta, json!({"key": "p-2", "price": 30})).await.unwrap();
    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Create);
    assert_eq!(n.new_value.unwrap()["key"], "p-2");

    store.update(meta, json!({"key": "p-1", "price": 1}), None).await.unwrap();
    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Delete);
    assert_eq!(n.old_value.unwrap()["key"], "p-1");
}

#[tokio::test]
async fn test_dropping_the_stream_closes_the_change_feed() {
    let store = MemoryQueryProvider::new();
    let notifications = live(&store).live_query(expensive()).await.unwrap();
    assert_eq!(store.subscriber_count(), 1);

    drop(notifications);
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn test_invalid_predicate_fails_before_subscribing() {
    let store = MemoryQueryProvider::new();
    let price = product().property(&Product::price()).into_expression();
    let total = Expression::unary(ExpressionType::Sum, Capability::Numeric, price);
    let query = QueryInfo::builder(Product::meta_class())
        .predicate(Expression::binary(
            ExpressionType::GreaterThan,
            Capability::Boolean,
            total,
            Expression::constant(json!(5)),
        ))
        .build();

    let err = live(&store).live_query(query).await.err().unwrap();
    assert!(err
        .to_string()
        .contains("Sum (only valid inside an aggregation)"));
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn test_writes_racing_the_snapshot_are_not_replayed() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    store.insert(meta, json!({"key": "p-1", "price": 10})).await.unwrap();

    let racing = RacingProvider {
        inner: store.clone(),
        pending: Mutex::new(vec![
            json!({"key": "p-1", "price": 20}),
            json!({"key": "p-1", "price": 30}),
        ]),
    };
    let provider = LiveQueryProvider::new(Arc::new(racing));
    let mut notifications = provider.live_query(expensive()).await.unwrap();

    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Create);
    assert_eq!(n.new_value, Some(json!({"key": "p-1", "price": 30})));

    // The replayed v2 and v3 events are skipped; the next one is v4
    store
        .update(meta, json!({"key": "p-1", "price": 40}), None)
        .await
        .unwrap();
    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Update);
    assert_eq!(n.old_value, Some(json!({"key": "p-1", "price": 30})));
    assert_eq!(n.new_value, Some(json!({"key": "p-1", "price": 40})));
    assert_eq!(n.version, Some(4));
}

#[tokio::test]
async fn test_lagged_feed_resynchronises_the_matched_set() {
    let store = MemoryQueryProvider::new().with_change_feed_capacity(1);
    let meta = Product::meta_class();
    store.insert(meta, json!({"key": "p-1", "price": 10})).await.unwrap();

    let mut notifications = live(&store).live_query(expensive()).await.unwrap();
    assert_eq!(next(&mut notifications).await.kind, NotificationType::Create);

    // Three commits overflow a one-slot feed
    store.update(meta, json!({"key": "p-1", "price": 3}), None).await.unwrap();
    store.insert(meta, json!({"key": "p-2", "price": 1})).await.unwrap();
    store.insert(meta, json!({"key": "p-3", "price": 20})).await.unwrap();

    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Delete);
    assert_eq!(n.old_value, Some(json!({"key": "p-1", "price": 10})));

    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Create);
    assert_eq!(n.new_value, Some(json!({"key": "p-3", "price": 20})));

    store.update(meta, json!({"key": "p-3", "price": 25}), None).await.unwrap();
    let n = next(&mut notifications).await;
    assert_eq!(n.kind, NotificationType::Update);
    assert_eq!(n.old_value, Some(json!({"key": "p-3", "price": 20})));
    assert_eq!(n.new_value, Some(json!({"key": "p-3", "price": 25})));
}

#[tokio::test]
async fn test_foreign_projection_is_rejected_before_subscribing() {
    let store = MemoryQueryProvider::new();
    let query = expensive()
        .to_builder()
        .property(PropertyExpression::of(Vendor::meta_class(), "name").unwrap())
        .build();

    let err = live(&store).live_query(query).await.err().unwrap();
    assert!(matches!(err, RepositoryError::InvalidQuery(_)));
    assert_eq!(store.subscriber_count(), 0);
}
