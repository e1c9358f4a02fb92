use super::*;
use crate::expressions::{Expr, PropertyExpression};
use crate::models::{Entity, NotificationType, PropertyMeta, ValueType};
use crate::schema::MemorySchemaProvider;
use crate::testing::{Product, Vendor};
use futures::TryStreamExt;
use serde_json::json;
use std::sync::OnceLock;

fn account() -> &'static MetaClass {
    static META: OnceLock<MetaClass> = OnceLock::new();
    META.get_or_init(|| {
        MetaClass::builder("Account")
            .property(PropertyMeta::builder("id", ValueType::Integer).key().build())
            .property(
                PropertyMeta::builder("email", ValueType::String)
                    .indexable(true)
                    .build(),
            )
            .build()
    })
}

fn product() -> Expr<Product, Product> {
    Expr::arg()
}

async fn seed(store: &MemoryQueryProvider) {
    let meta = Product::meta_class();
    for (key, price) in [("p-1", 10), ("p-2", 3), ("p-3", 7)] {
        store
            .insert(meta, json!({"key": key, "name": format!("Item {}", key), "price": price}))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_insert_and_find() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    store.insert(meta, json!({"key": "p-1", "price": 10})).await.unwrap();

    let found = store.find(meta, json!("p-1")).await.unwrap();
    assert_eq!(found, Some(json!({"key": "p-1", "price": 10})));
    assert_eq!(store.find(meta, json!("missing")).await.unwrap(), None);
}

#[tokio::test]
async fn test_duplicate_key_is_rejected() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    store.insert(meta, json!({"key": "p-1"})).await.unwrap();

    let err = store.insert(meta, json!({"key": "p-1"})).await.unwrap_err();
    assert!(matches!(err, RepositoryError::DuplicateKey { .. }));
}

#[tokio::test]
async fn test_document_without_key_is_rejected() {
    let store = MemoryQueryProvider::new();
    let err = store
        .insert(Product::meta_class(), json!({"name": "nameless"}))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::InvalidEntity(_)));
}

#[tokio::test]
async fn test_update_requires_existing_entity() {
    let store = MemoryQueryProvider::new();
    let err = store
        .update(Product::meta_class(), json!({"key": "p-9"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { .. }));
}

#[tokio::test]
async fn test_optimistic_version_check() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    store.insert(meta, json!({"key": "p-1", "price": 1})).await.unwrap();
    store
        .update(meta, json!({"key": "p-1", "price": 2}), Some(1))
        .await
        .unwrap();

    let err = store
        .update(meta, json!({"key": "p-1", "price": 3}), Some(1))
        .await
        .unwrap_err();
    match err {
        RepositoryError::ConcurrentModification {
            expected, actual, ..
        } => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    store.insert(meta, json!({"key": "p-1"})).await.unwrap();

    assert!(store.delete(meta, json!("p-1")).await.unwrap());
    assert!(!store.delete(meta, json!("p-1")).await.unwrap());
    assert!(!store.delete(Vendor::meta_class(), json!(1)).await.unwrap());
}

#[tokio::test]
async fn test_unique_index_is_enforced() {
    let store = MemoryQueryProvider::new();
    store
        .insert(account(), json!({"id": 1, "email": "a@example.com"}))
        .await
        .unwrap();

    let err = store
        .insert(account(), json!({"id": 2, "email": "a@example.com"}))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::UniqueConstraint { .. }));

    // Rewriting the same entity does not conflict with itself
    store
        .upsert(account(), json!({"id": 1, "email": "a@example.com"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_query_filters_sorts_and_paginates() {
    let store = MemoryQueryProvider::new();
    seed(&store).await;

    let query = QueryInfo::builder(Product::meta_class())
        .predicate(product().property(&Product::price()).greater_than(5).into_expression())
        .sort(product().property(&Product::price()).into_expression(), false)
        .limit(1)
        .build();
    let results: Vec<Value> = store.query(query).await.unwrap().try_collect().await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["key"], "p-1");
}

#[tokio::test]
async fn test_query_projection_leaves_other_fields_unset() {
    let store = MemoryQueryProvider::new();
    seed(&store).await;

    let query = QueryInfo::builder(Product::meta_class())
        .property(PropertyExpression::of(Product::meta_class(), "price").unwrap())
        .build();
    let results: Vec<Value> = store.query(query).await.unwrap().try_collect().await.unwrap();

    assert_eq!(results.len(), 3);
    for result in results {
        assert!(result.get("price").is_some());
        assert!(result.get("name").is_none());
    }
}

#[tokio::test]
async fn test_aggregation_is_evaluated_natively() {
    let store = MemoryQueryProvider::new();
    seed(&store).await;
    let meta = Product::meta_class();
    let price = product().property(&Product::price());

    let all = QueryInfo::builder(meta).build();
    assert_eq!(
        store.aggregate(all.clone(), Aggregator::sum(&price)).await.unwrap(),
        json!(20)
    );
    assert_eq!(
        store.aggregate(all.clone(), Aggregator::max(&price)).await.unwrap(),
        json!(10)
    );
    assert_eq!(store.aggregate(all, Aggregator::Count).await.unwrap(), json!(3));

    let cheap = QueryInfo::builder(meta)
        .predicate(price.less_than(5).into_expression())
        .build();
    assert_eq!(store.aggregate(cheap, Aggregator::Count).await.unwrap(), json!(1));
}

#[tokio::test]
async fn test_change_feed_carries_versions() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    let feed = store
        .live_query(QueryInfo::builder(meta).build())
        .await
        .unwrap();

    store.insert(meta, json!({"key": "p-1", "price": 1})).await.unwrap();
    store
        .update(meta, json!({"key": "p-1", "price": 2}), None)
        .await
        .unwrap();
    store
        .insert(Vendor::meta_class(), json!({"id": 1, "name": "Acme"}))
        .await
        .unwrap();
    store.delete(meta, json!("p-1")).await.unwrap();

    let notifications: Vec<_> = feed.take(3).try_collect().await.unwrap();
    let kinds: Vec<_> = notifications.iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        vec![
            NotificationType::Create,
            NotificationType::Update,
            NotificationType::Delete
        ]
    );
    let versions: Vec<_> = notifications.iter().map(|n| n.version).collect();
    assert_eq!(versions, vec![Some(1), Some(2), Some(3)]);
}

#[tokio::test]
async fn test_versions_survive_delete() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    let mut events = store.subscribe_to_events();

    store.insert(meta, json!({"key": "p-1"})).await.unwrap();
    store.delete(meta, json!("p-1")).await.unwrap();
    store.insert(meta, json!({"key": "p-1"})).await.unwrap();

    let versions = [
        events.recv().await.unwrap().version(),
        events.recv().await.unwrap().version(),
        events.recv().await.unwrap().version(),
    ];
    assert_eq!(versions, [1, 2, 3]);
}

#[tokio::test]
async fn test_polling_mode_has_no_change_feed() {
    let store = MemoryQueryProvider::new().without_change_feed();
    assert!(!store.supports_change_feed());

    let result = store
        .live_query(QueryInfo::builder(Product::meta_class()).build())
        .await;
    assert!(matches!(result, Err(RepositoryError::Configuration(_))));
}

#[tokio::test]
async fn test_drop_all_emits_deletes() {
    let store = MemoryQueryProvider::new();
    seed(&store).await;
    let mut events = store.subscribe_to_events();

    store.drop_all().await.unwrap();

    for _ in 0..3 {
        assert_eq!(events.recv().await.unwrap().event_type(), "entity:deleted");
    }
    let remaining: Vec<Value> = store
        .query(QueryInfo::builder(Product::meta_class()).build())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn test_schema_is_ensured_before_writes() {
    let schema = Arc::new(MemorySchemaProvider::new("test"));
    let store = MemoryQueryProvider::new().with_schema(schema.clone());

    store
        .insert(Vendor::meta_class(), json!({"id": 1, "name": "Acme"}))
        .await
        .unwrap();

    assert!(schema.has_table("Vendor").await);
    assert_eq!(schema.database_name(), "test");
}

#[tokio::test]
async fn test_schema_failure_is_reported_with_context() {
    let schema = Arc::new(MemorySchemaProvider::new("test"));
    schema.fail_next(1);
    let store = MemoryQueryProvider::new().with_schema(schema);

    let err = store
        .insert(Vendor::meta_class(), json!({"id": 1}))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("ensuring schema for Vendor"));
    assert!(matches!(err.root_cause(), RepositoryError::BackendUnavailable(_)));
}

#[tokio::test]
async fn test_snapshot_reports_versions_of_every_key() {
    let store = MemoryQueryProvider::new();
    let meta = Product::meta_class();
    seed(&store).await;
    store
        .update(meta, json!({"key": "p-1", "price": 12}), None)
        .await
        .unwrap();
    store.delete(meta, json!("p-2")).await.unwrap();

    let query = QueryInfo::builder(meta)
        .predicate(product().property(&Product::price()).greater_than(5).into_expression())
        .sort(product().property(&Product::price()).into_expression(), true)
        .build();
    let snapshot = store.snapshot(query).await.unwrap();

    let keys: Vec<_> = snapshot.entities.iter().map(|e| e["key"].clone()).collect();
    assert_eq!(keys, vec![json!("p-3"), json!("p-1")]);
    assert_eq!(snapshot.versions.get("p-1"), Some(&2));
    assert_eq!(snapshot.versions.get("p-2"), Some(&2));
    assert_eq!(snapshot.versions.get("p-3"), Some(&1));
}

#[tokio::test]
async fn test_lagging_subscriber_receives_error() {
    let store = MemoryQueryProvider::new().with_change_feed_capacity(1);
    let meta = Product::meta_class();
    let mut feed = store
        .live_query(QueryInfo::builder(meta).build())
        .await
        .unwrap();

    seed(&store).await;

    match feed.next().await {
        Some(Err(RepositoryError::FeedLagged { table, skipped })) => {
            assert_eq!(table, "Product");
            assert_eq!(skipped, 2);
        }
        other => panic!("expected a lag error, got {:?}", other.map(|r| r.map(|n| n.kind))),
    }
    let last = feed.next().await.unwrap().unwrap();
    assert_eq!(last.new_value.unwrap()["key"], "p-3");
}

#[tokio::test]
async fn test_foreign_projection_is_rejected() {
    let store = MemoryQueryProvider::new();
    seed(&store).await;
    let query = QueryInfo::builder(Product::meta_class())
        .property(PropertyExpression::of(Vendor::meta_class(), "name").unwrap())
        .build();

    assert!(matches!(
        store.query(query.clone()).await.err(),
        Some(RepositoryError::InvalidQuery(_))
    ));
    assert!(matches!(
        store.aggregate(query.clone(), Aggregator::Count).await,
        Err(RepositoryError::InvalidQuery(_))
    ));
    assert!(matches!(
        store.snapshot(query.clone()).await,
        Err(RepositoryError::InvalidQuery(_))
    ));
    assert!(matches!(
        store.live_query(query).await.err(),
        Some(RepositoryError::InvalidQuery(_))
    ));
}
