use super::*;
use crate::models::NotificationType;
use crate::testing::{Product, Vendor};
use std::time::Duration;
use tokio::time::timeout;

fn product() -> Expr<Product, Product> {
    Expr::arg()
}

fn repository(store: &MemoryQueryProvider) -> Repository {
    Repository::builder(Arc::new(store.clone())).build().unwrap()
}

fn widget(key: &str, name: &str, price: i64) -> Product {
    Product {
        key: key.to_string(),
        name: Some(name.to_string()),
        price: Some(price),
        ..Default::default()
    }
}

async fn seeded() -> (MemoryQueryProvider, Repository) {
    let store = MemoryQueryProvider::new();
    let repository = repository(&store);
    let products = repository.entities::<Product>();
    for (key, name, price) in [("p-1", "Anvil", 10), ("p-2", "Bolt", 2), ("p-3", "Crate", 7)] {
        products.insert(&widget(key, name, price)).await.unwrap();
    }
    (store, repository)
}

#[tokio::test]
async fn test_insert_persists_referenced_vendor_first() {
    let store = MemoryQueryProvider::new();
    let repository = repository(&store);

    let product = Product {
        vendor: Some(Vendor {
            id: 7,
            name: Some("Acme".to_string()),
        }),
        ..widget("p-1", "Anvil", 10)
    };
    let stored = repository.entities::<Product>().insert(&product).await.unwrap();
    assert_eq!(stored, product);

    let vendor = repository.entities::<Vendor>().find(&7).await.unwrap();
    assert_eq!(vendor.unwrap().name.as_deref(), Some("Acme"));
}

#[tokio::test]
async fn test_find_update_delete() {
    let (_store, repository) = seeded().await;
    let products = repository.entities::<Product>();

    let found = products.find(&"p-2".to_string()).await.unwrap().unwrap();
    assert_eq!(found.price, Some(2));

    products.update(&widget("p-2", "Bolt", 3), Some(1)).await.unwrap();
    let err = products
        .update(&widget("p-2", "Bolt", 4), Some(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err.root_cause(),
        RepositoryError::ConcurrentModification { expected: 1, actual: 2, .. }
    ));

    assert!(products.delete(&"p-2".to_string()).await.unwrap());
    assert!(!products.delete(&"p-2".to_string()).await.unwrap());
    assert!(products.find(&"p-2".to_string()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_filter_order_and_page() {
    let (_store, repository) = seeded().await;

    let keys: Vec<String> = repository
        .entities::<Product>()
        .filter(&product().property(&Product::price()).greater_than(1))
        .order_by_descending(&product().property(&Product::price()))
        .skip(1)
        .limit(5)
        .to_list()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.key)
        .collect();

    assert_eq!(keys, vec!["p-3", "p-2"]);
}

#[tokio::test]
async fn test_select_maps_after_sorting() {
    let (_store, repository) = seeded().await;

    let names: Vec<String> = repository
        .entities::<Product>()
        .query()
        .order_by(&product().property(&Product::price()))
        .select(&product().property(&Product::name()).to_upper())
        .to_list()
        .await
        .unwrap();

    assert_eq!(names, vec!["BOLT", "CRATE", "ANVIL"]);
}

#[tokio::test]
async fn test_include_leaves_other_fields_unset() {
    let (_store, repository) = seeded().await;

    let first = repository
        .entities::<Product>()
        .query()
        .include(&product().property(&Product::price()))
        .unwrap()
        .order_by(&product().property(&Product::price()))
        .first()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.key, "p-2");
    assert_eq!(first.price, Some(2));
    assert_eq!(first.name, None);
}

#[tokio::test]
async fn test_count_and_aggregate() {
    let (_store, repository) = seeded().await;
    let products = repository.entities::<Product>();
    let price = product().property(&Product::price());

    assert_eq!(products.query().count().await.unwrap(), 3);
    assert_eq!(
        products.filter(&price.greater_than(5)).count().await.unwrap(),
        2
    );

    let total: i64 = products
        .query()
        .aggregate(Aggregator::sum(&price))
        .await
        .unwrap();
    assert_eq!(total, 19);

    let cheapest: Option<i64> = products
        .query()
        .aggregate(Aggregator::min(&price))
        .await
        .unwrap();
    assert_eq!(cheapest, Some(2));
}

#[tokio::test]
async fn test_live_query_reports_entity_leaving_the_result_set() {
    let (_store, repository) = seeded().await;
    let products = repository.entities::<Product>();

    let mut notifications = products
        .filter(&product().property(&Product::price()).greater_than(8))
        .live()
        .await
        .unwrap();

    let initial = timeout(Duration::from_secs(2), notifications.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(initial.kind, NotificationType::Create);
    assert_eq!(initial.new_value.unwrap().key, "p-1");

    products.update(&widget("p-1", "Anvil", 1), None).await.unwrap();

    let left = timeout(Duration::from_secs(2), notifications.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(left.kind, NotificationType::Delete);
    assert_eq!(left.old_value.unwrap().price, Some(10));
    assert!(left.new_value.is_none());
}

#[tokio::test]
async fn test_disabled_decorators_are_skipped() {
    let store = MemoryQueryProvider::new();
    let config = RepositoryConfig {
        live_queries: false,
        ..Default::default()
    };
    let repository = Repository::builder(Arc::new(store.clone()))
        .config(config)
        .build()
        .unwrap();

    // Without the live query layer the raw change feed passes through unfiltered
    let mut feed = repository
        .entities::<Product>()
        .filter(&product().property(&Product::price()).greater_than(100))
        .live()
        .await
        .unwrap();
    repository
        .entities::<Product>()
        .insert(&widget("p-1", "Anvil", 1))
        .await
        .unwrap();

    let raw = timeout(Duration::from_secs(2), feed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(raw.new_value.unwrap().key, "p-1");
}

#[test]
fn test_scheduling_requires_runtime() {
    let err = Repository::builder(Arc::new(MemoryQueryProvider::new()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, RepositoryError::Configuration(_)));

    let config = RepositoryConfig {
        scheduling: false,
        ..Default::default()
    };
    assert!(Repository::builder(Arc::new(MemoryQueryProvider::new()))
        .config(config)
        .build()
        .is_ok());
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = RepositoryConfig {
        stream_buffer: 0,
        ..Default::default()
    };
    let err = Repository::builder(Arc::new(MemoryQueryProvider::new()))
        .config(config)
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("stream_buffer"));
}

#[tokio::test]
async fn test_custom_decorator_sits_above_raw_provider() {
    let store = MemoryQueryProvider::new();
    let wrapped = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = wrapped.clone();
    let repository = Repository::builder(Arc::new(store))
        .decorator(move |inner: Arc<dyn QueryProvider>| -> Arc<dyn QueryProvider> {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            inner
        })
        .build()
        .unwrap();

    assert_eq!(wrapped.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(repository.entities::<Product>().query().count().await.unwrap(), 0);
    assert_eq!(repository.config().max_concurrent_requests, 100);
}

#[tokio::test]
async fn test_in_memory_repository() {
    let repository = Repository::in_memory(RepositoryConfig {
        change_feed_capacity: 8,
        ..Default::default()
    })
    .unwrap();
    let products = repository.entities::<Product>();
    products.insert(&widget("p-1", "Anvil", 10)).await.unwrap();

    assert_eq!(products.query().count().await.unwrap(), 1);
    assert!(repository.provider().supports_change_feed());
}
