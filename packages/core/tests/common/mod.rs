//! Shared fixtures for integration tests
//!
//! `Customer` is referenced by `Order` and embeds an `Address`. `Customer.name`
//! is mandatory, so any projection reaching a customer carries it.

#![allow(dead_code)]

use entityflow_core::db::MemoryQueryProvider;
use entityflow_core::expressions::{Numeric, Object, Text, TypedProperty};
use entityflow_core::models::{Entity, MetaClass, PropertyMeta, ValueType};
use entityflow_core::schema::{CacheSchemaProvider, MemorySchemaProvider};
use entityflow_core::{Repository, RepositoryConfig};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Order {
    pub key: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub customer: Option<Customer>,
}

impl Entity for Address {
    const NAME: &'static str = "Address";
    type Key = ();

    fn meta_class() -> &'static MetaClass {
        static META: OnceLock<MetaClass> = OnceLock::new();
        META.get_or_init(|| {
            MetaClass::builder(Self::NAME)
                .property(PropertyMeta::new("street", ValueType::String))
                .property(PropertyMeta::new("city", ValueType::String))
                .build()
        })
    }
}

impl Entity for Customer {
    const NAME: &'static str = "Customer";
    type Key = i64;

    fn meta_class() -> &'static MetaClass {
        static META: OnceLock<MetaClass> = OnceLock::new();
        META.get_or_init(|| {
            MetaClass::builder(Self::NAME)
                .property(PropertyMeta::builder("id", ValueType::Integer).key().build())
                .property(PropertyMeta::builder("name", ValueType::String).mandatory().build())
                .property(PropertyMeta::builder("email", ValueType::String).indexable(true).build())
                .property(PropertyMeta::new("address", ValueType::entity::<Address>()))
                .build()
        })
    }
}

impl Entity for Order {
    const NAME: &'static str = "Order";
    type Key = String;

    fn meta_class() -> &'static MetaClass {
        static META: OnceLock<MetaClass> = OnceLock::new();
        META.get_or_init(|| {
            MetaClass::builder(Self::NAME)
                .property(PropertyMeta::builder("key", ValueType::String).key().build())
                .property(PropertyMeta::builder("status", ValueType::String).searchable().build())
                .property(PropertyMeta::new("total", ValueType::Float))
                .property(PropertyMeta::new("customer", ValueType::entity::<Customer>()))
                .build()
        })
    }
}

impl Customer {
    pub fn id() -> TypedProperty<Customer, i64, Numeric> {
        TypedProperty::named("id").expect("Customer.id")
    }

    pub fn name() -> TypedProperty<Customer, String, Text> {
        TypedProperty::named("name").expect("Customer.name")
    }

    pub fn email() -> TypedProperty<Customer, String, Text> {
        TypedProperty::named("email").expect("Customer.email")
    }

    pub fn address() -> TypedProperty<Customer, Address, Object> {
        TypedProperty::named("address").expect("Customer.address")
    }
}

impl Address {
    pub fn city() -> TypedProperty<Address, String, Text> {
        TypedProperty::named("city").expect("Address.city")
    }
}

impl Order {
    pub fn key() -> TypedProperty<Order, String, Text> {
        TypedProperty::named("key").expect("Order.key")
    }

    pub fn status() -> TypedProperty<Order, String, Text> {
        TypedProperty::named("status").expect("Order.status")
    }

    pub fn total() -> TypedProperty<Order, f64, Numeric> {
        TypedProperty::named("total").expect("Order.total")
    }

    pub fn customer() -> TypedProperty<Order, Customer, Object> {
        TypedProperty::named("customer").expect("Order.customer")
    }
}

pub fn customer(id: i64, name: &str) -> Customer {
    Customer {
        id,
        name: Some(name.to_string()),
        ..Default::default()
    }
}

pub fn order(key: &str, status: &str, total: f64, customer: Option<Customer>) -> Order {
    Order {
        key: key.to_string(),
        status: Some(status.to_string()),
        total: Some(total),
        customer,
    }
}

/// Install a test-friendly tracing subscriber (honours `RUST_LOG`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Store backed by a cached in-memory schema, plus the schema for inspection
pub fn store_with_schema() -> (MemoryQueryProvider, Arc<MemorySchemaProvider>) {
    let schema = Arc::new(MemorySchemaProvider::new("shop"));
    let store = MemoryQueryProvider::new().with_schema(CacheSchemaProvider::decorate(schema.clone()));
    (store, schema)
}

pub fn repository(store: &MemoryQueryProvider) -> Repository {
    repository_with(store, RepositoryConfig::default())
}

pub fn repository_with(store: &MemoryQueryProvider, config: RepositoryConfig) -> Repository {
    Repository::builder(Arc::new(store.clone()))
        .config(config)
        .build()
        .expect("repository")
}
