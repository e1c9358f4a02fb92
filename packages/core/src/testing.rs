//! Entity fixtures shared by unit tests

use crate::expressions::{Collection, Numeric, Object, Text, TypedProperty};
use crate::models::{Entity, MetaClass, PropertyMeta, ValueType};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vendor {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Product {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub vendor: Option<Vendor>,
}

impl Entity for Vendor {
    const NAME: &'static str = "Vendor";
    type Key = i64;

    fn meta_class() -> &'static MetaClass {
        static META: OnceLock<MetaClass> = OnceLock::new();
        META.get_or_init(|| {
            MetaClass::builder(Self::NAME)
                .property(PropertyMeta::builder("id", ValueType::Integer).key().build())
                .property(PropertyMeta::builder("name", ValueType::String).mandatory().build())
                .build()
        })
    }
}

impl Entity for Product {
    const NAME: &'static str = "Product";
    type Key = String;

    fn meta_class() -> &'static MetaClass {
        static META: OnceLock<MetaClass> = OnceLock::new();
        META.get_or_init(|| {
            MetaClass::builder(Self::NAME)
                .property(PropertyMeta::builder("key", ValueType::String).key().build())
                .property(
                    PropertyMeta::builder("name", ValueType::String)
                        .searchable()
                        .indexable(false)
                        .build(),
                )
                .property(PropertyMeta::builder("price", ValueType::Integer).indexable(false).build())
                .property(PropertyMeta::new("tags", ValueType::list(ValueType::String)))
                .property(PropertyMeta::new("vendor", ValueType::entity::<Vendor>()))
                .build()
        })
    }
}

impl Vendor {
    pub fn id() -> TypedProperty<Vendor, i64, Numeric> {
        TypedProperty::named("id").expect("Vendor.id")
    }

    pub fn name() -> TypedProperty<Vendor, String, Text> {
        TypedProperty::named("name").expect("Vendor.name")
    }
}

impl Product {
    pub fn key() -> TypedProperty<Product, String, Text> {
        TypedProperty::named("key").expect("Product.key")
    }

    pub fn name() -> TypedProperty<Product, String, Text> {
        TypedProperty::named("name").expect("Product.name")
    }

    pub fn price() -> TypedProperty<Product, i64, Numeric> {
        TypedProperty::named("price").expect("Product.price")
    }

    pub fn tags() -> TypedProperty<Product, Vec<String>, Collection> {
        TypedProperty::named("tags").expect("Product.tags")
    }

    pub fn vendor() -> TypedProperty<Product, Vendor, Object> {
        TypedProperty::named("vendor").expect("Product.vendor")
    }
}
