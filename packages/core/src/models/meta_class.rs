//! Entity Metadata
//!
//! The abstract capability the repository layer needs from an entity type:
//! enumerate its properties (name, declared type, annotations), find its key
//! and read/write property values on a document.
//!
//! Metadata is built by hand (or by generated code) once per entity type and
//! shared by every expression referencing it. Types that reference each other
//! are declared through [`EntityType`], a lazy token resolved only when the
//! referenced metaclass is actually needed.
//!
//! # Example
//!
//! ```rust
//! use entityflow_core::models::{Entity, MetaClass, PropertyMeta, ValueType};
//! use serde::{Deserialize, Serialize};
//! use std::sync::OnceLock;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Vendor {
//!     id: i64,
//!     #[serde(default)]
//!     name: Option<String>,
//! }
//!
//! impl Entity for Vendor {
//!     const NAME: &'static str = "Vendor";
//!     type Key = i64;
//!
//!     fn meta_class() -> &'static MetaClass {
//!         static META: OnceLock<MetaClass> = OnceLock::new();
//!         META.get_or_init(|| {
//!             MetaClass::builder(Self::NAME)
//!                 .property(PropertyMeta::builder("id", ValueType::Integer).key().build())
//!                 .property(PropertyMeta::new("name", ValueType::String))
//!                 .build()
//!         })
//!     }
//! }
//!
//! assert_eq!(Vendor::meta_class().key_property().unwrap().name(), "id");
//! ```

use crate::models::values::canonical_key;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A type the repository can store
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity type name (also the default table name)
    const NAME: &'static str;

    /// Key type; must serialize to the value stored in the key property
    type Key: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    fn meta_class() -> &'static MetaClass;
}

#[derive(Clone, Copy)]
enum Resolver {
    Lazy(fn() -> &'static MetaClass),
    Ready(&'static MetaClass),
}

/// Lazy type token for an entity type
#[derive(Clone, Copy)]
pub struct EntityType {
    name: &'static str,
    resolver: Resolver,
}

impl EntityType {
    pub fn of<T: Entity>() -> Self {
        Self {
            name: T::NAME,
            resolver: Resolver::Lazy(T::meta_class),
        }
    }

    pub fn from_meta(meta: &'static MetaClass) -> Self {
        Self {
            name: meta.name(),
            resolver: Resolver::Ready(meta),
        }
    }

    /// Token for hand-built metadata that may reference itself indirectly
    pub fn lazy(name: &'static str, resolve: fn() -> &'static MetaClass) -> Self {
        Self {
            name,
            resolver: Resolver::Lazy(resolve),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn meta_class(&self) -> &'static MetaClass {
        match self.resolver {
            Resolver::Lazy(resolve) => resolve(),
            Resolver::Ready(meta) => meta,
        }
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EntityType {}

impl Hash for EntityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityType({})", self.name)
    }
}

/// Runtime type token for values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean,
    Integer,
    Float,
    String,
    List(Box<ValueType>),
    Entity(EntityType),
    Any,
}

impl ValueType {
    pub fn entity<T: Entity>() -> Self {
        ValueType::Entity(EntityType::of::<T>())
    }

    pub fn list(inner: ValueType) -> Self {
        ValueType::List(Box::new(inner))
    }

    /// Infer the type of a constant
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ValueType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueType::Integer,
            Value::Number(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Array(items) => ValueType::list(
                items
                    .first()
                    .map(ValueType::infer)
                    .unwrap_or(ValueType::Any),
            ),
            Value::Null | Value::Object(_) => ValueType::Any,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Float)
    }

    pub fn entity_type(&self) -> Option<&EntityType> {
        match self {
            ValueType::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Whether a stored column of type `self` may be changed to `target`
    /// without a conflict
    pub fn can_widen_to(&self, target: &ValueType) -> bool {
        self == target
            || *target == ValueType::Any
            || (*self == ValueType::Integer && *target == ValueType::Float)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Boolean => write!(f, "bool"),
            ValueType::Integer => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::String => write!(f, "string"),
            ValueType::List(inner) => write!(f, "array<{}>", inner),
            ValueType::Entity(entity) => write!(f, "{}", entity.name()),
            ValueType::Any => write!(f, "any"),
        }
    }
}

/// Index annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Indexable {
    pub unique: bool,
}

/// Property annotations
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Annotations {
    pub key: bool,
    pub indexable: Option<Indexable>,
    pub searchable: bool,
    /// Always fetched, whatever the requested projection
    pub mandatory: bool,
    /// Inputs of a computed property
    pub depends_on: Vec<String>,
}

struct PropertyMetaInner {
    name: String,
    value_type: ValueType,
    annotations: Annotations,
}

/// Description of one property of an entity type
#[derive(Clone)]
pub struct PropertyMeta {
    inner: Arc<PropertyMetaInner>,
}

impl PropertyMeta {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::builder(name, value_type).build()
    }

    pub fn builder(name: impl Into<String>, value_type: ValueType) -> PropertyMetaBuilder {
        PropertyMetaBuilder {
            name: name.into(),
            value_type,
            annotations: Annotations::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn value_type(&self) -> &ValueType {
        &self.inner.value_type
    }

    pub fn annotations(&self) -> &Annotations {
        &self.inner.annotations
    }

    pub fn is_key(&self) -> bool {
        self.inner.annotations.key
    }

    pub fn indexable(&self) -> Option<Indexable> {
        self.inner.annotations.indexable
    }

    pub fn is_unique(&self) -> bool {
        self.indexable().map(|i| i.unique).unwrap_or(false)
    }

    pub fn is_searchable(&self) -> bool {
        self.inner.annotations.searchable
    }

    pub fn is_mandatory(&self) -> bool {
        self.inner.annotations.mandatory
    }

    pub fn depends_on(&self) -> &[String] {
        &self.inner.annotations.depends_on
    }

    /// Metaclass of the entity type this property holds, if any
    pub fn referenced_meta_class(&self) -> Option<&'static MetaClass> {
        self.value_type().entity_type().map(EntityType::meta_class)
    }

    /// Holds a keyed entity stored in its own collection
    pub fn is_reference(&self) -> bool {
        self.referenced_meta_class()
            .map(|meta| meta.key_property().is_some())
            .unwrap_or(false)
    }

    /// Holds an entity without a key, stored inline
    pub fn is_embedded(&self) -> bool {
        self.referenced_meta_class()
            .map(|meta| meta.key_property().is_none())
            .unwrap_or(false)
    }

    /// Read this property from a document (null when absent)
    pub fn get(&self, entity: &Value) -> Value {
        entity.get(self.name()).cloned().unwrap_or(Value::Null)
    }

    /// Write this property into a document
    pub fn set(&self, entity: &mut Value, value: Value) {
        if !entity.is_object() {
            *entity = Value::Object(Map::new());
        }
        if let Value::Object(fields) = entity {
            fields.insert(self.name().to_string(), value);
        }
    }
}

impl PartialEq for PropertyMeta {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.name == other.inner.name
                && self.inner.value_type == other.inner.value_type
                && self.inner.annotations == other.inner.annotations)
    }
}

impl Eq for PropertyMeta {}

impl Hash for PropertyMeta {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.name.hash(state);
        self.inner.value_type.hash(state);
    }
}

impl fmt::Debug for PropertyMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyMeta({}: {})", self.name(), self.value_type())
    }
}

/// Builder for [`PropertyMeta`]
pub struct PropertyMetaBuilder {
    name: String,
    value_type: ValueType,
    annotations: Annotations,
}

impl PropertyMetaBuilder {
    pub fn key(mut self) -> Self {
        self.annotations.key = true;
        self
    }

    pub fn indexable(mut self, unique: bool) -> Self {
        self.annotations.indexable = Some(Indexable { unique });
        self
    }

    pub fn searchable(mut self) -> Self {
        self.annotations.searchable = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.annotations.mandatory = true;
        self
    }

    pub fn depends_on<I, N>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.annotations
            .depends_on
            .extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> PropertyMeta {
        PropertyMeta {
            inner: Arc::new(PropertyMetaInner {
                name: self.name,
                value_type: self.value_type,
                annotations: self.annotations,
            }),
        }
    }
}

/// Metadata of one entity type
#[derive(Debug)]
pub struct MetaClass {
    name: String,
    properties: Vec<PropertyMeta>,
    key: Option<usize>,
}

impl MetaClass {
    pub fn builder(name: impl Into<String>) -> MetaClassBuilder {
        MetaClassBuilder {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[PropertyMeta] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMeta> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn key_property(&self) -> Option<&PropertyMeta> {
        self.key.map(|index| &self.properties[index])
    }

    pub fn as_type(&'static self) -> ValueType {
        ValueType::Entity(EntityType::from_meta(self))
    }

    /// Properties fetched whatever the projection: the key and `mandatory` ones
    pub fn always_required(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.properties
            .iter()
            .filter(|p| p.is_key() || p.is_mandatory())
    }

    /// Entity types referenced or embedded by this type, without duplicates
    pub fn referenced_types(&self) -> Vec<&'static MetaClass> {
        let mut referenced: Vec<&'static MetaClass> = Vec::new();
        for meta in self
            .properties
            .iter()
            .filter_map(PropertyMeta::referenced_meta_class)
        {
            if !referenced.iter().any(|m| m.name() == meta.name()) {
                referenced.push(meta);
            }
        }
        referenced
    }

    /// Key value of a document, `None` when the type has no key or it is unset
    pub fn key_of(&self, entity: &Value) -> Option<Value> {
        self.key_property()
            .map(|key| key.get(entity))
            .filter(|key| !key.is_null())
    }

    pub fn canonical_key_of(&self, entity: &Value) -> Option<String> {
        self.key_of(entity).map(|key| canonical_key(&key))
    }

    /// A document holding nothing but the key
    pub fn key_stub(&self, key: Value) -> Value {
        let mut stub = Value::Object(Map::new());
        if let Some(key_property) = self.key_property() {
            key_property.set(&mut stub, key);
        }
        stub
    }
}

/// Builder for [`MetaClass`]
pub struct MetaClassBuilder {
    name: String,
    properties: Vec<PropertyMeta>,
}

impl MetaClassBuilder {
    pub fn property(mut self, property: PropertyMeta) -> Self {
        self.properties.push(property);
        self
    }

    pub fn build(self) -> MetaClass {
        let key = self.properties.iter().position(PropertyMeta::is_key);
        MetaClass {
            name: self.name,
            properties: self.properties,
            key,
        }
    }
}
