//! Data Models
//!
//! This module contains the data structures shared by every layer:
//!
//! - [`MetaClass`] / [`PropertyMeta`] / [`ValueType`] - entity metadata consumed
//!   by the expression compiler, the schema provider and the decorators
//! - [`Entity`] - trait implemented by every storable type
//! - [`Notification`] - change notification emitted by live queries
//! - [`values`] - comparison and rendering helpers for `serde_json::Value` documents

mod meta_class;
mod notification;
pub mod values;

pub use meta_class::{
    Annotations, Entity, EntityType, Indexable, MetaClass, MetaClassBuilder, PropertyMeta,
    PropertyMetaBuilder, ValueType,
};
pub use notification::{Notification, NotificationType};
