//! EntityFlow Core - Typed Queries over Pluggable Providers
//!
//! This crate provides a backend-agnostic repository layer: application code
//! builds strongly-typed query expressions against entity types, and the layer
//! compiles them and runs them through a chain of provider decorators down to
//! a storage backend, optionally streaming live updates as data changes.
//!
//! # Architecture
//!
//! - **Typed Expressions**: capability markers restrict which operators an
//!   expression offers; every tree compiles bottom-up into a closure
//! - **Provider Pipeline**: cross-cutting behaviour (scheduling, live queries,
//!   mandatory properties, reference-first writes) lives in decorators that
//!   all satisfy the same object-safe `QueryProvider` contract
//! - **Dynamic Documents**: entities travel through the pipeline as
//!   `serde_json::Value`; the typed facade encodes and decodes at the edge
//!
//! # Modules
//!
//! - [`models`] - Entity metadata, notifications and value helpers
//! - [`expressions`] - Expression AST, typed builders and the compiler
//! - [`query`] - Query descriptors, aggregators and the provider contract
//! - [`decorators`] - Provider decorators making up the pipeline
//! - [`schema`] - Schema provisioning and its caching decorator
//! - [`db`] - In-memory document store with a change feed
//! - [`services`] - Repository facade and configuration

pub mod db;
pub mod decorators;
pub mod error;
pub mod expressions;
pub mod models;
pub mod query;
pub mod schema;
pub mod services;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use error::{RepositoryError, Result, ResultExt};
pub use expressions::{BooleanExpression, Expr, PropertyExpression, TypedProperty};
pub use models::{Entity, MetaClass, Notification, NotificationType, PropertyMeta, ValueType};
pub use query::{Aggregator, QueryInfo, QueryProvider};
pub use services::{EntityQuery, EntitySet, Repository, RepositoryBuilder, RepositoryConfig};
