//! Storage Layer
//!
//! The crate ships one raw backend adapter, an in-memory document store. It
//! implements the full [`QueryProvider`](crate::query::QueryProvider)
//! contract, including a native change feed, and is the innermost provider of
//! every decorator chain built by the repository.
//!
//! # Architecture
//!
//! - Tables are ordered maps keyed by the canonical key string
//! - Each committed write is broadcast as a [`StoreEvent`]
//! - Schema creation is delegated to an optional
//!   [`SchemaProvider`](crate::schema::SchemaProvider)

pub mod events;
mod memory_store;

pub use events::StoreEvent;
pub use memory_store::{MemoryQueryProvider, DEFAULT_CHANGE_FEED_CAPACITY};
