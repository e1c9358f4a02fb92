//! Store Events
//!
//! Change events emitted by [`MemoryQueryProvider`](super::MemoryQueryProvider)
//! after each committed write. Events are published on a tokio broadcast
//! channel while the store's write lock is still held, so every subscriber
//! observes the writes to one key in commit order.
//!
//! # Event Flow
//!
//! 1. The store commits an insert, update or delete
//! 2. A `StoreEvent` carrying the table, the values and the new version is broadcast
//! 3. Raw `live_query` streams filter the events of their table into `Notification`s
//! 4. External subscribers (`subscribe_to_events`) receive every event

use crate::models::Notification;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Change committed by the memory store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreEvent {
    #[serde(rename = "entityCreated", rename_all = "camelCase")]
    EntityCreated {
        table: String,
        new_value: Value,
        version: u64,
    },

    #[serde(rename = "entityUpdated", rename_all = "camelCase")]
    EntityUpdated {
        table: String,
        old_value: Value,
        new_value: Value,
        version: u64,
    },

    #[serde(rename = "entityDeleted", rename_all = "camelCase")]
    EntityDeleted {
        table: String,
        old_value: Value,
        version: u64,
    },
}

impl StoreEvent {
    pub fn event_type(&self) -> &str {
        match self {
            StoreEvent::EntityCreated { .. } => "entity:created",
            StoreEvent::EntityUpdated { .. } => "entity:updated",
            StoreEvent::EntityDeleted { .. } => "entity:deleted",
        }
    }

    pub fn table(&self) -> &str {
        match self {
            StoreEvent::EntityCreated { table, .. }
            | StoreEvent::EntityUpdated { table, .. }
            | StoreEvent::EntityDeleted { table, .. } => table,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            StoreEvent::EntityCreated { version, .. }
            | StoreEvent::EntityUpdated { version, .. }
            | StoreEvent::EntityDeleted { version, .. } => *version,
        }
    }

    /// Change-feed notification for this event
    pub fn to_notification(&self) -> Notification {
        match self {
            StoreEvent::EntityCreated {
                new_value, version, ..
            } => Notification::create(new_value.clone()).with_version(Some(*version)),
            StoreEvent::EntityUpdated {
                old_value,
                new_value,
                version,
                ..
            } => Notification::update(old_value.clone(), new_value.clone())
                .with_version(Some(*version)),
            StoreEvent::EntityDeleted {
                old_value, version, ..
            } => Notification::delete(old_value.clone()).with_version(Some(*version)),
        }
    }
}
