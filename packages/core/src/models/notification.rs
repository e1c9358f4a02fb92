//! Change Notifications
//!
//! Live queries deliver [`Notification`]s describing how the result set of a
//! query evolves. An entity that stops matching the query's predicate is
//! reported as a `Delete` carrying the last matching value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationType {
    Create,
    Update,
    Delete,
}

/// One change to a query result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification<T = Value> {
    pub kind: NotificationType,
    /// Present on `Update` and `Delete`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<T>,
    /// Absent on `Delete`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<T>,
    /// Backend version of the entity after the change, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl<T> Notification<T> {
    pub fn create(new_value: T) -> Self {
        Self {
            kind: NotificationType::Create,
            old_value: None,
            new_value: Some(new_value),
            version: None,
        }
    }

    pub fn update(old_value: T, new_value: T) -> Self {
        Self {
            kind: NotificationType::Update,
            old_value: Some(old_value),
            new_value: Some(new_value),
            version: None,
        }
    }

    pub fn delete(old_value: T) -> Self {
        Self {
            kind: NotificationType::Delete,
            old_value: Some(old_value),
            new_value: None,
            version: None,
        }
    }

    pub fn with_version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    /// The value the entity holds after the change, or before it on `Delete`
    pub fn current(&self) -> Option<&T> {
        self.new_value.as_ref().or(self.old_value.as_ref())
    }

    pub fn map<U, F>(self, mut f: F) -> Notification<U>
    where
        F: FnMut(T) -> U,
    {
        Notification {
            kind: self.kind,
            old_value: self.old_value.map(&mut f),
            new_value: self.new_value.map(&mut f),
            version: self.version,
        }
    }

    pub fn try_map<U, E, F>(self, mut f: F) -> Result<Notification<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        Ok(Notification {
            kind: self.kind,
            old_value: self.old_value.map(&mut f).transpose()?,
            new_value: self.new_value.map(&mut f).transpose()?,
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_serialization_contract() {
        let notification = Notification::update(json!({"id": 1}), json!({"id": 1, "n": 2}))
            .with_version(Some(3));
        let parsed = serde_json::to_value(&notification).unwrap();

        assert_eq!(parsed["kind"], "update");
        assert_eq!(parsed["oldValue"], json!({"id": 1}));
        assert_eq!(parsed["newValue"], json!({"id": 1, "n": 2}));
        assert_eq!(parsed["version"], 3);
    }

    #[test]
    fn test_delete_carries_old_value_only() {
        let notification = Notification::delete(json!({"id": 1}));
        assert!(notification.new_value.is_none());
        assert_eq!(notification.current(), Some(&json!({"id": 1})));

        let parsed = serde_json::to_value(&notification).unwrap();
        assert!(parsed.get("newValue").is_none());
    }
}
