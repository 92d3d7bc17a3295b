//! Change notifications emitted by a change feed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EventType;

/// One row-level change on a watched table.
///
/// Row images are kept as opaque JSON and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub table: String,
    pub event_type: EventType,
    /// Row state before the change; absent on INSERT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_image: Option<Value>,
    /// Row state after the change; absent on DELETE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_image: Option<Value>,
}

impl ChangeNotification {
    pub fn insert(table: impl Into<String>, after: Value) -> Self {
        Self {
            table: table.into(),
            event_type: EventType::Insert,
            before_image: None,
            after_image: Some(after),
        }
    }

    pub fn update(table: impl Into<String>, before: Value, after: Value) -> Self {
        Self {
            table: table.into(),
            event_type: EventType::Update,
            before_image: Some(before),
            after_image: Some(after),
        }
    }

    pub fn delete(table: impl Into<String>, before: Value) -> Self {
        Self {
            table: table.into(),
            event_type: EventType::Delete,
            before_image: Some(before),
            after_image: None,
        }
    }

    /// The row image forwarded to targets: the after image when present,
    /// otherwise the before image, otherwise JSON null.
    pub fn payload(&self) -> Value {
        self.after_image
            .as_ref()
            .or(self.before_image.as_ref())
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Which event types a feed subscription should carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    /// Every event type (`"*"`).
    #[default]
    All,
    Only(EventType),
}

impl EventFilter {
    pub fn matches(&self, event: EventType) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => *wanted == event,
        }
    }
}

impl std::str::FromStr for EventFilter {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Only)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_prefers_after_image() {
        let n = ChangeNotification::update("orders", json!({"total": 1}), json!({"total": 2}));
        assert_eq!(n.payload(), json!({"total": 2}));

        let n = ChangeNotification::delete("orders", json!({"id": 7}));
        assert_eq!(n.payload(), json!({"id": 7}));
    }

    #[test]
    fn test_absent_images_are_not_serialized() {
        let n = ChangeNotification::insert("orders", json!({"id": 1, "total": 42}));
        let encoded = serde_json::to_value(&n).unwrap();
        assert_eq!(
            encoded,
            json!({"table": "orders", "event_type": "INSERT", "after_image": {"id": 1, "total": 42}})
        );
    }

    #[test]
    fn test_event_filter() {
        assert_eq!("*".parse::<EventFilter>().unwrap(), EventFilter::All);
        let only_delete: EventFilter = "DELETE".parse().unwrap();
        assert!(only_delete.matches(EventType::Delete));
        assert!(!only_delete.matches(EventType::Insert));
        assert!(EventFilter::All.matches(EventType::Update));
        assert!("nope".parse::<EventFilter>().is_err());
    }
}
