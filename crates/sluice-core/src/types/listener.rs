//! Listener definitions: persisted routing rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::{FieldError, SluiceError, SluiceResult};

/// Row-level change kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

/// Kind of delivery target. Only webhooks exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum TargetType {
    #[default]
    Webhook,
}

/// A stored rule mapping (source table, event type) to a delivery target.
///
/// Listeners are never mutated in place: they are created, deleted, and
/// re-read wholesale on reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub id: Uuid,
    pub name: String,
    pub source_table: String,
    pub event: EventType,
    pub target_type: TargetType,
    pub target_url: String,
    pub created_at: DateTime<Utc>,
}

impl Listener {
    /// Create a webhook listener with a fresh id.
    pub fn new(
        name: impl Into<String>,
        source_table: impl Into<String>,
        event: EventType,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source_table: source_table.into(),
            event,
            target_type: TargetType::Webhook,
            target_url: target_url.into(),
            created_at: Utc::now(),
        }
    }
}

/// Raw listener fields as submitted by an operator.
///
/// Everything is a string so that malformed input can be reported field by
/// field instead of failing deserialization as a whole.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewListener {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_table: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub target_url: String,
}

/// Listener fields that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidListener {
    pub name: String,
    pub source_table: String,
    pub event: EventType,
    pub target_url: String,
}

impl NewListener {
    pub fn new(
        name: impl Into<String>,
        source_table: impl Into<String>,
        event: impl Into<String>,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_table: source_table.into(),
            event: event.into(),
            target_url: target_url.into(),
        }
    }

    /// Trim and check every field, reporting all failures at once.
    pub fn validate(&self) -> SluiceResult<ValidListener> {
        let mut errors = Vec::new();

        let name = self.name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("name", "Name is required"));
        }

        let source_table = self.source_table.trim();
        if source_table.is_empty() {
            errors.push(FieldError::new("source_table", "Source table is required"));
        }

        let event = self.event.parse::<EventType>().ok();
        if event.is_none() {
            errors.push(FieldError::new(
                "event",
                "Event must be INSERT, UPDATE, or DELETE",
            ));
        }

        let target_url = self.target_url.trim();
        if !is_valid_url(target_url) {
            errors.push(FieldError::new(
                "target_url",
                "Target URL must be a valid URL",
            ));
        }

        match event {
            Some(event) if errors.is_empty() => Ok(ValidListener {
                name: name.to_string(),
                source_table: source_table.to_string(),
                event,
                target_url: target_url.to_string(),
            }),
            _ => Err(SluiceError::validation(errors)),
        }
    }
}

fn is_valid_url(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().map_or(false, |h| !h.is_empty())
        }
        Err(_) => false,
    }
}

/// Parse a listener identifier, reporting a field error on the `id` path.
pub fn parse_listener_id(raw: &str) -> SluiceResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|_| SluiceError::validation(vec![FieldError::new("id", "Invalid UUID format")]))
}
