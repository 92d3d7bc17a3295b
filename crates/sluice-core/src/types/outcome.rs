//! Delivery results and the outcome records written to the log sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

use super::{ChangeNotification, EventType};

/// Normalized result of one webhook POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn succeeded(status: u16, data: Option<Value>) -> Self {
        Self {
            success: true,
            status: Some(status),
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            status: None,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn with_response(mut self, status: u16, data: Option<Value>) -> Self {
        self.status = Some(status);
        self.data = data;
        self
    }
}

/// Outcome status of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// Immutable record of one attempted webhook call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub id: Uuid,
    /// Reference to the listener; the outcome outlives it.
    pub listener_id: Uuid,
    pub status: DeliveryStatus,
    /// The row image that was forwarded.
    pub payload_sent: Value,
    /// The notification that triggered the attempt.
    pub notification: ChangeNotification,
    /// Serialized [`DeliveryResult`].
    pub response_summary: String,
    pub created_at: DateTime<Utc>,
}

impl DeliveryOutcome {
    pub fn new(
        listener_id: Uuid,
        notification: &ChangeNotification,
        payload_sent: Value,
        result: &DeliveryResult,
    ) -> Self {
        let status = if result.success {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::Failed
        };
        let response_summary = serde_json::to_string(result).unwrap_or_else(|e| {
            format!(r#"{{"success":{},"error":"unserializable result: {}"}}"#, result.success, e)
        });

        Self {
            id: Uuid::new_v4(),
            listener_id,
            status,
            payload_sent,
            notification: notification.clone(),
            response_summary,
            created_at: Utc::now(),
        }
    }
}

/// Descriptive listener fields joined onto a log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerSummary {
    pub name: String,
    pub source_table: String,
    pub event: EventType,
}

/// A delivery outcome as listed by the management surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
    /// `None` once the owning listener has been deleted.
    pub listener: Option<ListenerSummary>,
}
