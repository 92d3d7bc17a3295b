//! Webhook delivery client.
//!
//! Performs a single JSON POST per call with a bounded timeout and folds
//! every failure (transport error, timeout, non-2xx status) into a
//! [`DeliveryResult`]. There is no retry at this layer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{SluiceError, SluiceResult};
use crate::types::DeliveryResult;

/// Default request timeout for webhook delivery.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that can deliver a payload to a URL.
///
/// Implementations must never fail: every error becomes an unsuccessful
/// [`DeliveryResult`].
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &Value) -> DeliveryResult;
}

/// reqwest-backed webhook client.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    timeout: Duration,
}

impl WebhookClient {
    /// Create a client with the default timeout.
    pub fn new() -> SluiceResult<Self> {
        Self::with_timeout(DEFAULT_DELIVERY_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> SluiceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SluiceError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn describe_transport_error(&self, err: &reqwest::Error) -> String {
        if err.is_timeout() {
            format!("request timed out after {}ms", self.timeout.as_millis())
        } else {
            let text = err.to_string();
            if text.is_empty() {
                "request failed".to_string()
            } else {
                text
            }
        }
    }
}

#[async_trait]
impl WebhookSender for WebhookClient {
    async fn send(&self, url: &str, payload: &Value) -> DeliveryResult {
        let response = match self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return DeliveryResult::failed(self.describe_transport_error(&e)),
        };

        let status = response.status();
        let data = match response.text().await {
            Ok(body) => parse_body(body),
            Err(e) => {
                return DeliveryResult::failed(self.describe_transport_error(&e))
                    .with_response(status.as_u16(), None)
            }
        };

        if status.is_success() {
            DeliveryResult::succeeded(status.as_u16(), data)
        } else {
            DeliveryResult::failed(format!(
                "Request failed with status code {}",
                status.as_u16()
            ))
            .with_response(status.as_u16(), data)
        }
    }
}

/// Response bodies are kept as JSON when they parse, as a JSON string
/// otherwise, and dropped when empty.
fn parse_body(body: String) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    Some(serde_json::from_str(&body).unwrap_or(Value::String(body)))
}
