//! Dispatch pipeline.
//!
//! Resolves the listeners for a notification and runs delivery plus
//! outcome logging for each one in its own task. A failure (or panic) in
//! one listener's task is recorded as a FAILED outcome and never affects
//! its siblings.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::delivery::WebhookSender;
use crate::multiplexer::NotificationHandler;
use crate::registry::ListenerRegistry;
use crate::traits::DeliveryLog;
use crate::types::{ChangeNotification, DeliveryOutcome, DeliveryResult, Listener};

/// Fans one notification out to every matching listener.
pub struct Dispatcher {
    registry: Arc<ListenerRegistry>,
    sender: Arc<dyn WebhookSender>,
    log: Arc<dyn DeliveryLog>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ListenerRegistry>,
        sender: Arc<dyn WebhookSender>,
        log: Arc<dyn DeliveryLog>,
    ) -> Self {
        Self {
            registry,
            sender,
            log,
        }
    }

    /// Deliver `notification` to all listeners registered for its
    /// (table, event type) and return one outcome per listener.
    ///
    /// Returns only after every listener has either succeeded or had its
    /// failure recorded.
    pub async fn dispatch(&self, notification: ChangeNotification) -> Vec<DeliveryOutcome> {
        info!(
            table = %notification.table,
            event = %notification.event_type,
            "Event detected"
        );

        let matches = self
            .registry
            .matching(&notification.table, notification.event_type);
        if matches.is_empty() {
            debug!(
                table = %notification.table,
                event = %notification.event_type,
                "No listeners configured"
            );
            return Vec::new();
        }
        info!(count = matches.len(), "Found matching listener(s)");

        let notification = Arc::new(notification);
        let tasks = matches.iter().map(|listener| {
            let sender = self.sender.clone();
            let log = self.log.clone();
            let listener = listener.clone();
            let notification = notification.clone();
            tokio::spawn(async move {
                process_listener(sender.as_ref(), log.as_ref(), &listener, &notification).await
            })
        });
        let joined = join_all(tasks).await;

        let mut outcomes = Vec::with_capacity(joined.len());
        for (listener, joined) in matches.iter().zip(joined) {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(listener = %listener.name, error = %e, "Error processing listener");
                    let outcome = DeliveryOutcome::new(
                        listener.id,
                        &notification,
                        notification.payload(),
                        &DeliveryResult::failed(e.to_string()),
                    );
                    record(self.log.as_ref(), &outcome).await;
                    outcomes.push(outcome);
                }
            }
        }
        outcomes
    }
}

#[async_trait]
impl NotificationHandler for Dispatcher {
    async fn handle(&self, notification: ChangeNotification) {
        self.dispatch(notification).await;
    }
}

async fn process_listener(
    sender: &dyn WebhookSender,
    log: &dyn DeliveryLog,
    listener: &Listener,
    notification: &ChangeNotification,
) -> DeliveryOutcome {
    debug!(listener = %listener.name, url = %listener.target_url, "Processing listener");

    let payload = notification.payload();
    let result = sender.send(&listener.target_url, &payload).await;

    if result.success {
        info!(listener = %listener.name, status = ?result.status, "Webhook sent successfully");
    } else {
        warn!(
            listener = %listener.name,
            status = ?result.status,
            error = result.error.as_deref().unwrap_or_default(),
            "Webhook failed"
        );
    }

    let outcome = DeliveryOutcome::new(listener.id, notification, payload, &result);
    record(log, &outcome).await;
    outcome
}

async fn record(log: &dyn DeliveryLog, outcome: &DeliveryOutcome) {
    if let Err(e) = log.append(outcome).await {
        error!(
            listener_id = %outcome.listener_id,
            status = %outcome.status,
            error = %e,
            "Error logging event"
        );
    }
}
