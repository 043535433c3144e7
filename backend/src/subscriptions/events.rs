use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time;
use tracing::{debug, warn};
use uuid::Uuid;

use super::adapters::NotificationSender;

/// key: lifecycle-notifications -> one-way events for customers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    SubscriptionWelcome {
        customer_id: Uuid,
        subscription_id: Uuid,
        plan_id: Uuid,
        next_billing_date: DateTime<Utc>,
    },
    SubscriptionPaused {
        customer_id: Uuid,
        subscription_id: Uuid,
    },
    SubscriptionResumed {
        customer_id: Uuid,
        subscription_id: Uuid,
    },
    SubscriptionCancelled {
        customer_id: Uuid,
        subscription_id: Uuid,
        immediate: bool,
        effective_at: DateTime<Utc>,
    },
    PreOrderConfirmation {
        customer_id: Uuid,
        subscription_id: Uuid,
        pre_order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        total_amount_cents: i64,
    },
    PreOrderCancelled {
        customer_id: Uuid,
        subscription_id: Uuid,
        pre_order_id: Uuid,
        refunded: bool,
    },
    BillingSucceeded {
        customer_id: Uuid,
        subscription_id: Uuid,
        amount_cents: i64,
        next_billing_date: DateTime<Utc>,
    },
    BillingFailed {
        customer_id: Uuid,
        subscription_id: Uuid,
        reason: String,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::SubscriptionWelcome { .. } => "subscription_welcome",
            NotificationEvent::SubscriptionPaused { .. } => "subscription_paused",
            NotificationEvent::SubscriptionResumed { .. } => "subscription_resumed",
            NotificationEvent::SubscriptionCancelled { .. } => "subscription_cancelled",
            NotificationEvent::PreOrderConfirmation { .. } => "pre_order_confirmation",
            NotificationEvent::PreOrderCancelled { .. } => "pre_order_cancelled",
            NotificationEvent::BillingSucceeded { .. } => "billing_succeeded",
            NotificationEvent::BillingFailed { .. } => "billing_failed",
        }
    }

    pub fn customer_id(&self) -> Uuid {
        match self {
            NotificationEvent::SubscriptionWelcome { customer_id, .. }
            | NotificationEvent::SubscriptionPaused { customer_id, .. }
            | NotificationEvent::SubscriptionResumed { customer_id, .. }
            | NotificationEvent::SubscriptionCancelled { customer_id, .. }
            | NotificationEvent::PreOrderConfirmation { customer_id, .. }
            | NotificationEvent::PreOrderCancelled { customer_id, .. }
            | NotificationEvent::BillingSucceeded { customer_id, .. }
            | NotificationEvent::BillingFailed { customer_id, .. } => *customer_id,
        }
    }
}

/// Best-effort delivery wrapper. Never fails the caller; state is already committed.
#[derive(Clone)]
pub struct Notifications {
    sender: Arc<dyn NotificationSender>,
    timeout: Duration,
}

impl Notifications {
    pub fn new(sender: Arc<dyn NotificationSender>, timeout: Duration) -> Self {
        Self { sender, timeout }
    }

    pub async fn deliver(&self, event: NotificationEvent) {
        let kind = event.kind();
        let customer_id = event.customer_id();
        match time::timeout(self.timeout, self.sender.send(&event)).await {
            Ok(Ok(())) => debug!(event = kind, %customer_id, "notification delivered"),
            Ok(Err(err)) => warn!(?err, event = kind, %customer_id, "notification delivery failed"),
            Err(_) => warn!(
                event = kind,
                %customer_id,
                timeout_ms = self.timeout.as_millis() as u64,
                "notification delivery timed out"
            ),
        }
    }
}
