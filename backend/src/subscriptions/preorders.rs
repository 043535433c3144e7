use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::adapters::{ChargeRequest, PaymentGateway};
use super::events::{NotificationEvent, Notifications};
use super::ledger::{self, quota_month_start, OrderPricing, QuotaCaps};
use super::locks::AggregateLocks;
use super::models::{PaymentStatus, PreOrder, PreOrderStatus, SubscriptionStatus};
use super::store::{PreOrderAdmission, SubscriptionStore};

const MIN_PRIORITY: i32 = 1;
const MAX_PRIORITY: i32 = 5;

fn default_priority() -> i32 {
    MIN_PRIORITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPreOrder {
    pub product_id: Uuid,
    #[serde(default)]
    pub product_variant_id: Option<Uuid>,
    pub quantity: i32,
    #[serde(default = "default_priority")]
    pub priority_level: i32,
}

impl NewPreOrder {
    pub fn new(product_id: Uuid, quantity: i32) -> Self {
        Self {
            product_id,
            product_variant_id: None,
            quantity,
            priority_level: MIN_PRIORITY,
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.quantity <= 0 {
            return Err(AppError::BadRequest(
                "quantity must be greater than zero".to_string(),
            ));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority_level) {
            return Err(AppError::BadRequest(format!(
                "priority_level must be between {MIN_PRIORITY} and {MAX_PRIORITY}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RefundOutcome {
    NotCharged,
    Refunded,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CascadeFailure {
    pub pre_order_id: Uuid,
    pub reason: String,
}

/// Result of cancelling every pending order of a subscription. An order whose refund failed
/// is listed in both vectors: its cancellation committed, its refund did not.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreOrderCascade {
    pub cancelled: Vec<Uuid>,
    pub failed: Vec<CascadeFailure>,
}

/// key: pre-order-lifecycle -> admission, pricing, cancellation
#[derive(Clone)]
pub struct PreOrderService {
    store: Arc<dyn SubscriptionStore>,
    payments: Arc<dyn PaymentGateway>,
    notifications: Notifications,
    locks: AggregateLocks,
}

impl PreOrderService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        payments: Arc<dyn PaymentGateway>,
        notifications: Notifications,
        locks: AggregateLocks,
    ) -> Self {
        Self {
            store,
            payments,
            notifications,
            locks,
        }
    }

    pub async fn get(&self, pre_order_id: Uuid) -> AppResult<PreOrder> {
        self.store
            .pre_order(pre_order_id)
            .await?
            .ok_or(AppError::NotFound("pre-order"))
    }

    pub async fn list(
        &self,
        subscription_id: Uuid,
        status: Option<PreOrderStatus>,
    ) -> AppResult<Vec<PreOrder>> {
        if self.store.subscription(subscription_id).await?.is_none() {
            return Err(AppError::NotFound("subscription"));
        }
        self.store
            .subscription_pre_orders(subscription_id, status)
            .await
    }

    /// Admits a pre-order against the subscription quota and the product capacity.
    /// Rejections leave every counter untouched.
    pub async fn create(
        &self,
        subscription_id: Uuid,
        request: NewPreOrder,
        now: DateTime<Utc>,
    ) -> AppResult<PreOrder> {
        request.validate()?;

        let guard = self.locks.subscription(subscription_id).await;

        let subscription = self
            .store
            .subscription(subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;
        if subscription.status != SubscriptionStatus::Active {
            return Err(AppError::InvalidState(format!(
                "subscription is {}",
                subscription.status.as_str()
            )));
        }

        let plan = self
            .store
            .plan(subscription.plan_id)
            .await?
            .ok_or(AppError::NotFound("plan"))?;
        let product = self
            .store
            .product(request.product_id)
            .await?
            .filter(|product| product.accepts_pre_orders())
            .ok_or(AppError::NotFound("product"))?;

        if !product.window_open(now) {
            return Err(AppError::WindowClosed);
        }
        if !product.has_capacity_for(request.quantity) {
            return Err(AppError::CapacityExceeded);
        }

        let pricing = OrderPricing::compute(
            product.unit_price_cents(),
            plan.discount_percentage,
            request.quantity,
        );
        let month_start = quota_month_start(now);
        let caps = QuotaCaps::from(&subscription);
        let usage = self.store.quota_usage(subscription_id, month_start).await?;
        ledger::check(&caps, &usage, pricing.total_amount_cents)?;

        let order = PreOrder {
            id: Uuid::new_v4(),
            subscription_id,
            customer_id: subscription.customer_id,
            product_id: product.id,
            product_variant_id: request.product_variant_id,
            quantity: request.quantity,
            unit_price_cents: pricing.unit_price_cents,
            discount_applied_cents: pricing.discount_applied_cents,
            total_amount_cents: pricing.total_amount_cents,
            status: PreOrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_receipt_id: None,
            priority_level: request.priority_level,
            expected_availability_date: product.expected_availability_date,
            pre_order_deadline: product.pre_order_end_date,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store
            .commit_pre_order(&order, &PreOrderAdmission { month_start, caps })
            .await?;
        drop(guard);

        info!(
            pre_order = %order.id,
            subscription = %subscription_id,
            product = %order.product_id,
            quantity = order.quantity,
            total_amount_cents = order.total_amount_cents,
            "pre-order created"
        );
        self.notifications
            .deliver(NotificationEvent::PreOrderConfirmation {
                customer_id: order.customer_id,
                subscription_id,
                pre_order_id: order.id,
                product_id: order.product_id,
                quantity: order.quantity,
                total_amount_cents: order.total_amount_cents,
            })
            .await;

        Ok(order)
    }

    /// Cancels and releases counters. A failed refund is returned as `RefundFailed`, but the
    /// cancellation itself stays committed.
    pub async fn cancel(&self, pre_order_id: Uuid, now: DateTime<Utc>) -> AppResult<PreOrder> {
        let (order, refund) = self.cancel_and_refund(pre_order_id, now).await?;
        match refund {
            RefundOutcome::Failed(reason) => Err(AppError::RefundFailed(reason)),
            RefundOutcome::NotCharged | RefundOutcome::Refunded => Ok(order),
        }
    }

    /// Cancels every `pending` order of the subscription, each as its own unit of work.
    pub async fn cancel_pending(&self, subscription_id: Uuid, now: DateTime<Utc>) -> PreOrderCascade {
        let mut cascade = PreOrderCascade::default();
        let pending = match self
            .store
            .subscription_pre_orders(subscription_id, Some(PreOrderStatus::Pending))
            .await
        {
            Ok(pending) => pending,
            Err(err) => {
                warn!(?err, subscription = %subscription_id, "failed to load pending pre-orders");
                return cascade;
            }
        };

        for order in pending {
            match self.cancel_and_refund(order.id, now).await {
                Ok((cancelled, refund)) => {
                    cascade.cancelled.push(cancelled.id);
                    if let RefundOutcome::Failed(reason) = refund {
                        cascade.failed.push(CascadeFailure {
                            pre_order_id: cancelled.id,
                            reason: AppError::RefundFailed(reason).to_string(),
                        });
                    }
                }
                Err(err) => {
                    warn!(?err, pre_order = %order.id, "cascade cancellation failed");
                    cascade.failed.push(CascadeFailure {
                        pre_order_id: order.id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            subscription = %subscription_id,
            cancelled = cascade.cancelled.len(),
            failed = cascade.failed.len(),
            "cascaded pre-order cancellation"
        );
        cascade
    }

    /// Forward-only fulfilment: pending -> confirmed -> processing -> fulfilled.
    pub async fn advance(
        &self,
        pre_order_id: Uuid,
        target: PreOrderStatus,
        now: DateTime<Utc>,
    ) -> AppResult<PreOrder> {
        let subscription_id = self.get(pre_order_id).await?.subscription_id;
        let _guard = self.locks.subscription(subscription_id).await;
        let current = self.get(pre_order_id).await?;

        if current.status.next() != Some(target) {
            return Err(AppError::InvalidState(format!(
                "cannot move pre-order from {} to {}",
                current.status.as_str(),
                target.as_str()
            )));
        }

        let updated = self
            .store
            .transition_pre_order(pre_order_id, current.status, target, now)
            .await?
            .ok_or_else(|| AppError::InvalidState("pre-order changed concurrently".to_string()))?;
        info!(
            pre_order = %pre_order_id,
            from = current.status.as_str(),
            to = target.as_str(),
            "pre-order advanced"
        );
        Ok(updated)
    }

    /// Charges the order total to the subscription's payment method.
    pub async fn charge(&self, pre_order_id: Uuid, now: DateTime<Utc>) -> AppResult<PreOrder> {
        let order = self.get(pre_order_id).await?;
        if !order.status.is_cancellable() {
            return Err(AppError::InvalidState(format!(
                "cannot charge a {} pre-order",
                order.status.as_str()
            )));
        }
        if !matches!(
            order.payment_status,
            PaymentStatus::Pending | PaymentStatus::Authorized
        ) {
            return Err(AppError::InvalidState(format!(
                "pre-order payment is already {}",
                order.payment_status.as_str()
            )));
        }

        let subscription = self
            .store
            .subscription(order.subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;

        let receipt_id = self
            .payments
            .charge(&ChargeRequest {
                customer_id: order.customer_id,
                amount_cents: order.total_amount_cents,
                payment_method_id: subscription.payment_method_id.clone(),
                description: format!("Pre-order {}", order.id),
            })
            .await
            .map_err(|err| AppError::PaymentFailed(format!("{err:#}")))?;

        let recorded = {
            let _guard = self.locks.subscription(order.subscription_id).await;
            self.store
                .mark_pre_order_charged(pre_order_id, &receipt_id, now)
                .await
        };

        match recorded {
            Ok(Some(charged)) => {
                info!(pre_order = %pre_order_id, receipt = %receipt_id, "pre-order charged");
                Ok(charged)
            }
            Ok(None) => {
                self.refund_best_effort(&receipt_id, order.total_amount_cents)
                    .await;
                Err(AppError::InvalidState(
                    "pre-order changed while it was being charged".to_string(),
                ))
            }
            Err(err) => {
                self.refund_best_effort(&receipt_id, order.total_amount_cents)
                    .await;
                Err(err)
            }
        }
    }

    async fn cancel_and_refund(
        &self,
        pre_order_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<(PreOrder, RefundOutcome)> {
        let subscription_id = self.get(pre_order_id).await?.subscription_id;
        let cancelled = {
            let _guard = self.locks.subscription(subscription_id).await;
            self.store
                .commit_pre_order_cancellation(pre_order_id, now)
                .await?
        };
        info!(
            pre_order = %pre_order_id,
            subscription = %subscription_id,
            "pre-order cancelled"
        );

        let (order, refund) = if cancelled.payment_status == PaymentStatus::Charged {
            self.refund(cancelled, now).await
        } else {
            (cancelled, RefundOutcome::NotCharged)
        };

        self.notifications
            .deliver(NotificationEvent::PreOrderCancelled {
                customer_id: order.customer_id,
                subscription_id,
                pre_order_id,
                refunded: refund == RefundOutcome::Refunded,
            })
            .await;

        Ok((order, refund))
    }

    async fn refund(&self, order: PreOrder, now: DateTime<Utc>) -> (PreOrder, RefundOutcome) {
        let Some(receipt_id) = order.payment_receipt_id.clone() else {
            warn!(pre_order = %order.id, "charged pre-order has no receipt to refund");
            return (
                order,
                RefundOutcome::Failed("charged pre-order has no payment receipt".to_string()),
            );
        };

        if let Err(err) = self
            .payments
            .refund(&receipt_id, order.total_amount_cents)
            .await
        {
            warn!(?err, pre_order = %order.id, receipt = %receipt_id, "pre-order refund failed");
            return (order, RefundOutcome::Failed(format!("{err:#}")));
        }

        match self.store.mark_pre_order_refunded(order.id, now).await {
            Ok(Some(refunded)) => (refunded, RefundOutcome::Refunded),
            Ok(None) => (order, RefundOutcome::Refunded),
            Err(err) => {
                warn!(?err, pre_order = %order.id, "failed to record pre-order refund");
                (order, RefundOutcome::Refunded)
            }
        }
    }

    async fn refund_best_effort(&self, receipt_id: &str, amount_cents: i64) {
        if let Err(err) = self.payments.refund(receipt_id, amount_cents).await {
            warn!(?err, receipt = %receipt_id, amount_cents, "failed to refund orphaned charge");
        }
    }
}
