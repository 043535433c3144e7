use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::ledger::{QuotaCaps, QuotaUsage};
use super::models::{
    Customer, PlanTier, PreOrder, PreOrderStatus, Product, Subscription, SubscriptionPlan,
    SubscriptionStatus,
};

/// Preconditions re-evaluated inside the transaction that persists a new pre-order.
#[derive(Debug, Clone, Copy)]
pub struct PreOrderAdmission {
    pub month_start: DateTime<Utc>,
    pub caps: QuotaCaps,
}

/// Compare-and-swap of a subscription's lifecycle fields. Counters are never part of it.
#[derive(Debug, Clone)]
pub struct LifecycleUpdate {
    pub subscription_id: Uuid,
    pub expected_status: SubscriptionStatus,
    pub status: SubscriptionStatus,
    pub auto_renew: bool,
    pub cancel_at_period_end: bool,
    pub end_date: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl LifecycleUpdate {
    pub fn from_subscription(subscription: &Subscription, now: DateTime<Utc>) -> Self {
        Self {
            subscription_id: subscription.id,
            expected_status: subscription.status,
            status: subscription.status,
            auto_renew: subscription.auto_renew,
            cancel_at_period_end: subscription.cancel_at_period_end,
            end_date: subscription.end_date,
            cancelled_at: subscription.cancelled_at,
            updated_at: now,
        }
    }
}

/// Applied only while the subscription is still active, auto-renewing and anchored at
/// `expected_next_billing_date`.
#[derive(Debug, Clone, Copy)]
pub struct RenewalUpdate {
    pub subscription_id: Uuid,
    pub expected_next_billing_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
}

/// Count of all pre-orders and value of the non-cancelled ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreOrderTotals {
    pub pre_orders: i64,
    pub value_cents: i64,
}

/// Shared by store implementations: only pending or confirmed orders may be cancelled.
pub fn ensure_cancellable(status: PreOrderStatus) -> AppResult<()> {
    if status == PreOrderStatus::Cancelled {
        return Err(AppError::InvalidState(
            "pre-order is already cancelled".to_string(),
        ));
    }
    if !status.is_cancellable() {
        return Err(AppError::InvalidState(format!(
            "cannot cancel a {} pre-order",
            status.as_str()
        )));
    }
    Ok(())
}

/// key: subscription-store -> aggregate-scoped persistence
/// Every write is atomic for the aggregate it touches; preconditions that guard a counter
/// are re-checked at commit time.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn customer(&self, id: Uuid) -> AppResult<Option<Customer>>;
    async fn plan(&self, id: Uuid) -> AppResult<Option<SubscriptionPlan>>;
    async fn list_plans(&self, tier: Option<PlanTier>) -> AppResult<Vec<SubscriptionPlan>>;
    async fn product(&self, id: Uuid) -> AppResult<Option<Product>>;

    async fn subscription(&self, id: Uuid) -> AppResult<Option<Subscription>>;
    async fn customer_subscriptions(
        &self,
        customer_id: Uuid,
        status: Option<SubscriptionStatus>,
    ) -> AppResult<Vec<Subscription>>;
    async fn active_subscription_for_customer(
        &self,
        customer_id: Uuid,
    ) -> AppResult<Option<Subscription>>;
    /// Fails with `DuplicateActive` when the customer already holds an active subscription.
    async fn insert_subscription(&self, subscription: &Subscription) -> AppResult<()>;
    /// Returns `None` when the status no longer matches `expected_status`.
    async fn transition_subscription(
        &self,
        update: &LifecycleUpdate,
    ) -> AppResult<Option<Subscription>>;
    async fn due_subscriptions(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Subscription>>;
    /// Deferred cancellations whose period has ended.
    async fn lapsed_cancellations(&self, now: DateTime<Utc>) -> AppResult<Vec<Subscription>>;
    /// Advances the billing anchor and zeroes the running counters.
    async fn apply_renewal(&self, renewal: &RenewalUpdate) -> AppResult<Option<Subscription>>;

    async fn pre_order(&self, id: Uuid) -> AppResult<Option<PreOrder>>;
    async fn subscription_pre_orders(
        &self,
        subscription_id: Uuid,
        status: Option<PreOrderStatus>,
    ) -> AppResult<Vec<PreOrder>>;
    async fn quota_usage(&self, subscription_id: Uuid, since: DateTime<Utc>)
        -> AppResult<QuotaUsage>;
    async fn pre_order_totals(
        &self,
        subscription_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<PreOrderTotals>;
    /// Persists the order and bumps product and subscription counters as one unit.
    async fn commit_pre_order(
        &self,
        order: &PreOrder,
        admission: &PreOrderAdmission,
    ) -> AppResult<()>;
    /// Marks the order cancelled and releases its counters (clamped at zero) as one unit.
    async fn commit_pre_order_cancellation(
        &self,
        pre_order_id: Uuid,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<PreOrder>;
    async fn transition_pre_order(
        &self,
        pre_order_id: Uuid,
        expected: PreOrderStatus,
        target: PreOrderStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PreOrder>>;
    async fn mark_pre_order_charged(
        &self,
        pre_order_id: Uuid,
        receipt_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PreOrder>>;
    async fn mark_pre_order_refunded(
        &self,
        pre_order_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PreOrder>>;
}
