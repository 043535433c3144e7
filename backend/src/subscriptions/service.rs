use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::adapters::{ChargeRequest, PaymentGateway};
use super::events::{NotificationEvent, Notifications};
use super::ledger::{quota_month_start, QuotaCaps};
use super::locks::AggregateLocks;
use super::models::{
    PlanTier, Subscription, SubscriptionAnalytics, SubscriptionPlan, SubscriptionStatus,
    SubscriptionUsage,
};
use super::preorders::{PreOrderCascade, PreOrderService};
use super::store::{LifecycleUpdate, RenewalUpdate, SubscriptionStore};

fn default_auto_renew() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscription {
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub payment_method_id: String,
    #[serde(default = "default_auto_renew")]
    pub auto_renew: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub subscription: Subscription,
    pub pre_orders: PreOrderCascade,
}

#[derive(Debug, Clone)]
pub enum RenewalOutcome {
    Renewed {
        subscription: Subscription,
        amount_cents: i64,
    },
    /// The subscription changed while the charge was in flight; the charge was refunded.
    Superseded,
}

/// key: subscription-lifecycle -> create / pause / resume / cancel / renew
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    payments: Arc<dyn PaymentGateway>,
    notifications: Notifications,
    locks: AggregateLocks,
    pre_orders: PreOrderService,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        payments: Arc<dyn PaymentGateway>,
        notifications: Notifications,
    ) -> Self {
        let locks = AggregateLocks::new();
        let pre_orders = PreOrderService::new(
            store.clone(),
            payments.clone(),
            notifications.clone(),
            locks.clone(),
        );
        Self {
            store,
            payments,
            notifications,
            locks,
            pre_orders,
        }
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    pub fn pre_orders(&self) -> &PreOrderService {
        &self.pre_orders
    }

    pub fn locks(&self) -> &AggregateLocks {
        &self.locks
    }

    pub async fn list_plans(&self, tier: Option<PlanTier>) -> AppResult<Vec<SubscriptionPlan>> {
        self.store.list_plans(tier).await
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> AppResult<SubscriptionPlan> {
        self.store
            .plan(plan_id)
            .await?
            .filter(|plan| plan.is_active)
            .ok_or(AppError::NotFound("plan"))
    }

    pub async fn get(&self, subscription_id: Uuid) -> AppResult<Subscription> {
        self.store
            .subscription(subscription_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))
    }

    pub async fn customer_subscriptions(
        &self,
        customer_id: Uuid,
        status: Option<SubscriptionStatus>,
    ) -> AppResult<Vec<Subscription>> {
        if self.store.customer(customer_id).await?.is_none() {
            return Err(AppError::NotFound("customer"));
        }
        self.store.customer_subscriptions(customer_id, status).await
    }

    /// Charges the first period up front; nothing is persisted when the charge fails.
    /// The store rejects a second active subscription at insert time, and the charge
    /// is refunded when that happens.
    pub async fn create(
        &self,
        request: NewSubscription,
        now: DateTime<Utc>,
    ) -> AppResult<Subscription> {
        if request.payment_method_id.trim().is_empty() {
            return Err(AppError::BadRequest(
                "payment_method_id is required".to_string(),
            ));
        }

        self.store
            .customer(request.customer_id)
            .await?
            .filter(|customer| customer.is_active)
            .ok_or(AppError::NotFound("customer"))?;
        let plan = self.get_plan(request.plan_id).await?;

        if self
            .store
            .active_subscription_for_customer(request.customer_id)
            .await?
            .is_some()
        {
            return Err(AppError::DuplicateActive);
        }

        let receipt_id = self
            .payments
            .charge(&ChargeRequest {
                customer_id: request.customer_id,
                amount_cents: plan.price_cents,
                payment_method_id: request.payment_method_id.clone(),
                description: format!("Subscription to {}", plan.name),
            })
            .await
            .map_err(|err| {
                warn!(?err, customer = %request.customer_id, plan = %plan.id, "initial subscription charge failed");
                AppError::PaymentFailed(format!("{err:#}"))
            })?;

        let period_end = now + plan.billing_frequency.period();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            customer_id: request.customer_id,
            plan_id: plan.id,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: period_end,
            next_billing_date: period_end,
            monthly_preorder_limit: plan.preorder_limit_per_month,
            current_month_preorders: 0,
            total_preorder_value_limit_cents: plan.preorder_value_limit_cents,
            current_preorder_value_cents: 0,
            payment_method_id: request.payment_method_id,
            auto_renew: request.auto_renew,
            cancel_at_period_end: false,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        let inserted = {
            let _guard = self.locks.customer(request.customer_id).await;
            self.store.insert_subscription(&subscription).await
        };
        if let Err(err) = inserted {
            self.refund_best_effort(&receipt_id, plan.price_cents).await;
            return Err(err);
        }

        info!(
            subscription = %subscription.id,
            customer = %subscription.customer_id,
            plan = %plan.id,
            receipt = %receipt_id,
            "subscription created"
        );
        self.notifications
            .deliver(NotificationEvent::SubscriptionWelcome {
                customer_id: subscription.customer_id,
                subscription_id: subscription.id,
                plan_id: plan.id,
                next_billing_date: subscription.next_billing_date,
            })
            .await;

        Ok(subscription)
    }

    pub async fn pause(&self, subscription_id: Uuid, now: DateTime<Utc>) -> AppResult<Subscription> {
        let subscription = self
            .transition(subscription_id, now, |current| {
                if current.status != SubscriptionStatus::Active {
                    return Err(AppError::InvalidState(format!(
                        "cannot pause a {} subscription",
                        current.status.as_str()
                    )));
                }
                let mut update = LifecycleUpdate::from_subscription(current, now);
                update.status = SubscriptionStatus::Paused;
                Ok(update)
            })
            .await?;

        info!(subscription = %subscription_id, "subscription paused");
        self.notifications
            .deliver(NotificationEvent::SubscriptionPaused {
                customer_id: subscription.customer_id,
                subscription_id,
            })
            .await;
        Ok(subscription)
    }

    /// Fails with `DuplicateActive` if the customer started another subscription meanwhile.
    pub async fn resume(&self, subscription_id: Uuid, now: DateTime<Utc>) -> AppResult<Subscription> {
        let customer_id = self.get(subscription_id).await?.customer_id;
        let subscription = {
            let _customer_guard = self.locks.customer(customer_id).await;

            if let Some(active) = self
                .store
                .active_subscription_for_customer(customer_id)
                .await?
            {
                if active.id != subscription_id {
                    return Err(AppError::DuplicateActive);
                }
            }

            self.transition(subscription_id, now, |current| {
                if current.status != SubscriptionStatus::Paused {
                    return Err(AppError::InvalidState(format!(
                        "cannot resume a {} subscription",
                        current.status.as_str()
                    )));
                }
                let mut update = LifecycleUpdate::from_subscription(current, now);
                update.status = SubscriptionStatus::Active;
                Ok(update)
            })
            .await?
        };

        info!(subscription = %subscription_id, "subscription resumed");
        self.notifications
            .deliver(NotificationEvent::SubscriptionResumed {
                customer_id,
                subscription_id,
            })
            .await;
        Ok(subscription)
    }

    /// Immediate cancellation ends the subscription now and cascades to pending pre-orders.
    /// Deferred cancellation stops renewal; the billing sweep finalizes it at `end_date`.
    pub async fn cancel(
        &self,
        subscription_id: Uuid,
        immediate: bool,
        now: DateTime<Utc>,
    ) -> AppResult<CancellationOutcome> {
        let subscription = self
            .transition(subscription_id, now, |current| {
                if current.status.is_terminal() {
                    return Err(AppError::InvalidState(format!(
                        "subscription is already {}",
                        current.status.as_str()
                    )));
                }
                let mut update = LifecycleUpdate::from_subscription(current, now);
                update.auto_renew = false;
                if immediate {
                    update.status = SubscriptionStatus::Cancelled;
                    update.end_date = now;
                    update.cancelled_at = Some(now);
                } else {
                    if current.cancel_at_period_end {
                        return Err(AppError::InvalidState(
                            "cancellation is already scheduled".to_string(),
                        ));
                    }
                    update.cancel_at_period_end = true;
                }
                Ok(update)
            })
            .await?;

        if !immediate {
            info!(
                subscription = %subscription_id,
                effective_at = %subscription.end_date,
                "subscription cancellation scheduled"
            );
            self.notifications
                .deliver(NotificationEvent::SubscriptionCancelled {
                    customer_id: subscription.customer_id,
                    subscription_id,
                    immediate: false,
                    effective_at: subscription.end_date,
                })
                .await;
            return Ok(CancellationOutcome {
                subscription,
                pre_orders: PreOrderCascade::default(),
            });
        }

        info!(subscription = %subscription_id, "subscription cancelled");
        Ok(self.complete_cancellation(subscription, true, now).await)
    }

    /// Deferred cancellations whose period has ended.
    pub async fn lapsed_cancellations(&self, now: DateTime<Utc>) -> AppResult<Vec<Subscription>> {
        self.store.lapsed_cancellations(now).await
    }

    /// Moves a subscription whose deferred cancellation has lapsed to `cancelled` and
    /// cascades over its pending pre-orders.
    pub async fn finalize_cancellation(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<CancellationOutcome> {
        let subscription = self
            .transition(subscription_id, now, |current| {
                if current.status.is_terminal()
                    || !current.cancel_at_period_end
                    || current.end_date > now
                {
                    return Err(AppError::InvalidState(
                        "subscription no longer awaits cancellation".to_string(),
                    ));
                }
                let mut update = LifecycleUpdate::from_subscription(current, now);
                update.status = SubscriptionStatus::Cancelled;
                update.cancelled_at = Some(now);
                Ok(update)
            })
            .await?;

        info!(subscription = %subscription.id, "deferred cancellation finalized");
        Ok(self.complete_cancellation(subscription, false, now).await)
    }

    /// Charges one period, advances the billing anchor and announces the result.
    pub async fn renew(&self, subscription_id: Uuid, now: DateTime<Utc>) -> AppResult<RenewalOutcome> {
        let outcome = self.charge_renewal(subscription_id, now).await?;
        self.announce_renewal(&outcome).await;
        Ok(outcome)
    }

    /// Charges one period and advances the billing anchor without notifying anyone. The
    /// charge runs without the subscription lock; the result is applied only if the anchor
    /// did not move meanwhile. Nothing is awaited after the renewal commits.
    pub async fn charge_renewal(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<RenewalOutcome> {
        let subscription = self.get(subscription_id).await?;
        if !subscription.is_due(now) {
            return Err(AppError::InvalidState(
                "subscription is not due for renewal".to_string(),
            ));
        }
        let plan = self
            .store
            .plan(subscription.plan_id)
            .await?
            .ok_or(AppError::NotFound("plan"))?;

        let receipt_id = self
            .payments
            .charge(&ChargeRequest {
                customer_id: subscription.customer_id,
                amount_cents: plan.price_cents,
                payment_method_id: subscription.payment_method_id.clone(),
                description: format!("Renewal of {}", plan.name),
            })
            .await
            .map_err(|err| AppError::PaymentFailed(format!("{err:#}")))?;

        let period = plan.billing_frequency.period();
        let renewal = RenewalUpdate {
            subscription_id,
            expected_next_billing_date: subscription.next_billing_date,
            next_billing_date: subscription.next_billing_date + period,
            end_date: subscription.end_date + period,
            renewed_at: now,
        };

        let applied = {
            let _guard = self.locks.subscription(subscription_id).await;
            self.store.apply_renewal(&renewal).await
        };

        match applied {
            Ok(Some(renewed)) => {
                info!(
                    subscription = %subscription_id,
                    receipt = %receipt_id,
                    next_billing_date = %renewed.next_billing_date,
                    "subscription renewed"
                );
                Ok(RenewalOutcome::Renewed {
                    subscription: renewed,
                    amount_cents: plan.price_cents,
                })
            }
            Ok(None) => {
                warn!(
                    subscription = %subscription_id,
                    receipt = %receipt_id,
                    "subscription changed during renewal; refunding charge"
                );
                self.refund_best_effort(&receipt_id, plan.price_cents).await;
                Ok(RenewalOutcome::Superseded)
            }
            Err(err) => {
                error!(?err, subscription = %subscription_id, "failed to record renewal");
                self.refund_best_effort(&receipt_id, plan.price_cents).await;
                Err(err)
            }
        }
    }

    pub async fn announce_renewal(&self, outcome: &RenewalOutcome) {
        if let RenewalOutcome::Renewed {
            subscription,
            amount_cents,
        } = outcome
        {
            self.notifications
                .deliver(NotificationEvent::BillingSucceeded {
                    customer_id: subscription.customer_id,
                    subscription_id: subscription.id,
                    amount_cents: *amount_cents,
                    next_billing_date: subscription.next_billing_date,
                })
                .await;
        }
    }

    pub async fn report_billing_failure(&self, subscription: &Subscription, reason: &str) {
        self.notifications
            .deliver(NotificationEvent::BillingFailed {
                customer_id: subscription.customer_id,
                subscription_id: subscription.id,
                reason: reason.to_string(),
            })
            .await;
    }

    pub async fn analytics(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionAnalytics> {
        let subscription = self.get(subscription_id).await?;
        let plan = self
            .store
            .plan(subscription.plan_id)
            .await?
            .ok_or(AppError::NotFound("plan"))?;
        let lifetime = self.store.pre_order_totals(subscription_id, None).await?;
        let month = self
            .store
            .pre_order_totals(subscription_id, Some(quota_month_start(now)))
            .await?;

        let average_order_value_cents = if lifetime.pre_orders > 0 {
            lifetime.value_cents / lifetime.pre_orders
        } else {
            0
        };

        Ok(SubscriptionAnalytics {
            subscription_id,
            total_pre_orders: lifetime.pre_orders,
            total_order_value_cents: lifetime.value_cents,
            average_order_value_cents,
            current_month_orders: month.pre_orders,
            current_month_value_cents: month.value_cents,
            subscription_start_date: subscription.start_date,
            subscription_status: subscription.status,
            plan_name: plan.name,
        })
    }

    /// Current quota-month consumption against the subscription's caps.
    pub async fn usage(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionUsage> {
        let subscription = self.get(subscription_id).await?;
        let caps = QuotaCaps::from(&subscription);
        let used = self
            .store
            .quota_usage(subscription_id, quota_month_start(now))
            .await?;
        Ok(SubscriptionUsage {
            subscription_id,
            current_month_preorders: used.pre_orders,
            monthly_preorder_limit: caps.monthly_preorder_limit,
            current_preorder_value_cents: used.value_cents,
            total_preorder_value_limit_cents: caps.value_limit_cents,
            usage_percentage: used.percentage_of(&caps),
        })
    }

    async fn transition<F>(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
        apply: F,
    ) -> AppResult<Subscription>
    where
        F: FnOnce(&Subscription) -> AppResult<LifecycleUpdate>,
    {
        let _guard = self.locks.subscription(subscription_id).await;
        let current = self.get(subscription_id).await?;
        let mut update = apply(&current)?;
        update.updated_at = now;
        self.store
            .transition_subscription(&update)
            .await?
            .ok_or_else(|| AppError::InvalidState("subscription changed concurrently".to_string()))
    }

    async fn complete_cancellation(
        &self,
        subscription: Subscription,
        immediate: bool,
        now: DateTime<Utc>,
    ) -> CancellationOutcome {
        let pre_orders = self.pre_orders.cancel_pending(subscription.id, now).await;
        self.notifications
            .deliver(NotificationEvent::SubscriptionCancelled {
                customer_id: subscription.customer_id,
                subscription_id: subscription.id,
                immediate,
                effective_at: subscription.end_date,
            })
            .await;
        CancellationOutcome {
            subscription,
            pre_orders,
        }
    }

    async fn refund_best_effort(&self, receipt_id: &str, amount_cents: i64) {
        if let Err(err) = self.payments.refund(receipt_id, amount_cents).await {
            warn!(?err, receipt = %receipt_id, amount_cents, "failed to refund superseded charge");
        }
    }
}
