//! In-memory collaborators for tests and local runs without Postgres.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::adapters::{ChargeRequest, NotificationSender, PaymentGateway};
use super::events::{NotificationEvent, Notifications};
use super::ledger::{self, QuotaUsage};
use super::models::{
    BillingFrequency, Customer, PaymentStatus, PlanFeatures, PlanTier, PreOrder, PreOrderStatus,
    Product, Subscription, SubscriptionPlan, SubscriptionStatus,
};
use super::service::{NewSubscription, SubscriptionService};
use super::store::{
    ensure_cancellable, LifecycleUpdate, PreOrderAdmission, PreOrderTotals, RenewalUpdate,
    SubscriptionStore,
};

#[derive(Default)]
struct StoreState {
    customers: HashMap<Uuid, Customer>,
    plans: HashMap<Uuid, SubscriptionPlan>,
    products: HashMap<Uuid, Product>,
    subscriptions: HashMap<Uuid, Subscription>,
    pre_orders: HashMap<Uuid, PreOrder>,
}

impl StoreState {
    fn usage(&self, subscription_id: Uuid, since: DateTime<Utc>) -> QuotaUsage {
        self.pre_orders
            .values()
            .filter(|order| {
                order.subscription_id == subscription_id
                    && order.created_at >= since
                    && order.status != PreOrderStatus::Cancelled
            })
            .fold(QuotaUsage::default(), |usage, order| QuotaUsage {
                pre_orders: usage.pre_orders + 1,
                value_cents: usage.value_cents + order.total_amount_cents,
            })
    }

    fn has_other_active(&self, customer_id: Uuid, subscription_id: Uuid) -> bool {
        self.subscriptions.values().any(|existing| {
            existing.customer_id == customer_id
                && existing.id != subscription_id
                && existing.status == SubscriptionStatus::Active
        })
    }
}

/// key: subscription-store-memory
/// Every operation runs under one mutex, so each write is trivially atomic.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    state: Mutex<StoreState>,
    lapsed_query_fails: AtomicBool,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.state
            .lock()
            .await
            .customers
            .insert(customer.id, customer);
    }

    pub async fn insert_plan(&self, plan: SubscriptionPlan) {
        self.state.lock().await.plans.insert(plan.id, plan);
    }

    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// While set, loading lapsed deferred cancellations fails.
    pub fn fail_lapsed_query(&self, fail: bool) {
        self.lapsed_query_fails.store(fail, Ordering::SeqCst);
    }

    /// Overwrites a stored pre-order; used to stage states the public API cannot reach directly.
    pub async fn put_pre_order(&self, order: PreOrder) {
        self.state.lock().await.pre_orders.insert(order.id, order);
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn customer(&self, id: Uuid) -> AppResult<Option<Customer>> {
        Ok(self.state.lock().await.customers.get(&id).cloned())
    }

    async fn plan(&self, id: Uuid) -> AppResult<Option<SubscriptionPlan>> {
        Ok(self.state.lock().await.plans.get(&id).cloned())
    }

    async fn list_plans(&self, tier: Option<PlanTier>) -> AppResult<Vec<SubscriptionPlan>> {
        let state = self.state.lock().await;
        let mut plans: Vec<_> = state
            .plans
            .values()
            .filter(|plan| plan.is_active && tier.map_or(true, |tier| plan.tier == tier))
            .cloned()
            .collect();
        plans.sort_by(|a, b| {
            a.price_cents
                .cmp(&b.price_cents)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(plans)
    }

    async fn product(&self, id: Uuid) -> AppResult<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn subscription(&self, id: Uuid) -> AppResult<Option<Subscription>> {
        Ok(self.state.lock().await.subscriptions.get(&id).cloned())
    }

    async fn customer_subscriptions(
        &self,
        customer_id: Uuid,
        status: Option<SubscriptionStatus>,
    ) -> AppResult<Vec<Subscription>> {
        let state = self.state.lock().await;
        let mut subscriptions: Vec<_> = state
            .subscriptions
            .values()
            .filter(|subscription| {
                subscription.customer_id == customer_id
                    && status.map_or(true, |status| subscription.status == status)
            })
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subscriptions)
    }

    async fn active_subscription_for_customer(
        &self,
        customer_id: Uuid,
    ) -> AppResult<Option<Subscription>> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .values()
            .find(|subscription| {
                subscription.customer_id == customer_id
                    && subscription.status == SubscriptionStatus::Active
            })
            .cloned())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if subscription.status == SubscriptionStatus::Active
            && state.has_other_active(subscription.customer_id, subscription.id)
        {
            return Err(AppError::DuplicateActive);
        }
        state
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn transition_subscription(
        &self,
        update: &LifecycleUpdate,
    ) -> AppResult<Option<Subscription>> {
        let mut state = self.state.lock().await;
        let Some(current) = state.subscriptions.get(&update.subscription_id).cloned() else {
            return Ok(None);
        };
        if current.status != update.expected_status {
            return Ok(None);
        }
        if update.status == SubscriptionStatus::Active
            && state.has_other_active(current.customer_id, current.id)
        {
            return Err(AppError::DuplicateActive);
        }

        let mut next = current;
        next.status = update.status;
        next.auto_renew = update.auto_renew;
        next.cancel_at_period_end = update.cancel_at_period_end;
        next.end_date = update.end_date;
        next.cancelled_at = update.cancelled_at;
        next.updated_at = update.updated_at;
        state.subscriptions.insert(next.id, next.clone());
        Ok(Some(next))
    }

    async fn due_subscriptions(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Subscription>> {
        let state = self.state.lock().await;
        let mut due: Vec<_> = state
            .subscriptions
            .values()
            .filter(|subscription| {
                subscription.status == SubscriptionStatus::Active
                    && subscription.auto_renew
                    && subscription.next_billing_date < cutoff
            })
            .cloned()
            .collect();
        due.sort_by_key(|subscription| subscription.next_billing_date);
        Ok(due)
    }

    async fn lapsed_cancellations(&self, now: DateTime<Utc>) -> AppResult<Vec<Subscription>> {
        if self.lapsed_query_fails.load(Ordering::SeqCst) {
            return Err(AppError::Message(
                "lapsed cancellation query unavailable".to_string(),
            ));
        }
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|subscription| {
                subscription.cancel_at_period_end
                    && !subscription.status.is_terminal()
                    && subscription.end_date <= now
            })
            .cloned()
            .collect())
    }

    async fn apply_renewal(&self, renewal: &RenewalUpdate) -> AppResult<Option<Subscription>> {
        let mut state = self.state.lock().await;
        let Some(subscription) = state.subscriptions.get_mut(&renewal.subscription_id) else {
            return Ok(None);
        };
        if subscription.status != SubscriptionStatus::Active
            || !subscription.auto_renew
            || subscription.next_billing_date != renewal.expected_next_billing_date
        {
            return Ok(None);
        }
        subscription.next_billing_date = renewal.next_billing_date;
        subscription.end_date = renewal.end_date;
        subscription.current_month_preorders = 0;
        subscription.current_preorder_value_cents = 0;
        subscription.updated_at = renewal.renewed_at;
        Ok(Some(subscription.clone()))
    }

    async fn pre_order(&self, id: Uuid) -> AppResult<Option<PreOrder>> {
        Ok(self.state.lock().await.pre_orders.get(&id).cloned())
    }

    async fn subscription_pre_orders(
        &self,
        subscription_id: Uuid,
        status: Option<PreOrderStatus>,
    ) -> AppResult<Vec<PreOrder>> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state
            .pre_orders
            .values()
            .filter(|order| {
                order.subscription_id == subscription_id
                    && status.map_or(true, |status| order.status == status)
            })
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }

    async fn quota_usage(
        &self,
        subscription_id: Uuid,
        since: DateTime<Utc>,
    ) -> AppResult<QuotaUsage> {
        Ok(self.state.lock().await.usage(subscription_id, since))
    }

    async fn pre_order_totals(
        &self,
        subscription_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<PreOrderTotals> {
        let state = self.state.lock().await;
        let totals = state
            .pre_orders
            .values()
            .filter(|order| {
                order.subscription_id == subscription_id
                    && since.map_or(true, |since| order.created_at >= since)
            })
            .fold(PreOrderTotals::default(), |totals, order| PreOrderTotals {
                pre_orders: totals.pre_orders + 1,
                value_cents: if order.status == PreOrderStatus::Cancelled {
                    totals.value_cents
                } else {
                    totals.value_cents + order.total_amount_cents
                },
            });
        Ok(totals)
    }

    async fn commit_pre_order(
        &self,
        order: &PreOrder,
        admission: &PreOrderAdmission,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;

        let status = state
            .subscriptions
            .get(&order.subscription_id)
            .map(|subscription| subscription.status)
            .ok_or(AppError::NotFound("subscription"))?;
        if status != SubscriptionStatus::Active {
            return Err(AppError::InvalidState(format!(
                "subscription is {}",
                status.as_str()
            )));
        }

        let usage = state.usage(order.subscription_id, admission.month_start);
        ledger::check(&admission.caps, &usage, order.total_amount_cents)?;

        let product = state
            .products
            .get_mut(&order.product_id)
            .ok_or(AppError::NotFound("product"))?;
        if !product.has_capacity_for(order.quantity) {
            return Err(AppError::CapacityExceeded);
        }
        product.current_pre_orders += order.quantity;
        product.updated_at = order.created_at;

        if let Some(subscription) = state.subscriptions.get_mut(&order.subscription_id) {
            subscription.current_month_preorders += 1;
            subscription.current_preorder_value_cents += order.total_amount_cents;
            subscription.updated_at = order.created_at;
        }
        state.pre_orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn commit_pre_order_cancellation(
        &self,
        pre_order_id: Uuid,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<PreOrder> {
        let mut state = self.state.lock().await;
        let order = state
            .pre_orders
            .get_mut(&pre_order_id)
            .ok_or(AppError::NotFound("pre-order"))?;
        ensure_cancellable(order.status)?;
        order.status = PreOrderStatus::Cancelled;
        order.cancelled_at = Some(cancelled_at);
        order.updated_at = cancelled_at;
        let cancelled = order.clone();

        if let Some(product) = state.products.get_mut(&cancelled.product_id) {
            product.current_pre_orders = (product.current_pre_orders - cancelled.quantity).max(0);
            product.updated_at = cancelled_at;
        }
        if let Some(subscription) = state.subscriptions.get_mut(&cancelled.subscription_id) {
            subscription.current_month_preorders = (subscription.current_month_preorders - 1).max(0);
            subscription.current_preorder_value_cents =
                (subscription.current_preorder_value_cents - cancelled.total_amount_cents).max(0);
            subscription.updated_at = cancelled_at;
        }
        Ok(cancelled)
    }

    async fn transition_pre_order(
        &self,
        pre_order_id: Uuid,
        expected: PreOrderStatus,
        target: PreOrderStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PreOrder>> {
        let mut state = self.state.lock().await;
        let Some(order) = state.pre_orders.get_mut(&pre_order_id) else {
            return Ok(None);
        };
        if order.status != expected {
            return Ok(None);
        }
        order.status = target;
        order.updated_at = now;
        Ok(Some(order.clone()))
    }

    async fn mark_pre_order_charged(
        &self,
        pre_order_id: Uuid,
        receipt_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PreOrder>> {
        let mut state = self.state.lock().await;
        let Some(order) = state.pre_orders.get_mut(&pre_order_id) else {
            return Ok(None);
        };
        if !order.status.is_cancellable()
            || !matches!(
                order.payment_status,
                PaymentStatus::Pending | PaymentStatus::Authorized
            )
        {
            return Ok(None);
        }
        order.payment_status = PaymentStatus::Charged;
        order.payment_receipt_id = Some(receipt_id.to_string());
        order.updated_at = now;
        Ok(Some(order.clone()))
    }

    async fn mark_pre_order_refunded(
        &self,
        pre_order_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PreOrder>> {
        let mut state = self.state.lock().await;
        let Some(order) = state.pre_orders.get_mut(&pre_order_id) else {
            return Ok(None);
        };
        if order.payment_status != PaymentStatus::Charged {
            return Ok(None);
        }
        order.payment_status = PaymentStatus::Refunded;
        order.updated_at = now;
        Ok(Some(order.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCharge {
    pub receipt_id: String,
    pub customer_id: Uuid,
    pub amount_cents: i64,
    pub payment_method_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRefund {
    pub receipt_id: String,
    pub amount_cents: i64,
}

#[derive(Default)]
struct PaymentScript {
    declined_customers: HashSet<Uuid>,
    latency: HashMap<Uuid, Duration>,
    refunds_fail: bool,
    charges: Vec<RecordedCharge>,
    refunds: Vec<RecordedRefund>,
}

#[derive(Default)]
pub struct ScriptedPaymentGateway {
    script: Mutex<PaymentScript>,
    sequence: AtomicU64,
}

impl ScriptedPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn decline_customer(&self, customer_id: Uuid) {
        self.script
            .lock()
            .await
            .declined_customers
            .insert(customer_id);
    }

    pub async fn approve_customer(&self, customer_id: Uuid) {
        self.script
            .lock()
            .await
            .declined_customers
            .remove(&customer_id);
    }

    pub async fn delay_customer(&self, customer_id: Uuid, latency: Duration) {
        self.script
            .lock()
            .await
            .latency
            .insert(customer_id, latency);
    }

    pub async fn fail_refunds(&self, fail: bool) {
        self.script.lock().await.refunds_fail = fail;
    }

    pub async fn charges(&self) -> Vec<RecordedCharge> {
        self.script.lock().await.charges.clone()
    }

    pub async fn refunds(&self) -> Vec<RecordedRefund> {
        self.script.lock().await.refunds.clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<String> {
        let (declined, latency) = {
            let script = self.script.lock().await;
            (
                script.declined_customers.contains(&request.customer_id),
                script.latency.get(&request.customer_id).copied(),
            )
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if declined {
            bail!("card declined for customer {}", request.customer_id);
        }

        let receipt_id = format!("rcpt_{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        self.script.lock().await.charges.push(RecordedCharge {
            receipt_id: receipt_id.clone(),
            customer_id: request.customer_id,
            amount_cents: request.amount_cents,
            payment_method_id: request.payment_method_id.clone(),
        });
        Ok(receipt_id)
    }

    async fn refund(&self, receipt_id: &str, amount_cents: i64) -> Result<()> {
        let mut script = self.script.lock().await;
        if script.refunds_fail {
            bail!("refund rejected for receipt {receipt_id}");
        }
        script.refunds.push(RecordedRefund {
            receipt_id: receipt_id.to_string(),
            amount_cents,
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
    failing: AtomicBool,
    latency: Mutex<HashMap<&'static str, Duration>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every delivery is rejected after being recorded.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Deliveries of `kind` sleep for `latency` before they are recorded.
    pub async fn delay_kind(&self, kind: &'static str, latency: Duration) {
        self.latency.lock().await.insert(kind, latency);
    }

    pub async fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().await.clone()
    }

    pub async fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .await
            .iter()
            .map(NotificationEvent::kind)
            .collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let latency = self.latency.lock().await.get(event.kind()).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.events.lock().await.push(event.clone());
        if self.failing.load(Ordering::SeqCst) {
            bail!("notification endpoint unavailable");
        }
        Ok(())
    }
}

pub fn sample_customer(now: DateTime<Utc>) -> Customer {
    let id = Uuid::new_v4();
    Customer {
        id,
        company_name: format!("Customer {}", id.simple()),
        contact_email: format!("billing+{}@example.com", id.simple()),
        is_active: true,
        created_at: now,
    }
}

/// Monthly basic plan priced at 49.00 with no quota and no discount.
pub fn sample_plan(now: DateTime<Utc>) -> SubscriptionPlan {
    SubscriptionPlan {
        id: Uuid::new_v4(),
        name: "Basic".to_string(),
        tier: PlanTier::Basic,
        description: None,
        price_cents: 4_900,
        billing_frequency: BillingFrequency::Monthly,
        preorder_limit_per_month: 0,
        preorder_value_limit_cents: 0,
        early_access_days: 0,
        discount_percentage: 0.0,
        features: PlanFeatures::default(),
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Eligible, uncapped product priced at 60.00 with an open window.
pub fn sample_product(now: DateTime<Utc>) -> Product {
    Product {
        id: Uuid::new_v4(),
        name: "Widget".to_string(),
        sku: None,
        is_active: true,
        is_pre_order_eligible: true,
        pre_order_start_date: None,
        pre_order_end_date: None,
        expected_availability_date: None,
        pre_order_limit: None,
        current_pre_orders: 0,
        base_price_cents: 6_000,
        pre_order_price_cents: None,
        created_at: now,
        updated_at: now,
    }
}

/// Service wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<InMemorySubscriptionStore>,
    pub payments: Arc<ScriptedPaymentGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: SubscriptionService,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let payments = Arc::new(ScriptedPaymentGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = SubscriptionService::new(
            store.clone(),
            payments.clone(),
            Notifications::new(notifier.clone(), Duration::from_secs(1)),
        );
        Self {
            store,
            payments,
            notifier,
            service,
        }
    }

    pub async fn customer(&self, now: DateTime<Utc>) -> Customer {
        let customer = sample_customer(now);
        self.store.insert_customer(customer.clone()).await;
        customer
    }

    pub async fn plan(
        &self,
        now: DateTime<Utc>,
        configure: impl FnOnce(&mut SubscriptionPlan),
    ) -> SubscriptionPlan {
        let mut plan = sample_plan(now);
        configure(&mut plan);
        self.store.insert_plan(plan.clone()).await;
        plan
    }

    pub async fn product(
        &self,
        now: DateTime<Utc>,
        configure: impl FnOnce(&mut Product),
    ) -> Product {
        let mut product = sample_product(now);
        configure(&mut product);
        self.store.insert_product(product.clone()).await;
        product
    }

    pub async fn subscribe(
        &self,
        customer: &Customer,
        plan: &SubscriptionPlan,
        now: DateTime<Utc>,
    ) -> AppResult<Subscription> {
        self.service
            .create(
                NewSubscription {
                    customer_id: customer.id,
                    plan_id: plan.id,
                    payment_method_id: "pm_card_visa".to_string(),
                    auto_renew: true,
                },
                now,
            )
            .await
    }
}
