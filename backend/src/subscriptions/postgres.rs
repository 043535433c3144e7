use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::ledger::{self, QuotaUsage};
use super::models::{
    BillingFrequency, Customer, PaymentStatus, PlanFeatures, PlanTier, PreOrder, PreOrderStatus,
    Product, Subscription, SubscriptionPlan, SubscriptionStatus,
};
use super::store::{
    ensure_cancellable, LifecycleUpdate, PreOrderAdmission, PreOrderTotals, RenewalUpdate,
    SubscriptionStore,
};

const UNIQUE_VIOLATION: &str = "23505";

/// key: subscription-store-postgres
/// Row locks are always taken subscription first, then pre-order, then product.
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_customer(&self, customer: &Customer) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, company_name, contact_email, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(customer.id)
        .bind(&customer.company_name)
        .bind(&customer.contact_email)
        .bind(customer.is_active)
        .bind(customer.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_plan(&self, plan: &SubscriptionPlan) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_plans (
                id, name, tier, description, price_cents, billing_frequency,
                preorder_limit_per_month, preorder_value_limit_cents, early_access_days,
                discount_percentage, priority_support, dedicated_account_manager,
                custom_reporting, api_access, is_active, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(plan.tier.as_str())
        .bind(&plan.description)
        .bind(plan.price_cents)
        .bind(plan.billing_frequency.as_str())
        .bind(plan.preorder_limit_per_month)
        .bind(plan.preorder_value_limit_cents)
        .bind(plan.early_access_days)
        .bind(plan.discount_percentage)
        .bind(plan.features.priority_support)
        .bind(plan.features.dedicated_account_manager)
        .bind(plan.features.custom_reporting)
        .bind(plan.features.api_access)
        .bind(plan.is_active)
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_product(&self, product: &Product) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, sku, is_active, is_pre_order_eligible, pre_order_start_date,
                pre_order_end_date, expected_availability_date, pre_order_limit,
                current_pre_orders, base_price_cents, pre_order_price_cents, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.sku)
        .bind(product.is_active)
        .bind(product.is_pre_order_eligible)
        .bind(product.pre_order_start_date)
        .bind(product.pre_order_end_date)
        .bind(product.expected_availability_date)
        .bind(product.pre_order_limit)
        .bind(product.current_pre_orders)
        .bind(product.base_price_cents)
        .bind(product.pre_order_price_cents)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn customer(&self, id: Uuid) -> AppResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    async fn plan(&self, id: Uuid) -> AppResult<Option<SubscriptionPlan>> {
        sqlx::query_as::<_, PlanRow>("SELECT * FROM subscription_plans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(SubscriptionPlan::try_from)
            .transpose()
    }

    async fn list_plans(&self, tier: Option<PlanTier>) -> AppResult<Vec<SubscriptionPlan>> {
        sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT * FROM subscription_plans
            WHERE is_active AND ($1::TEXT IS NULL OR tier = $1)
            ORDER BY price_cents, name
            "#,
        )
        .bind(tier.map(|tier| tier.as_str()))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(SubscriptionPlan::try_from)
        .collect()
    }

    async fn product(&self, id: Uuid) -> AppResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    async fn subscription(&self, id: Uuid) -> AppResult<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn customer_subscriptions(
        &self,
        customer_id: Uuid,
        status: Option<SubscriptionStatus>,
    ) -> AppResult<Vec<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT * FROM subscriptions
            WHERE customer_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(customer_id)
        .bind(status.map(|status| status.as_str()))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Subscription::try_from)
        .collect()
    }

    async fn active_subscription_for_customer(
        &self,
        customer_id: Uuid,
    ) -> AppResult<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE customer_id = $1 AND status = 'active' LIMIT 1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Subscription::try_from)
        .transpose()
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, customer_id, plan_id, status, start_date, end_date, next_billing_date,
                monthly_preorder_limit, current_month_preorders, total_preorder_value_limit_cents,
                current_preorder_value_cents, payment_method_id, auto_renew, cancel_at_period_end,
                cancelled_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.customer_id)
        .bind(subscription.plan_id)
        .bind(subscription.status.as_str())
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.next_billing_date)
        .bind(subscription.monthly_preorder_limit)
        .bind(subscription.current_month_preorders)
        .bind(subscription.total_preorder_value_limit_cents)
        .bind(subscription.current_preorder_value_cents)
        .bind(&subscription.payment_method_id)
        .bind(subscription.auto_renew)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.cancelled_at)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(duplicate_active_or_db)?;
        Ok(())
    }

    async fn transition_subscription(
        &self,
        update: &LifecycleUpdate,
    ) -> AppResult<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(
            r#"
            UPDATE subscriptions
            SET status = $3,
                auto_renew = $4,
                cancel_at_period_end = $5,
                end_date = $6,
                cancelled_at = $7,
                updated_at = $8
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(update.subscription_id)
        .bind(update.expected_status.as_str())
        .bind(update.status.as_str())
        .bind(update.auto_renew)
        .bind(update.cancel_at_period_end)
        .bind(update.end_date)
        .bind(update.cancelled_at)
        .bind(update.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(duplicate_active_or_db)?
        .map(Subscription::try_from)
        .transpose()
    }

    async fn due_subscriptions(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT * FROM subscriptions
            WHERE status = 'active' AND auto_renew AND next_billing_date < $1
            ORDER BY next_billing_date
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Subscription::try_from)
        .collect()
    }

    async fn lapsed_cancellations(&self, now: DateTime<Utc>) -> AppResult<Vec<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT * FROM subscriptions
            WHERE cancel_at_period_end
              AND status IN ('active', 'paused')
              AND end_date <= $1
            ORDER BY end_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Subscription::try_from)
        .collect()
    }

    async fn apply_renewal(&self, renewal: &RenewalUpdate) -> AppResult<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(
            r#"
            UPDATE subscriptions
            SET next_billing_date = $3,
                end_date = $4,
                current_month_preorders = 0,
                current_preorder_value_cents = 0,
                updated_at = $5
            WHERE id = $1
              AND next_billing_date = $2
              AND status = 'active'
              AND auto_renew
            RETURNING *
            "#,
        )
        .bind(renewal.subscription_id)
        .bind(renewal.expected_next_billing_date)
        .bind(renewal.next_billing_date)
        .bind(renewal.end_date)
        .bind(renewal.renewed_at)
        .fetch_optional(&self.pool)
        .await?
        .map(Subscription::try_from)
        .transpose()
    }

    async fn pre_order(&self, id: Uuid) -> AppResult<Option<PreOrder>> {
        sqlx::query_as::<_, PreOrderRow>("SELECT * FROM pre_orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(PreOrder::try_from)
            .transpose()
    }

    async fn subscription_pre_orders(
        &self,
        subscription_id: Uuid,
        status: Option<PreOrderStatus>,
    ) -> AppResult<Vec<PreOrder>> {
        sqlx::query_as::<_, PreOrderRow>(
            r#"
            SELECT * FROM pre_orders
            WHERE subscription_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at
            "#,
        )
        .bind(subscription_id)
        .bind(status.map(|status| status.as_str()))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PreOrder::try_from)
        .collect()
    }

    async fn quota_usage(
        &self,
        subscription_id: Uuid,
        since: DateTime<Utc>,
    ) -> AppResult<QuotaUsage> {
        Ok(fetch_usage(&self.pool, subscription_id, since).await?)
    }

    async fn pre_order_totals(
        &self,
        subscription_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<PreOrderTotals> {
        let row = sqlx::query_as::<_, TotalsRow>(
            r#"
            SELECT
                COUNT(*) AS pre_orders,
                COALESCE(SUM(total_amount_cents) FILTER (WHERE status <> 'cancelled'), 0)::BIGINT
                    AS value_cents
            FROM pre_orders
            WHERE subscription_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2)
            "#,
        )
        .bind(subscription_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(PreOrderTotals {
            pre_orders: row.pre_orders,
            value_cents: row.value_cents,
        })
    }

    async fn commit_pre_order(
        &self,
        order: &PreOrder,
        admission: &PreOrderAdmission,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM subscriptions WHERE id = $1 FOR UPDATE")
                .bind(order.subscription_id)
                .fetch_optional(&mut *tx)
                .await?;
        let status = status.ok_or(AppError::NotFound("subscription"))?;
        if status != SubscriptionStatus::Active.as_str() {
            return Err(AppError::InvalidState(format!("subscription is {status}")));
        }

        let usage = fetch_usage(&mut *tx, order.subscription_id, admission.month_start).await?;
        ledger::check(&admission.caps, &usage, order.total_amount_cents)?;

        let reserved = sqlx::query(
            r#"
            UPDATE products
            SET current_pre_orders = current_pre_orders + $2,
                updated_at = $3
            WHERE id = $1
              AND (pre_order_limit IS NULL OR current_pre_orders + $2 <= pre_order_limit)
            "#,
        )
        .bind(order.product_id)
        .bind(order.quantity)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;
        if reserved.rows_affected() == 0 {
            return Err(AppError::CapacityExceeded);
        }

        sqlx::query(
            r#"
            INSERT INTO pre_orders (
                id, subscription_id, customer_id, product_id, product_variant_id, quantity,
                unit_price_cents, discount_applied_cents, total_amount_cents, status,
                payment_status, payment_receipt_id, priority_level, expected_availability_date,
                pre_order_deadline, cancelled_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(order.id)
        .bind(order.subscription_id)
        .bind(order.customer_id)
        .bind(order.product_id)
        .bind(order.product_variant_id)
        .bind(order.quantity)
        .bind(order.unit_price_cents)
        .bind(order.discount_applied_cents)
        .bind(order.total_amount_cents)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.payment_receipt_id)
        .bind(order.priority_level)
        .bind(order.expected_availability_date)
        .bind(order.pre_order_deadline)
        .bind(order.cancelled_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET current_month_preorders = current_month_preorders + 1,
                current_preorder_value_cents = current_preorder_value_cents + $2,
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(order.subscription_id)
        .bind(order.total_amount_cents)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn commit_pre_order_cancellation(
        &self,
        pre_order_id: Uuid,
        cancelled_at: DateTime<Utc>,
    ) -> AppResult<PreOrder> {
        let mut tx = self.pool.begin().await?;

        let subscription_id: Option<Uuid> =
            sqlx::query_scalar("SELECT subscription_id FROM pre_orders WHERE id = $1")
                .bind(pre_order_id)
                .fetch_optional(&mut *tx)
                .await?;
        let subscription_id = subscription_id.ok_or(AppError::NotFound("pre-order"))?;

        sqlx::query("SELECT id FROM subscriptions WHERE id = $1 FOR UPDATE")
            .bind(subscription_id)
            .execute(&mut *tx)
            .await?;

        let current = sqlx::query_as::<_, PreOrderRow>(
            "SELECT * FROM pre_orders WHERE id = $1 FOR UPDATE",
        )
        .bind(pre_order_id)
        .fetch_one(&mut *tx)
        .await?;
        ensure_cancellable(PreOrder::try_from(current)?.status)?;

        let cancelled = sqlx::query_as::<_, PreOrderRow>(
            r#"
            UPDATE pre_orders
            SET status = 'cancelled', cancelled_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(pre_order_id)
        .bind(cancelled_at)
        .fetch_one(&mut *tx)
        .await?;
        let cancelled = PreOrder::try_from(cancelled)?;

        sqlx::query(
            r#"
            UPDATE products
            SET current_pre_orders = GREATEST(current_pre_orders - $2, 0),
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(cancelled.product_id)
        .bind(cancelled.quantity)
        .bind(cancelled_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET current_month_preorders = GREATEST(current_month_preorders - 1, 0),
                current_preorder_value_cents = GREATEST(current_preorder_value_cents - $2, 0),
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(cancelled.total_amount_cents)
        .bind(cancelled_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(cancelled)
    }

    async fn transition_pre_order(
        &self,
        pre_order_id: Uuid,
        expected: PreOrderStatus,
        target: PreOrderStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PreOrder>> {
        sqlx::query_as::<_, PreOrderRow>(
            r#"
            UPDATE pre_orders
            SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(pre_order_id)
        .bind(expected.as_str())
        .bind(target.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .map(PreOrder::try_from)
        .transpose()
    }

    async fn mark_pre_order_charged(
        &self,
        pre_order_id: Uuid,
        receipt_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PreOrder>> {
        sqlx::query_as::<_, PreOrderRow>(
            r#"
            UPDATE pre_orders
            SET payment_status = 'charged', payment_receipt_id = $2, updated_at = $3
            WHERE id = $1
              AND status IN ('pending', 'confirmed')
              AND payment_status IN ('pending', 'authorized')
            RETURNING *
            "#,
        )
        .bind(pre_order_id)
        .bind(receipt_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .map(PreOrder::try_from)
        .transpose()
    }

    async fn mark_pre_order_refunded(
        &self,
        pre_order_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PreOrder>> {
        sqlx::query_as::<_, PreOrderRow>(
            r#"
            UPDATE pre_orders
            SET payment_status = 'refunded', updated_at = $2
            WHERE id = $1 AND payment_status = 'charged'
            RETURNING *
            "#,
        )
        .bind(pre_order_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .map(PreOrder::try_from)
        .transpose()
    }
}

async fn fetch_usage<'e, E>(
    executor: E,
    subscription_id: Uuid,
    since: DateTime<Utc>,
) -> Result<QuotaUsage, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, TotalsRow>(
        r#"
        SELECT
            COUNT(*) AS pre_orders,
            COALESCE(SUM(total_amount_cents), 0)::BIGINT AS value_cents
        FROM pre_orders
        WHERE subscription_id = $1 AND created_at >= $2 AND status <> 'cancelled'
        "#,
    )
    .bind(subscription_id)
    .bind(since)
    .fetch_one(executor)
    .await?;

    Ok(QuotaUsage {
        pre_orders: row.pre_orders,
        value_cents: row.value_cents,
    })
}

fn duplicate_active_or_db(err: sqlx::Error) -> AppError {
    let duplicate = matches!(
        &err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    );
    if duplicate {
        AppError::DuplicateActive
    } else {
        AppError::Db(err)
    }
}

fn unrecognised(field: &str, value: &str) -> AppError {
    AppError::Message(format!("unrecognised {field} `{value}` in database"))
}

#[derive(Debug, FromRow)]
struct TotalsRow {
    pre_orders: i64,
    value_cents: i64,
}

#[derive(Debug, FromRow)]
struct PlanRow {
    id: Uuid,
    name: String,
    tier: String,
    description: Option<String>,
    price_cents: i64,
    billing_frequency: String,
    preorder_limit_per_month: i32,
    preorder_value_limit_cents: i64,
    early_access_days: i32,
    discount_percentage: f64,
    priority_support: bool,
    dedicated_account_manager: bool,
    custom_reporting: bool,
    api_access: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for SubscriptionPlan {
    type Error = AppError;

    fn try_from(row: PlanRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            tier: PlanTier::parse(&row.tier).ok_or_else(|| unrecognised("plan tier", &row.tier))?,
            billing_frequency: BillingFrequency::parse(&row.billing_frequency)
                .ok_or_else(|| unrecognised("billing frequency", &row.billing_frequency))?,
            name: row.name,
            description: row.description,
            price_cents: row.price_cents,
            preorder_limit_per_month: row.preorder_limit_per_month,
            preorder_value_limit_cents: row.preorder_value_limit_cents,
            early_access_days: row.early_access_days,
            discount_percentage: row.discount_percentage,
            features: PlanFeatures {
                priority_support: row.priority_support,
                dedicated_account_manager: row.dedicated_account_manager,
                custom_reporting: row.custom_reporting,
                api_access: row.api_access,
            },
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: Uuid,
    customer_id: Uuid,
    plan_id: Uuid,
    status: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    next_billing_date: DateTime<Utc>,
    monthly_preorder_limit: i32,
    current_month_preorders: i32,
    total_preorder_value_limit_cents: i64,
    current_preorder_value_cents: i64,
    payment_method_id: String,
    auto_renew: bool,
    cancel_at_period_end: bool,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = AppError;

    fn try_from(row: SubscriptionRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            customer_id: row.customer_id,
            plan_id: row.plan_id,
            status: SubscriptionStatus::parse(&row.status)
                .ok_or_else(|| unrecognised("subscription status", &row.status))?,
            start_date: row.start_date,
            end_date: row.end_date,
            next_billing_date: row.next_billing_date,
            monthly_preorder_limit: row.monthly_preorder_limit,
            current_month_preorders: row.current_month_preorders,
            total_preorder_value_limit_cents: row.total_preorder_value_limit_cents,
            current_preorder_value_cents: row.current_preorder_value_cents,
            payment_method_id: row.payment_method_id,
            auto_renew: row.auto_renew,
            cancel_at_period_end: row.cancel_at_period_end,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PreOrderRow {
    id: Uuid,
    subscription_id: Uuid,
    customer_id: Uuid,
    product_id: Uuid,
    product_variant_id: Option<Uuid>,
    quantity: i32,
    unit_price_cents: i64,
    discount_applied_cents: i64,
    total_amount_cents: i64,
    status: String,
    payment_status: String,
    payment_receipt_id: Option<String>,
    priority_level: i32,
    expected_availability_date: Option<DateTime<Utc>>,
    pre_order_deadline: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PreOrderRow> for PreOrder {
    type Error = AppError;

    fn try_from(row: PreOrderRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            subscription_id: row.subscription_id,
            customer_id: row.customer_id,
            product_id: row.product_id,
            product_variant_id: row.product_variant_id,
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
            discount_applied_cents: row.discount_applied_cents,
            total_amount_cents: row.total_amount_cents,
            status: PreOrderStatus::parse(&row.status)
                .ok_or_else(|| unrecognised("pre-order status", &row.status))?,
            payment_status: PaymentStatus::parse(&row.payment_status)
                .ok_or_else(|| unrecognised("payment status", &row.payment_status))?,
            payment_receipt_id: row.payment_receipt_id,
            priority_level: row.priority_level,
            expected_availability_date: row.expected_availability_date,
            pre_order_deadline: row.pre_order_deadline,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
