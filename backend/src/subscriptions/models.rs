use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Basic,
    Premium,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Basic => "basic",
            PlanTier::Premium => "premium",
            PlanTier::Enterprise => "enterprise",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "basic" => Some(PlanTier::Basic),
            "premium" => Some(PlanTier::Premium),
            "enterprise" => Some(PlanTier::Enterprise),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingFrequency {
    Monthly,
    Quarterly,
    Annually,
}

impl BillingFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingFrequency::Monthly => "monthly",
            BillingFrequency::Quarterly => "quarterly",
            BillingFrequency::Annually => "annually",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "monthly" => Some(BillingFrequency::Monthly),
            "quarterly" => Some(BillingFrequency::Quarterly),
            "annually" => Some(BillingFrequency::Annually),
            _ => None,
        }
    }

    /// Length of one billing period. Not calendar aware: a "month" is always 30 days.
    pub fn period(&self) -> Duration {
        match self {
            BillingFrequency::Monthly => Duration::days(30),
            BillingFrequency::Quarterly => Duration::days(90),
            BillingFrequency::Annually => Duration::days(365),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFeatures {
    pub priority_support: bool,
    pub dedicated_account_manager: bool,
    pub custom_reporting: bool,
    pub api_access: bool,
}

impl Default for PlanFeatures {
    fn default() -> Self {
        Self {
            priority_support: false,
            dedicated_account_manager: false,
            custom_reporting: false,
            api_access: true,
        }
    }
}

/// Plans are read-only here; a subscription snapshots the limits at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub tier: PlanTier,
    pub description: Option<String>,
    pub price_cents: i64,
    pub billing_frequency: BillingFrequency,
    /// 0 = unlimited
    pub preorder_limit_per_month: i32,
    /// 0 = unlimited
    pub preorder_value_limit_cents: i64,
    pub early_access_days: i32,
    pub discount_percentage: f64,
    pub features: PlanFeatures,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SubscriptionStatus::Active),
            "paused" => Some(SubscriptionStatus::Paused),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

/// key: subscription-model -> customer allowance + billing anchor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
    pub monthly_preorder_limit: i32,
    pub current_month_preorders: i32,
    pub total_preorder_value_limit_cents: i64,
    pub current_preorder_value_cents: i64,
    pub payment_method_id: String,
    pub auto_renew: bool,
    /// Set by a deferred cancellation; the billing sweep finalizes it once `end_date` passes.
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && self.auto_renew
            && self.next_billing_date < billing_cutoff(now)
    }
}

/// Anything billed "today" is due: the cutoff is the start of the next UTC day.
pub fn billing_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
        .map(|start| Utc.from_utc_datetime(&start))
        .unwrap_or(now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreOrderStatus {
    Pending,
    Confirmed,
    Processing,
    Fulfilled,
    Cancelled,
}

impl PreOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreOrderStatus::Pending => "pending",
            PreOrderStatus::Confirmed => "confirmed",
            PreOrderStatus::Processing => "processing",
            PreOrderStatus::Fulfilled => "fulfilled",
            PreOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PreOrderStatus::Pending),
            "confirmed" => Some(PreOrderStatus::Confirmed),
            "processing" => Some(PreOrderStatus::Processing),
            "fulfilled" => Some(PreOrderStatus::Fulfilled),
            "cancelled" => Some(PreOrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PreOrderStatus::Fulfilled | PreOrderStatus::Cancelled)
    }

    /// Orders already handed to fulfilment cannot be withdrawn.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, PreOrderStatus::Pending | PreOrderStatus::Confirmed)
    }

    /// Forward-only fulfilment path; cancellation is handled separately.
    pub fn next(&self) -> Option<Self> {
        match self {
            PreOrderStatus::Pending => Some(PreOrderStatus::Confirmed),
            PreOrderStatus::Confirmed => Some(PreOrderStatus::Processing),
            PreOrderStatus::Processing => Some(PreOrderStatus::Fulfilled),
            PreOrderStatus::Fulfilled | PreOrderStatus::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Charged,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Charged => "charged",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "authorized" => Some(PaymentStatus::Authorized),
            "charged" => Some(PaymentStatus::Charged),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

/// Pricing fields are fixed at creation; only status and payment fields change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreOrder {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub product_id: Uuid,
    pub product_variant_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub discount_applied_cents: i64,
    pub total_amount_cents: i64,
    pub status: PreOrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_receipt_id: Option<String>,
    pub priority_level: i32,
    pub expected_availability_date: Option<DateTime<Utc>>,
    pub pre_order_deadline: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub sku: Option<String>,
    pub is_active: bool,
    pub is_pre_order_eligible: bool,
    pub pre_order_start_date: Option<DateTime<Utc>>,
    pub pre_order_end_date: Option<DateTime<Utc>>,
    pub expected_availability_date: Option<DateTime<Utc>>,
    /// `None` = unlimited
    pub pre_order_limit: Option<i32>,
    pub current_pre_orders: i32,
    pub base_price_cents: i64,
    pub pre_order_price_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn unit_price_cents(&self) -> i64 {
        self.pre_order_price_cents.unwrap_or(self.base_price_cents)
    }

    pub fn accepts_pre_orders(&self) -> bool {
        self.is_active && self.is_pre_order_eligible
    }

    pub fn window_open(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.pre_order_start_date {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.pre_order_end_date {
            if now > end {
                return false;
            }
        }
        true
    }

    pub fn has_capacity_for(&self, quantity: i32) -> bool {
        match self.pre_order_limit {
            Some(limit) => i64::from(self.current_pre_orders) + i64::from(quantity) <= i64::from(limit),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub company_name: String,
    pub contact_email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionAnalytics {
    pub subscription_id: Uuid,
    pub total_pre_orders: i64,
    pub total_order_value_cents: i64,
    pub average_order_value_cents: i64,
    pub current_month_orders: i64,
    pub current_month_value_cents: i64,
    pub subscription_start_date: DateTime<Utc>,
    pub subscription_status: SubscriptionStatus,
    pub plan_name: String,
}

/// Share of each monthly cap consumed, in percent. An unlimited cap reports 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsagePercentage {
    pub orders: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionUsage {
    pub subscription_id: Uuid,
    pub current_month_preorders: i64,
    pub monthly_preorder_limit: i32,
    pub current_preorder_value_cents: i64,
    pub total_preorder_value_limit_cents: i64,
    pub usage_percentage: UsagePercentage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn billing_periods_use_fixed_day_counts() {
        assert_eq!(BillingFrequency::Monthly.period(), Duration::days(30));
        assert_eq!(BillingFrequency::Quarterly.period(), Duration::days(90));
        assert_eq!(BillingFrequency::Annually.period(), Duration::days(365));
    }

    #[test]
    fn billing_cutoff_is_start_of_next_utc_day() {
        assert_eq!(billing_cutoff(at(2024, 2, 28, 15)), at(2024, 2, 29, 0));
        assert_eq!(billing_cutoff(at(2024, 12, 31, 0)), at(2025, 1, 1, 0));
    }

    #[test]
    fn pre_order_fulfilment_path_is_forward_only() {
        assert_eq!(PreOrderStatus::Pending.next(), Some(PreOrderStatus::Confirmed));
        assert_eq!(PreOrderStatus::Confirmed.next(), Some(PreOrderStatus::Processing));
        assert_eq!(PreOrderStatus::Processing.next(), Some(PreOrderStatus::Fulfilled));
        assert_eq!(PreOrderStatus::Fulfilled.next(), None);
        assert_eq!(PreOrderStatus::Cancelled.next(), None);
        assert!(!PreOrderStatus::Processing.is_cancellable());
        assert!(!PreOrderStatus::Fulfilled.is_cancellable());
        assert!(PreOrderStatus::Confirmed.is_cancellable());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Paused,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PreOrderStatus::parse("shipped"), None);
        assert_eq!(PaymentStatus::parse("charged"), Some(PaymentStatus::Charged));
    }

    #[test]
    fn product_window_treats_missing_bounds_as_open() {
        let now = at(2024, 5, 1, 12);
        let mut product = Product {
            id: Uuid::new_v4(),
            name: "Widget".to_string(),
            sku: None,
            is_active: true,
            is_pre_order_eligible: true,
            pre_order_start_date: None,
            pre_order_end_date: None,
            expected_availability_date: None,
            pre_order_limit: Some(10),
            current_pre_orders: 8,
            base_price_cents: 1_000,
            pre_order_price_cents: Some(900),
            created_at: now,
            updated_at: now,
        };
        assert!(product.window_open(now));
        assert_eq!(product.unit_price_cents(), 900);
        assert!(product.has_capacity_for(2));
        assert!(!product.has_capacity_for(3));

        product.pre_order_start_date = Some(at(2024, 5, 2, 0));
        assert!(!product.window_open(now));
        product.pre_order_start_date = None;
        product.pre_order_end_date = Some(at(2024, 4, 30, 0));
        assert!(!product.window_open(now));
    }
}
