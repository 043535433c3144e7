use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;

use crate::error::{AppError, AppResult, QuotaKind};

use super::models::{Subscription, UsagePercentage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaCaps {
    /// 0 = unlimited
    pub monthly_preorder_limit: i32,
    /// 0 = unlimited
    pub value_limit_cents: i64,
}

impl From<&Subscription> for QuotaCaps {
    fn from(subscription: &Subscription) -> Self {
        Self {
            monthly_preorder_limit: subscription.monthly_preorder_limit,
            value_limit_cents: subscription.total_preorder_value_limit_cents,
        }
    }
}

/// Non-cancelled pre-orders of one subscription created inside the current quota month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub pre_orders: i64,
    pub value_cents: i64,
}

impl QuotaUsage {
    pub fn percentage_of(&self, caps: &QuotaCaps) -> UsagePercentage {
        fn share(used: i64, limit: i64) -> f64 {
            if limit > 0 {
                used as f64 / limit as f64 * 100.0
            } else {
                0.0
            }
        }
        UsagePercentage {
            orders: share(self.pre_orders, i64::from(caps.monthly_preorder_limit)),
            value: share(self.value_cents, caps.value_limit_cents),
        }
    }
}

/// The per-unit discount is rounded to whole cents once, so the total is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderPricing {
    pub unit_price_cents: i64,
    pub unit_discount_cents: i64,
    pub discount_applied_cents: i64,
    pub total_amount_cents: i64,
}

impl OrderPricing {
    pub fn compute(unit_price_cents: i64, discount_percentage: f64, quantity: i32) -> Self {
        let percentage = discount_percentage.clamp(0.0, 100.0);
        let unit_discount_cents = (unit_price_cents as f64 * percentage / 100.0).round() as i64;
        let quantity = i64::from(quantity);
        Self {
            unit_price_cents,
            unit_discount_cents,
            discount_applied_cents: unit_discount_cents * quantity,
            total_amount_cents: (unit_price_cents - unit_discount_cents) * quantity,
        }
    }
}

/// Quota months are calendar months in UTC, independent of the billing anchor.
pub fn quota_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|first| first.and_hms_opt(0, 0, 0))
        .map(|start| Utc.from_utc_datetime(&start))
        .unwrap_or(now)
}

/// key: quota-ledger-check
/// Pure admission check; callers own the counter updates.
pub fn check(caps: &QuotaCaps, usage: &QuotaUsage, order_total_cents: i64) -> AppResult<()> {
    if caps.monthly_preorder_limit > 0
        && usage.pre_orders >= i64::from(caps.monthly_preorder_limit)
    {
        return Err(AppError::QuotaExceeded {
            kind: QuotaKind::Count,
        });
    }

    if caps.value_limit_cents > 0 && usage.value_cents + order_total_cents > caps.value_limit_cents
    {
        return Err(AppError::QuotaExceeded {
            kind: QuotaKind::Value,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(count: i32, value: i64) -> QuotaCaps {
        QuotaCaps {
            monthly_preorder_limit: count,
            value_limit_cents: value,
        }
    }

    fn usage(pre_orders: i64, value_cents: i64) -> QuotaUsage {
        QuotaUsage {
            pre_orders,
            value_cents,
        }
    }

    fn kind_of(result: AppResult<()>) -> Option<QuotaKind> {
        match result {
            Err(AppError::QuotaExceeded { kind }) => Some(kind),
            _ => None,
        }
    }

    #[test]
    fn zero_limits_are_unlimited() {
        assert!(check(&caps(0, 0), &usage(10_000, i64::MAX / 4), 1_000_000).is_ok());
    }

    #[test]
    fn count_limit_rejects_at_limit() {
        assert!(check(&caps(2, 0), &usage(1, 0), 500).is_ok());
        assert_eq!(
            kind_of(check(&caps(2, 0), &usage(2, 0), 500)),
            Some(QuotaKind::Count)
        );
    }

    #[test]
    fn value_limit_counts_the_candidate_order() {
        assert!(check(&caps(0, 10_000), &usage(1, 6_000), 4_000).is_ok());
        assert_eq!(
            kind_of(check(&caps(0, 10_000), &usage(1, 6_000), 6_000)),
            Some(QuotaKind::Value)
        );
    }

    #[test]
    fn usage_percentage_ignores_unlimited_caps() {
        let shares = usage(5, 250_000).percentage_of(&caps(10, 500_000));
        assert_eq!(shares.orders, 50.0);
        assert_eq!(shares.value, 50.0);

        let unlimited = usage(5, 250_000).percentage_of(&caps(0, 0));
        assert_eq!(unlimited.orders, 0.0);
        assert_eq!(unlimited.value, 0.0);
    }

    #[test]
    fn count_is_checked_before_value() {
        assert_eq!(
            kind_of(check(&caps(1, 100), &usage(1, 100), 100)),
            Some(QuotaKind::Count)
        );
    }

    #[test]
    fn pricing_applies_discount_per_unit() {
        let pricing = OrderPricing::compute(6_000, 0.0, 1);
        assert_eq!(pricing.total_amount_cents, 6_000);
        assert_eq!(pricing.discount_applied_cents, 0);

        let pricing = OrderPricing::compute(1_999, 15.0, 3);
        assert_eq!(pricing.unit_discount_cents, 300);
        assert_eq!(pricing.discount_applied_cents, 900);
        assert_eq!(pricing.total_amount_cents, (1_999 - 300) * 3);
        assert_eq!(
            pricing.total_amount_cents,
            pricing.unit_price_cents * 3 - pricing.discount_applied_cents
        );
    }

    #[test]
    fn quota_month_starts_on_the_first_at_midnight_utc() {
        let now = Utc.with_ymd_and_hms(2024, 7, 19, 17, 45, 12).unwrap();
        assert_eq!(
            quota_month_start(now),
            Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
        );
        let first = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        assert_eq!(quota_month_start(first), first);
    }
}
