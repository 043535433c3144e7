use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config;
use crate::error::{AppError, AppResult};

use super::models::billing_cutoff;
use super::service::{RenewalOutcome, SubscriptionService};

#[derive(Debug, Clone, Copy)]
pub struct SweepOptions {
    /// Upper bound on one renewal attempt, charge included.
    pub renewal_timeout: Duration,
    pub concurrency: usize,
}

impl SweepOptions {
    pub fn from_env() -> Self {
        Self {
            renewal_timeout: Duration::from_secs(*config::BILLING_RENEWAL_TIMEOUT_SECS),
            concurrency: *config::BILLING_RENEWAL_CONCURRENCY,
        }
    }

    /// Gateway request timeout, capped at three quarters of the renewal timeout.
    pub fn payment_timeout(&self, configured: Duration) -> Duration {
        configured.min(self.renewal_timeout * 3 / 4)
    }
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            renewal_timeout: Duration::from_secs(30),
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenewalFailure {
    pub subscription_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BillingSweepReport {
    pub renewed: Vec<Uuid>,
    pub failed: Vec<RenewalFailure>,
    pub superseded: Vec<Uuid>,
    pub finalized_cancellations: Vec<Uuid>,
}

/// key: billing-cycle-scheduler -> periodic renewal sweep
pub fn spawn(service: SubscriptionService) {
    let interval = Duration::from_secs((*config::BILLING_CYCLE_INTERVAL_SECS).max(1));
    let options = SweepOptions::from_env();

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            match process_tick(&service, now, &options).await {
                Ok(report) => info!(
                    renewed = report.renewed.len(),
                    failed = report.failed.len(),
                    superseded = report.superseded.len(),
                    finalized_cancellations = report.finalized_cancellations.len(),
                    "billing cycle completed"
                ),
                Err(err) => warn!(?err, "billing cycle tick failed"),
            }
            service.locks().prune();
        }
    });
}

/// Per-subscription failures are reported and never abort the sweep; only failing to load
/// the due subscriptions is an error. The timeout covers the charge and the commit of each
/// renewal, never the notification that follows it.
pub async fn process_tick(
    service: &SubscriptionService,
    now: DateTime<Utc>,
    options: &SweepOptions,
) -> AppResult<BillingSweepReport> {
    let mut report = BillingSweepReport {
        finalized_cancellations: finalize_lapsed(service, now, options).await,
        ..BillingSweepReport::default()
    };

    let due = service
        .store()
        .due_subscriptions(billing_cutoff(now))
        .await?;
    info!(due = due.len(), "billing cycle started");

    let renewal_timeout = options.renewal_timeout;
    let attempts: Vec<_> = stream::iter(due)
        .map(|subscription| async move {
            let outcome = time::timeout(
                renewal_timeout,
                service.charge_renewal(subscription.id, now),
            )
            .await;
            if let Ok(Ok(renewed)) = &outcome {
                service.announce_renewal(renewed).await;
            }
            (subscription, outcome)
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    for (subscription, outcome) in attempts {
        let error = match outcome {
            Ok(Ok(RenewalOutcome::Renewed { .. })) => {
                report.renewed.push(subscription.id);
                continue;
            }
            Ok(Ok(RenewalOutcome::Superseded)) => {
                report.superseded.push(subscription.id);
                continue;
            }
            Ok(Err(err)) => err,
            Err(_) => timed_out(renewal_timeout),
        };

        let reason = error.to_string();
        warn!(?error, subscription = %subscription.id, "subscription renewal failed");
        service.report_billing_failure(&subscription, &reason).await;
        report.failed.push(RenewalFailure {
            subscription_id: subscription.id,
            reason,
        });
    }

    Ok(report)
}

/// Finalizes lapsed deferred cancellations, each under the renewal timeout. Failures are
/// logged and left for the next tick.
async fn finalize_lapsed(
    service: &SubscriptionService,
    now: DateTime<Utc>,
    options: &SweepOptions,
) -> Vec<Uuid> {
    let lapsed = match service.lapsed_cancellations(now).await {
        Ok(lapsed) => lapsed,
        Err(err) => {
            warn!(?err, "failed to load lapsed cancellations; continuing with renewals");
            return Vec::new();
        }
    };

    let mut finalized = Vec::with_capacity(lapsed.len());
    for subscription in lapsed {
        let outcome = time::timeout(
            options.renewal_timeout,
            service.finalize_cancellation(subscription.id, now),
        )
        .await;
        match outcome {
            Ok(Ok(outcome)) => finalized.push(outcome.subscription.id),
            Ok(Err(err)) => warn!(
                ?err,
                subscription = %subscription.id,
                "failed to finalize deferred cancellation"
            ),
            Err(_) => warn!(
                error = %timed_out(options.renewal_timeout),
                subscription = %subscription.id,
                "deferred cancellation did not finish"
            ),
        }
    }
    finalized
}

fn timed_out(limit: Duration) -> AppError {
    AppError::Timeout(format!("did not finish within {}ms", limit.as_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_timeout_stays_below_renewal_timeout() {
        let options = SweepOptions {
            renewal_timeout: Duration::from_secs(30),
            concurrency: 1,
        };
        assert_eq!(
            options.payment_timeout(Duration::from_secs(10)),
            Duration::from_secs(10)
        );
        assert_eq!(
            options.payment_timeout(Duration::from_secs(30)),
            Duration::from_millis(22_500)
        );
    }
}
