pub mod adapters;
pub mod api;
pub mod events;
pub mod ledger;
pub mod locks;
pub mod models;
pub mod postgres;
pub mod preorders;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod testing;

pub use adapters::{
    sign_payload, ChargeRequest, HttpPaymentGateway, LogNotifier, NotificationSender,
    PaymentGateway, QueuedNotifier, StubPaymentGateway, WebhookNotifier,
};
pub use events::{NotificationEvent, Notifications};
pub use ledger::{OrderPricing, QuotaCaps, QuotaUsage};
pub use locks::AggregateLocks;
pub use models::{
    BillingFrequency, Customer, PaymentStatus, PlanFeatures, PlanTier, PreOrder, PreOrderStatus,
    Product, Subscription, SubscriptionAnalytics, SubscriptionPlan, SubscriptionStatus,
    SubscriptionUsage, UsagePercentage,
};
pub use postgres::PgSubscriptionStore;
pub use preorders::{CascadeFailure, NewPreOrder, PreOrderCascade, PreOrderService};
pub use scheduler::{
    process_tick as run_billing_cycle, spawn as spawn_billing_scheduler, BillingSweepReport,
    RenewalFailure, SweepOptions,
};
pub use service::{CancellationOutcome, NewSubscription, RenewalOutcome, SubscriptionService};
pub use store::{PreOrderTotals, SubscriptionStore};
