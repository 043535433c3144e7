use axum::{
    routing::{get, post, put},
    Router,
};

use crate::subscriptions::api;

pub fn api_routes() -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/plans", get(api::list_plans))
        .route("/api/plans/:id", get(api::get_plan))
        .route("/api/subscriptions", post(api::create_subscription))
        .route(
            "/api/subscriptions/:id",
            get(api::get_subscription).delete(api::cancel_subscription),
        )
        .route(
            "/api/customers/:id/subscriptions",
            get(api::customer_subscriptions),
        )
        .route("/api/subscriptions/:id/pause", put(api::pause_subscription))
        .route(
            "/api/subscriptions/:id/resume",
            put(api::resume_subscription),
        )
        .route(
            "/api/subscriptions/:id/analytics",
            get(api::subscription_analytics),
        )
        .route(
            "/api/subscriptions/:id/usage",
            get(api::subscription_usage),
        )
        .route(
            "/api/subscriptions/:id/pre-orders",
            get(api::list_pre_orders).post(api::create_pre_order),
        )
        .route(
            "/api/pre-orders/:id",
            get(api::get_pre_order).delete(api::cancel_pre_order),
        )
        .route("/api/pre-orders/:id/status", put(api::advance_pre_order))
        .route("/api/pre-orders/:id/charge", post(api::charge_pre_order))
        .route("/api/billing/cycles", post(api::run_billing_cycle))
}
