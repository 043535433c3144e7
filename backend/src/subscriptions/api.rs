use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppResult;

use super::models::{
    PlanTier, PreOrder, PreOrderStatus, Subscription, SubscriptionAnalytics, SubscriptionPlan,
    SubscriptionStatus, SubscriptionUsage,
};
use super::preorders::NewPreOrder;
use super::scheduler::{self, BillingSweepReport, SweepOptions};
use super::service::{CancellationOutcome, NewSubscription, SubscriptionService};

#[derive(Debug, Default, Deserialize)]
pub struct PlanFilter {
    pub tier: Option<PlanTier>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionFilter {
    pub status: Option<SubscriptionStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PreOrderFilter {
    pub status: Option<PreOrderStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelParams {
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Deserialize)]
pub struct AdvancePreOrderRequest {
    pub status: PreOrderStatus,
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// key: subscriptions-api -> rest endpoints
pub async fn list_plans(
    Extension(service): Extension<SubscriptionService>,
    Query(filter): Query<PlanFilter>,
) -> AppResult<Json<Vec<SubscriptionPlan>>> {
    Ok(Json(service.list_plans(filter.tier).await?))
}

pub async fn get_plan(
    Extension(service): Extension<SubscriptionService>,
    Path(plan_id): Path<Uuid>,
) -> AppResult<Json<SubscriptionPlan>> {
    Ok(Json(service.get_plan(plan_id).await?))
}

pub async fn create_subscription(
    Extension(service): Extension<SubscriptionService>,
    Json(payload): Json<NewSubscription>,
) -> AppResult<(StatusCode, Json<Subscription>)> {
    let subscription = service.create(payload, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn get_subscription(
    Extension(service): Extension<SubscriptionService>,
    Path(subscription_id): Path<Uuid>,
) -> AppResult<Json<Subscription>> {
    Ok(Json(service.get(subscription_id).await?))
}

pub async fn customer_subscriptions(
    Extension(service): Extension<SubscriptionService>,
    Path(customer_id): Path<Uuid>,
    Query(filter): Query<SubscriptionFilter>,
) -> AppResult<Json<Vec<Subscription>>> {
    Ok(Json(
        service
            .customer_subscriptions(customer_id, filter.status)
            .await?,
    ))
}

pub async fn pause_subscription(
    Extension(service): Extension<SubscriptionService>,
    Path(subscription_id): Path<Uuid>,
) -> AppResult<Json<Subscription>> {
    Ok(Json(service.pause(subscription_id, Utc::now()).await?))
}

pub async fn resume_subscription(
    Extension(service): Extension<SubscriptionService>,
    Path(subscription_id): Path<Uuid>,
) -> AppResult<Json<Subscription>> {
    Ok(Json(service.resume(subscription_id, Utc::now()).await?))
}

pub async fn cancel_subscription(
    Extension(service): Extension<SubscriptionService>,
    Path(subscription_id): Path<Uuid>,
    Query(params): Query<CancelParams>,
) -> AppResult<Json<CancellationOutcome>> {
    let outcome = service
        .cancel(subscription_id, params.immediate, Utc::now())
        .await?;
    Ok(Json(outcome))
}

pub async fn subscription_analytics(
    Extension(service): Extension<SubscriptionService>,
    Path(subscription_id): Path<Uuid>,
) -> AppResult<Json<SubscriptionAnalytics>> {
    Ok(Json(service.analytics(subscription_id, Utc::now()).await?))
}

pub async fn subscription_usage(
    Extension(service): Extension<SubscriptionService>,
    Path(subscription_id): Path<Uuid>,
) -> AppResult<Json<SubscriptionUsage>> {
    Ok(Json(service.usage(subscription_id, Utc::now()).await?))
}

pub async fn create_pre_order(
    Extension(service): Extension<SubscriptionService>,
    Path(subscription_id): Path<Uuid>,
    Json(payload): Json<NewPreOrder>,
) -> AppResult<(StatusCode, Json<PreOrder>)> {
    let order = service
        .pre_orders()
        .create(subscription_id, payload, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_pre_orders(
    Extension(service): Extension<SubscriptionService>,
    Path(subscription_id): Path<Uuid>,
    Query(filter): Query<PreOrderFilter>,
) -> AppResult<Json<Vec<PreOrder>>> {
    Ok(Json(
        service
            .pre_orders()
            .list(subscription_id, filter.status)
            .await?,
    ))
}

pub async fn get_pre_order(
    Extension(service): Extension<SubscriptionService>,
    Path(pre_order_id): Path<Uuid>,
) -> AppResult<Json<PreOrder>> {
    Ok(Json(service.pre_orders().get(pre_order_id).await?))
}

pub async fn cancel_pre_order(
    Extension(service): Extension<SubscriptionService>,
    Path(pre_order_id): Path<Uuid>,
) -> AppResult<Json<PreOrder>> {
    Ok(Json(
        service
            .pre_orders()
            .cancel(pre_order_id, Utc::now())
            .await?,
    ))
}

pub async fn advance_pre_order(
    Extension(service): Extension<SubscriptionService>,
    Path(pre_order_id): Path<Uuid>,
    Json(payload): Json<AdvancePreOrderRequest>,
) -> AppResult<Json<PreOrder>> {
    Ok(Json(
        service
            .pre_orders()
            .advance(pre_order_id, payload.status, Utc::now())
            .await?,
    ))
}

pub async fn charge_pre_order(
    Extension(service): Extension<SubscriptionService>,
    Path(pre_order_id): Path<Uuid>,
) -> AppResult<Json<PreOrder>> {
    Ok(Json(
        service
            .pre_orders()
            .charge(pre_order_id, Utc::now())
            .await?,
    ))
}

pub async fn run_billing_cycle(
    Extension(service): Extension<SubscriptionService>,
    Extension(options): Extension<SweepOptions>,
) -> AppResult<Json<BillingSweepReport>> {
    let report = scheduler::process_tick(&service, Utc::now(), &options).await?;
    Ok(Json(report))
}
