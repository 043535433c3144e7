use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::{Extension, Router};
use chrono::Utc;
use preorder_backend::routes::api_routes;
use preorder_backend::subscriptions::testing::Harness;
use preorder_backend::subscriptions::{NewPreOrder, PlanTier, SweepOptions};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

fn app(harness: &Harness) -> Router {
    api_routes()
        .layer(Extension(harness.service.clone()))
        .layer(Extension(SweepOptions::default()))
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, bytes.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

// key: subscriptions-api-tests -> status codes over the router
#[tokio::test]
async fn subscription_create_and_fetch() {
    let harness = Harness::new();
    let now = Utc::now();
    let customer = harness.customer(now).await;
    let plan = harness.plan(now, |_| {}).await;

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/subscriptions",
        Some(json!({
            "customer_id": customer.id,
            "plan_id": plan.id,
            "payment_method_id": "pm_card_visa",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let created = json_body(&body);
    assert_eq!(created["status"], "active");
    assert_eq!(created["auto_renew"], true);

    let id = created["id"].as_str().unwrap().to_string();
    let (status, body) = send(
        app(&harness),
        Method::GET,
        &format!("/api/subscriptions/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["customer_id"], json!(customer.id));

    let (status, _) = send(
        app(&harness),
        Method::POST,
        "/api/subscriptions",
        Some(json!({
            "customer_id": customer.id,
            "plan_id": plan.id,
            "payment_method_id": "pm_card_visa",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_resources_are_not_found() {
    let harness = Harness::new();
    let (status, _) = send(
        app(&harness),
        Method::GET,
        &format!("/api/subscriptions/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        app(&harness),
        Method::DELETE,
        &format!("/api/pre-orders/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pre_order_rejections_map_to_status_codes() {
    let harness = Harness::new();
    let now = Utc::now();
    let customer = harness.customer(now).await;
    let plan = harness
        .plan(now, |plan| plan.preorder_limit_per_month = 1)
        .await;
    let widget = harness.product(now, |_| {}).await;
    let sub = harness.subscribe(&customer, &plan, now).await.unwrap();
    let uri = format!("/api/subscriptions/{}/pre-orders", sub.id);

    let (status, _) = send(
        app(&harness),
        Method::POST,
        &uri,
        Some(json!({ "product_id": widget.id, "quantity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        app(&harness),
        Method::POST,
        &uri,
        Some(json!({ "product_id": widget.id, "quantity": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order = json_body(&body);
    assert_eq!(order["total_amount_cents"], 12_000);
    assert_eq!(order["priority_level"], 1);

    let (status, body) = send(
        app(&harness),
        Method::POST,
        &uri,
        Some(json!({ "product_id": widget.id, "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(String::from_utf8(body).unwrap().contains("count limit"));

    let (status, body) = send(app(&harness), Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body).as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn plans_can_be_filtered_by_tier() {
    let harness = Harness::new();
    let now = Utc::now();
    harness.plan(now, |_| {}).await;
    let premium = harness
        .plan(now, |plan| {
            plan.name = "Premium".to_string();
            plan.tier = PlanTier::Premium;
        })
        .await;
    harness.plan(now, |plan| plan.is_active = false).await;

    let (status, body) = send(app(&harness), Method::GET, "/api/plans", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body).as_array().unwrap().len(), 2);

    let (status, body) = send(app(&harness), Method::GET, "/api/plans?tier=premium", None).await;
    assert_eq!(status, StatusCode::OK);
    let plans = json_body(&body);
    assert_eq!(plans.as_array().unwrap().len(), 1);
    assert_eq!(plans[0]["id"], json!(premium.id));
}

#[tokio::test]
async fn immediate_cancel_returns_cascade() {
    let harness = Harness::new();
    let now = Utc::now();
    let customer = harness.customer(now).await;
    let plan = harness.plan(now, |_| {}).await;
    let widget = harness.product(now, |_| {}).await;
    let sub = harness.subscribe(&customer, &plan, now).await.unwrap();
    let (status, _) = send(
        app(&harness),
        Method::POST,
        &format!("/api/subscriptions/{}/pre-orders", sub.id),
        Some(json!({ "product_id": widget.id, "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        app(&harness),
        Method::DELETE,
        &format!("/api/subscriptions/{}?immediate=true", sub.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let outcome = json_body(&body);
    assert_eq!(outcome["subscription"]["status"], "cancelled");
    assert_eq!(outcome["pre_orders"]["cancelled"].as_array().unwrap().len(), 1);
    assert!(outcome["pre_orders"]["failed"].as_array().unwrap().is_empty());

    let (status, _) = send(
        app(&harness),
        Method::PUT,
        &format!("/api/subscriptions/{}/pause", sub.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn billing_cycle_endpoint_reports_sweep() {
    let harness = Harness::new();
    let now = Utc::now();
    let customer = harness.customer(now).await;
    let plan = harness.plan(now, |_| {}).await;
    harness.subscribe(&customer, &plan, now).await.unwrap();

    let (status, body) = send(app(&harness), Method::POST, "/api/billing/cycles", None).await;
    assert_eq!(status, StatusCode::OK);
    let report = json_body(&body);
    assert!(report["renewed"].as_array().unwrap().is_empty());
    assert!(report["failed"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn health_reports_service_identity() {
    let harness = Harness::new();
    let (status, body) = send(app(&harness), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let health = json_body(&body);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "preorder-backend");
    assert!(health["timestamp"].is_string());
}

#[tokio::test]
async fn pre_order_can_be_fetched_by_id() {
    let harness = Harness::new();
    let now = Utc::now();
    let customer = harness.customer(now).await;
    let plan = harness.plan(now, |_| {}).await;
    let widget = harness.product(now, |_| {}).await;
    let sub = harness.subscribe(&customer, &plan, now).await.unwrap();
    let order = harness
        .service
        .pre_orders()
        .create(sub.id, NewPreOrder::new(widget.id, 1), now)
        .await
        .unwrap();

    let (status, body) = send(
        app(&harness),
        Method::GET,
        &format!("/api/pre-orders/{}", order.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let fetched = json_body(&body);
    assert_eq!(fetched["id"], json!(order.id));
    assert_eq!(fetched["status"], "pending");

    let (status, _) = send(
        app(&harness),
        Method::GET,
        &format!("/api/pre-orders/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn usage_reports_month_to_date_share_of_limits() {
    let harness = Harness::new();
    let now = Utc::now();
    let customer = harness.customer(now).await;
    let plan = harness
        .plan(now, |plan| plan.preorder_limit_per_month = 4)
        .await;
    let widget = harness.product(now, |_| {}).await;
    let sub = harness.subscribe(&customer, &plan, now).await.unwrap();
    harness
        .service
        .pre_orders()
        .create(sub.id, NewPreOrder::new(widget.id, 1), now)
        .await
        .unwrap();

    let (status, body) = send(
        app(&harness),
        Method::GET,
        &format!("/api/subscriptions/{}/usage", sub.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let usage = json_body(&body);
    assert_eq!(usage["subscription_id"], json!(sub.id));
    assert_eq!(usage["current_month_preorders"], 1);
    assert_eq!(usage["monthly_preorder_limit"], 4);
    assert_eq!(usage["current_preorder_value_cents"], 6_000);
    assert_eq!(usage["total_preorder_value_limit_cents"], 0);
    assert_eq!(usage["usage_percentage"]["orders"], 25.0);
    assert_eq!(usage["usage_percentage"]["value"], 0.0);

    let (status, _) = send(
        app(&harness),
        Method::GET,
        &format!("/api/subscriptions/{}/usage", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
