use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use preorder_backend::subscriptions::testing::RecordingNotifier;
use preorder_backend::subscriptions::{
    sign_payload, ChargeRequest, HttpPaymentGateway, NotificationEvent, NotificationSender,
    Notifications, PaymentGateway, QueuedNotifier, WebhookNotifier,
};
use serde_json::json;
use uuid::Uuid;

fn billing_failed() -> NotificationEvent {
    NotificationEvent::BillingFailed {
        customer_id: Uuid::new_v4(),
        subscription_id: Uuid::new_v4(),
        reason: "card declined".to_string(),
    }
}

// key: collaborator-adapter-tests -> http gateway and webhook delivery
#[tokio::test]
async fn http_gateway_charges_and_refunds() {
    let server = MockServer::start_async().await;
    let customer_id = Uuid::new_v4();

    let charge_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/charges")
            .header("authorization", "Bearer gateway-token")
            .json_body(json!({
                "customer_id": customer_id,
                "amount_cents": 4_900,
                "payment_method_id": "pm_card_visa",
                "description": "Subscription to Basic",
            }));
        then.status(200).json_body(json!({ "receipt_id": "rcpt_42" }));
    });
    let refund_mock = server.mock(|when, then| {
        when.method(POST).path("/refunds").json_body(json!({
            "receipt_id": "rcpt_42",
            "amount_cents": 4_900,
        }));
        then.status(200);
    });

    let gateway = HttpPaymentGateway::new(
        server.base_url(),
        Some("gateway-token".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    let receipt = gateway
        .charge(&ChargeRequest {
            customer_id,
            amount_cents: 4_900,
            payment_method_id: "pm_card_visa".to_string(),
            description: "Subscription to Basic".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(receipt, "rcpt_42");
    gateway.refund(&receipt, 4_900).await.unwrap();

    charge_mock.assert();
    refund_mock.assert();
}

#[tokio::test]
async fn http_gateway_treats_non_success_as_failure() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/charges");
        then.status(402).body("insufficient funds");
    });
    server.mock(|when, then| {
        when.method(POST).path("/refunds");
        then.status(500);
    });

    let gateway = HttpPaymentGateway::new(
        format!("{}/", server.base_url()),
        None,
        Duration::from_secs(5),
    )
    .unwrap();
    let charge = gateway
        .charge(&ChargeRequest {
            customer_id: Uuid::new_v4(),
            amount_cents: 100,
            payment_method_id: "pm_card_chargeDeclined".to_string(),
            description: "Pre-order".to_string(),
        })
        .await;
    assert!(charge.is_err());
    assert!(gateway.refund("rcpt_1", 100).await.is_err());
}

#[tokio::test]
async fn http_gateway_gives_up_after_its_timeout() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/charges");
        then.status(200)
            .delay(Duration::from_millis(500))
            .json_body(json!({ "receipt_id": "rcpt_late" }));
    });

    let gateway =
        HttpPaymentGateway::new(server.base_url(), None, Duration::from_millis(100)).unwrap();
    let started = std::time::Instant::now();
    let charge = gateway
        .charge(&ChargeRequest {
            customer_id: Uuid::new_v4(),
            amount_cents: 4_900,
            payment_method_id: "pm_card_visa".to_string(),
            description: "Renewal".to_string(),
        })
        .await;
    assert!(charge.is_err());
    assert!(started.elapsed() < Duration::from_millis(450));
}

#[tokio::test]
async fn webhook_deliveries_are_signed() {
    let server = MockServer::start_async().await;
    let event = billing_failed();
    let body = serde_json::to_vec(&event).unwrap();
    let signature = sign_payload("webhook-secret", &body).unwrap();
    assert!(signature.starts_with("sha256="));
    assert_eq!(signature.len(), "sha256=".len() + 64);

    let hook = server.mock(|when, then| {
        when.method(POST)
            .path("/hooks/lifecycle")
            .header("x-notification-event", "billing_failed")
            .header("x-signature-256", signature.as_str())
            .json_body_partial(r#"{ "event": "billing_failed", "reason": "card declined" }"#);
        then.status(204);
    });

    let notifier = WebhookNotifier::new(
        server.url("/hooks/lifecycle"),
        Some("webhook-secret".to_string()),
    )
    .unwrap();
    notifier.send(&event).await.unwrap();
    hook.assert();
}

#[tokio::test]
async fn webhook_rejection_surfaces_as_error() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/hooks");
        then.status(503);
    });

    let notifier = WebhookNotifier::new(server.url("/hooks"), None).unwrap();
    assert!(notifier.send(&billing_failed()).await.is_err());
}

struct StalledSender;

#[async_trait]
impl NotificationSender for StalledSender {
    async fn send(&self, _event: &NotificationEvent) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test]
async fn delivery_is_bounded_and_never_fails_the_caller() {
    let notifications = Notifications::new(Arc::new(StalledSender), Duration::from_millis(50));
    let started = std::time::Instant::now();
    notifications.deliver(billing_failed()).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let failing = Arc::new(RecordingNotifier::new());
    failing.set_failing(true);
    Notifications::new(failing.clone(), Duration::from_secs(1))
        .deliver(billing_failed())
        .await;
    assert_eq!(failing.kinds().await, vec!["billing_failed"]);
}

#[tokio::test]
async fn queued_notifier_hands_events_to_the_worker() {
    let recorder = Arc::new(RecordingNotifier::new());
    let queued = QueuedNotifier::start(recorder.clone(), 8);

    queued.send(&billing_failed()).await.unwrap();

    let mut delivered = Vec::new();
    for _ in 0..50 {
        delivered = recorder.kinds().await;
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(delivered, vec!["billing_failed"]);
}
