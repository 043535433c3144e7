use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tokio::sync::mpsc::{channel, Sender};
use tracing::{error, info};
use uuid::Uuid;

use super::events::NotificationEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeRequest {
    pub customer_id: Uuid,
    pub amount_cents: i64,
    pub payment_method_id: String,
    pub description: String,
}

/// key: payment-adapter -> gateway integration
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the gateway's receipt id.
    async fn charge(&self, request: &ChargeRequest) -> Result<String>;
    async fn refund(&self, receipt_id: &str, amount_cents: i64) -> Result<()>;
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, event: &NotificationEvent) -> Result<()>;
}

pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    receipt_id: String,
}

impl HttpPaymentGateway {
    /// `timeout` bounds each request; it should stay below the sweep's renewal timeout.
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build payment gateway client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth_token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.auth_token {
            request.bearer_auth(token)
        } else {
            request
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<String> {
        let response = self
            .auth(self.client.post(self.endpoint("charges")))
            .json(request)
            .send()
            .await
            .context("failed to contact payment gateway")?
            .error_for_status()
            .context("payment gateway declined charge")?;

        let parsed: ChargeResponse = response
            .json()
            .await
            .context("failed to decode payment gateway charge response")?;
        Ok(parsed.receipt_id)
    }

    async fn refund(&self, receipt_id: &str, amount_cents: i64) -> Result<()> {
        self.auth(self.client.post(self.endpoint("refunds")))
            .json(&json!({
                "receipt_id": receipt_id,
                "amount_cents": amount_cents,
            }))
            .send()
            .await
            .context("failed to contact payment gateway")?
            .error_for_status()
            .context("payment gateway rejected refund")?;
        Ok(())
    }
}

pub struct StubPaymentGateway;

#[async_trait]
impl PaymentGateway for StubPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<String> {
        let receipt_id = format!("stub_{}", Uuid::new_v4().simple());
        info!(
            customer_id = %request.customer_id,
            amount_cents = request.amount_cents,
            receipt = %receipt_id,
            "stub payment gateway approved charge"
        );
        Ok(receipt_id)
    }

    async fn refund(&self, receipt_id: &str, amount_cents: i64) -> Result<()> {
        info!(receipt = %receipt_id, amount_cents, "stub payment gateway approved refund");
        Ok(())
    }
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build notification client")?;
        Ok(Self {
            client,
            url: url.into(),
            secret,
        })
    }
}

/// `sha256=<hex>` HMAC over the raw body.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|err| anyhow!("invalid notification secret: {err}"))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let body = serde_json::to_vec(event).context("failed to encode notification")?;
        let mut request = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("x-notification-event", event.kind());
        if let Some(secret) = &self.secret {
            request = request.header("x-signature-256", sign_payload(secret, &body)?);
        }
        request
            .body(body)
            .send()
            .await
            .context("failed to contact notification endpoint")?
            .error_for_status()
            .context("notification endpoint rejected delivery")?;
        Ok(())
    }
}

pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        info!(
            event = event.kind(),
            customer_id = %event.customer_id(),
            payload = ?event,
            "lifecycle notification"
        );
        Ok(())
    }
}

/// `send` only enqueues, so callers never wait on the downstream endpoint.
#[derive(Clone)]
pub struct QueuedNotifier {
    sender: Sender<NotificationEvent>,
}

impl QueuedNotifier {
    pub fn start(inner: Arc<dyn NotificationSender>, capacity: usize) -> Self {
        let (tx, mut rx) = channel::<NotificationEvent>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = inner.send(&event).await {
                    error!(
                        ?err,
                        event = event.kind(),
                        customer_id = %event.customer_id(),
                        "queued notification delivery failed",
                    );
                }
            }
        });
        Self { sender: tx }
    }
}

#[async_trait]
impl NotificationSender for QueuedNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        self.sender
            .try_send(event.clone())
            .map_err(|err| anyhow!("failed to enqueue notification: {err}"))
    }
}
