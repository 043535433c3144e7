use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use preorder_backend::config;
use preorder_backend::routes::api_routes;
use preorder_backend::subscriptions::{
    spawn_billing_scheduler, HttpPaymentGateway, LogNotifier, NotificationSender, Notifications,
    PaymentGateway, PgSubscriptionStore, QueuedNotifier, StubPaymentGateway, SubscriptionService,
    SweepOptions, WebhookNotifier,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

const NOTIFICATION_QUEUE_CAPACITY: usize = 256;

async fn root() -> &'static str {
    "Pre-order subscription API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let sweep_options = SweepOptions::from_env();
    let payments: Arc<dyn PaymentGateway> = match config::PAYMENT_GATEWAY_URL.as_deref() {
        Some(url) => Arc::new(HttpPaymentGateway::new(
            url,
            config::PAYMENT_GATEWAY_TOKEN.clone(),
            sweep_options.payment_timeout(Duration::from_secs(
                *config::PAYMENT_GATEWAY_TIMEOUT_SECS,
            )),
        )?),
        None => {
            tracing::warn!("PAYMENT_GATEWAY_URL not set; every charge will be approved by the stub gateway");
            Arc::new(StubPaymentGateway)
        }
    };

    let sender: Arc<dyn NotificationSender> = match config::NOTIFICATION_WEBHOOK_URL.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(
            url,
            config::NOTIFICATION_WEBHOOK_SECRET.clone(),
        )?),
        None => Arc::new(LogNotifier),
    };
    let notifications = Notifications::new(
        Arc::new(QueuedNotifier::start(sender, NOTIFICATION_QUEUE_CAPACITY)),
        Duration::from_secs(*config::NOTIFICATION_TIMEOUT_SECS),
    );

    let store = Arc::new(PgSubscriptionStore::new(pool.clone()));
    let service = SubscriptionService::new(store, payments, notifications);
    spawn_billing_scheduler(service.clone());

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(service))
        .layer(Extension(sweep_options));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
