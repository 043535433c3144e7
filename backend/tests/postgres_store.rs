use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, DurationRound, Utc};
use preorder_backend::error::{AppError, QuotaKind};
use preorder_backend::subscriptions::testing::{
    sample_customer, sample_plan, sample_product, RecordingNotifier, ScriptedPaymentGateway,
};
use preorder_backend::subscriptions::{
    run_billing_cycle, NewPreOrder, NewSubscription, Notifications, PgSubscriptionStore,
    PlanTier, PreOrderStatus, SubscriptionService, SubscriptionStatus, SubscriptionStore, SweepOptions,
};
use sqlx::PgPool;
use uuid::Uuid;

fn service(store: Arc<PgSubscriptionStore>) -> SubscriptionService {
    SubscriptionService::new(
        store,
        Arc::new(ScriptedPaymentGateway::new()),
        Notifications::new(Arc::new(RecordingNotifier::new()), StdDuration::from_secs(1)),
    )
}

fn subscribe_request(customer_id: Uuid, plan_id: Uuid) -> NewSubscription {
    NewSubscription {
        customer_id,
        plan_id,
        payment_method_id: "pm_card_visa".to_string(),
        auto_renew: true,
    }
}

// Postgres keeps microseconds only.
fn now() -> chrono::DateTime<Utc> {
    Utc::now().duration_trunc(Duration::microseconds(1)).unwrap()
}

// key: subscription-store-postgres-tests -> transactional admission
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn quota_is_enforced_in_the_admission_transaction(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let now = now();
    let store = Arc::new(PgSubscriptionStore::new(pool.clone()));
    let customer = sample_customer(now);
    let mut plan = sample_plan(now);
    plan.preorder_limit_per_month = 2;
    plan.discount_percentage = 15.0;
    let product = sample_product(now);
    store.insert_customer(&customer).await.unwrap();
    store.insert_plan(&plan).await.unwrap();
    store.insert_product(&product).await.unwrap();

    let service = service(store.clone());
    let sub = service
        .create(subscribe_request(customer.id, plan.id), now)
        .await
        .unwrap();

    let first = service
        .pre_orders()
        .create(sub.id, NewPreOrder::new(product.id, 1), now)
        .await
        .unwrap();
    assert_eq!(first.discount_applied_cents, 900);
    assert_eq!(first.total_amount_cents, 5_100);
    service
        .pre_orders()
        .create(sub.id, NewPreOrder::new(product.id, 1), now)
        .await
        .unwrap();
    let third = service
        .pre_orders()
        .create(sub.id, NewPreOrder::new(product.id, 1), now)
        .await;
    assert!(matches!(
        third,
        Err(AppError::QuotaExceeded {
            kind: QuotaKind::Count
        })
    ));

    let stored = store.subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(stored.current_month_preorders, 2);
    assert_eq!(stored.current_preorder_value_cents, 10_200);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn cancellation_releases_counters_and_capacity(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let now = now();
    let store = Arc::new(PgSubscriptionStore::new(pool.clone()));
    let customer = sample_customer(now);
    let plan = sample_plan(now);
    let mut product = sample_product(now);
    product.pre_order_limit = Some(3);
    store.insert_customer(&customer).await.unwrap();
    store.insert_plan(&plan).await.unwrap();
    store.insert_product(&product).await.unwrap();

    let service = service(store.clone());
    let sub = service
        .create(subscribe_request(customer.id, plan.id), now)
        .await
        .unwrap();
    let order = service
        .pre_orders()
        .create(sub.id, NewPreOrder::new(product.id, 3), now)
        .await
        .unwrap();
    assert_eq!(
        store.product(product.id).await.unwrap().unwrap().current_pre_orders,
        3
    );

    let cancelled = service.pre_orders().cancel(order.id, now).await.unwrap();
    assert_eq!(cancelled.status, PreOrderStatus::Cancelled);
    assert_eq!(
        store.product(product.id).await.unwrap().unwrap().current_pre_orders,
        0
    );
    let stored = store.subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(stored.current_month_preorders, 0);
    assert_eq!(stored.current_preorder_value_cents, 0);

    let again = service.pre_orders().cancel(order.id, now).await;
    assert!(matches!(again, Err(AppError::InvalidState(_))));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn second_active_subscription_hits_unique_index(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let now = now();
    let store = Arc::new(PgSubscriptionStore::new(pool.clone()));
    let customer = sample_customer(now);
    let plan = sample_plan(now);
    store.insert_customer(&customer).await.unwrap();
    store.insert_plan(&plan).await.unwrap();

    let service = service(store.clone());
    let sub = service
        .create(subscribe_request(customer.id, plan.id), now)
        .await
        .unwrap();

    let mut duplicate = sub.clone();
    duplicate.id = Uuid::new_v4();
    let inserted = store.insert_subscription(&duplicate).await;
    assert!(matches!(inserted, Err(AppError::DuplicateActive)));

    duplicate.status = SubscriptionStatus::Paused;
    store.insert_subscription(&duplicate).await.unwrap();
    let resumed = service.resume(duplicate.id, now).await;
    assert!(matches!(resumed, Err(AppError::DuplicateActive)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn billing_cycle_renews_due_rows(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let now = now();
    let store = Arc::new(PgSubscriptionStore::new(pool.clone()));
    let customer = sample_customer(now);
    let plan = sample_plan(now);
    let product = sample_product(now);
    store.insert_customer(&customer).await.unwrap();
    store.insert_plan(&plan).await.unwrap();
    store.insert_product(&product).await.unwrap();

    let service = service(store.clone());
    let sub = service
        .create(subscribe_request(customer.id, plan.id), now)
        .await
        .unwrap();
    service
        .pre_orders()
        .create(sub.id, NewPreOrder::new(product.id, 1), now)
        .await
        .unwrap();

    let report = run_billing_cycle(&service, sub.next_billing_date, &SweepOptions::default())
        .await
        .unwrap();
    assert_eq!(report.renewed, vec![sub.id]);

    let renewed = store.subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(renewed.next_billing_date, sub.next_billing_date + Duration::days(30));
    assert_eq!(renewed.current_month_preorders, 0);
    assert_eq!(renewed.current_preorder_value_cents, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn capacity_holds_across_service_instances(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let now = now();
    let store = Arc::new(PgSubscriptionStore::new(pool.clone()));
    let plan = sample_plan(now);
    let mut product = sample_product(now);
    product.pre_order_limit = Some(1);
    store.insert_plan(&plan).await.unwrap();
    store.insert_product(&product).await.unwrap();

    // Separate services share no in-process locks; only the database serialises them.
    let left = service(store.clone());
    let right = service(store.clone());
    let mut subscriptions = Vec::new();
    for svc in [&left, &right] {
        let customer = sample_customer(now);
        store.insert_customer(&customer).await.unwrap();
        subscriptions.push(
            svc.create(subscribe_request(customer.id, plan.id), now)
                .await
                .unwrap(),
        );
    }

    let (a, b) = tokio::join!(
        left.pre_orders()
            .create(subscriptions[0].id, NewPreOrder::new(product.id, 1), now),
        right
            .pre_orders()
            .create(subscriptions[1].id, NewPreOrder::new(product.id, 1), now),
    );
    let admitted = [&a, &b].iter().filter(|result| result.is_ok()).count();
    assert_eq!(admitted, 1);
    assert!([a, b]
        .into_iter()
        .any(|result| matches!(result, Err(AppError::CapacityExceeded))));
    assert_eq!(
        store.product(product.id).await.unwrap().unwrap().current_pre_orders,
        1
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn migrations_seed_the_plan_catalogue(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = PgSubscriptionStore::new(pool.clone());

    let plans = store.list_plans(None).await.unwrap();
    assert_eq!(plans.len(), 9);
    for tier in [PlanTier::Basic, PlanTier::Premium, PlanTier::Enterprise] {
        assert_eq!(store.list_plans(Some(tier)).await.unwrap().len(), 3);
    }

    let basic_monthly = store
        .plan(Uuid::parse_str("6f1c0a4e-0000-4000-8000-000000000101").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(basic_monthly.price_cents, 2_999);
    assert_eq!(basic_monthly.preorder_limit_per_month, 10);
    let enterprise = store
        .plan(Uuid::parse_str("6f1c0a4e-0000-4000-8000-000000000303").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(enterprise.preorder_limit_per_month, 0);
    assert!(enterprise.features.dedicated_account_manager);
}
