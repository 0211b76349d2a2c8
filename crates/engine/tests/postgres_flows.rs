//! Checkout and settlement races against PostgreSQL.
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p engine --test postgres_flows -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{LocationId, Money, VariantId};
use domain::{
    GatewayOutcome, IntentStatus, Location, Order, OrderNumber, OrderStatus, PaymentMethod,
    PaymentMethods, PaymentStatus, StockLevel, Variant,
};
use engine::{
    Cart, CartLine, CheckoutRequest, CheckoutService, CheckoutSettings, EngineError,
    GatewayRegistry, InMemoryCartSource, InMemoryGateway, MOCK_GATEWAY, OrderService,
    PaymentService, PaymentSettings, Reaper, ReservationEngine,
};
use sqlx::PgPool;
use store::{PostgresStore, Store, Transaction};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

/// Refuses to cancel orders numbered `SM-LOCKED*`, so one order of a sweep
/// fails while the others go through.
const LOCKED_ORDER_TRIGGER: &str = r#"
CREATE OR REPLACE FUNCTION refuse_locked_order_cancel() RETURNS trigger AS $$
BEGIN
    IF NEW.order_number LIKE 'SM-LOCKED%' AND NEW.status = 'canceled' THEN
        RAISE EXCEPTION 'order % is locked', NEW.order_number;
    END IF;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS refuse_locked_order_cancel ON orders;
CREATE TRIGGER refuse_locked_order_cancel
    BEFORE UPDATE ON orders
    FOR EACH ROW EXECUTE FUNCTION refuse_locked_order_cancel();
"#;

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            for migration in [
                include_str!("../../../migrations/001_create_order_pipeline.sql"),
                include_str!("../../../migrations/002_create_customers.sql"),
                LOCKED_ORDER_TRIGGER,
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE payment_intents, reservations, order_items, orders, customers, \
         stock_levels, stock_items, variants, locations",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

struct Harness {
    store: PostgresStore,
    reservations: ReservationEngine<PostgresStore>,
    carts: InMemoryCartSource,
    gateway: InMemoryGateway,
    payments: Arc<PaymentService<PostgresStore>>,
    orders: OrderService<PostgresStore>,
    variant: VariantId,
}

impl Harness {
    async fn new(available: i64) -> Self {
        let store = get_test_store().await;
        let location = Location {
            id: LocationId::new(),
            name: "Main Shop".to_string(),
            code: "MAIN_SHOP".to_string(),
            is_active: true,
        };
        let variant = Variant {
            id: VariantId::new(),
            product_title: "Rice Cooker".to_string(),
            variant_title: None,
            sku: "RC-1".to_string(),
            price: Money::from_cents(1_250_000),
            is_active: true,
            track_inventory: true,
            allow_backorder: false,
        };
        let mut tx = store.begin().await.unwrap();
        tx.upsert_location(&location).await.unwrap();
        tx.upsert_variant(&variant).await.unwrap();
        let mut level = tx.lock_stock_level(variant.id, location.id).await.unwrap();
        level.adjust(available).unwrap();
        tx.save_stock_level(&level).await.unwrap();
        tx.commit().await.unwrap();

        let reservations = ReservationEngine::resolve(store.clone(), "MAIN_SHOP")
            .await
            .unwrap();
        let gateway = InMemoryGateway::new("pg-secret");
        let payments = PaymentService::new(
            reservations.clone(),
            PaymentMethods::in_person().with(PaymentMethod::redirect(
                "CARD_MOCK",
                "Mock Card",
                MOCK_GATEWAY,
            )),
            GatewayRegistry::new().with(Arc::new(gateway.clone())),
            PaymentSettings::default(),
        );

        Self {
            orders: OrderService::new(reservations.clone()),
            payments: Arc::new(payments),
            reservations,
            carts: InMemoryCartSource::new(),
            gateway,
            store,
            variant: variant.id,
        }
    }

    fn checkout_service(&self) -> CheckoutService<PostgresStore, InMemoryCartSource> {
        CheckoutService::new(
            self.reservations.clone(),
            self.carts.clone(),
            PaymentMethods::in_person(),
            CheckoutSettings::default(),
        )
    }

    fn cart(&self, token: &str, quantity: u32) {
        self.carts.put(Cart {
            token: token.to_string(),
            currency: "LKR".to_string(),
            lines: vec![CartLine {
                variant_id: self.variant,
                quantity,
                unit_price: Money::from_cents(1_250_000),
            }],
        });
    }

    fn request(phone: &str) -> CheckoutRequest {
        CheckoutRequest {
            fulfillment_method: Some("pickup".to_string()),
            guest_name: Some("Dilani Perera".to_string()),
            guest_phone: Some(phone.to_string()),
            ..CheckoutRequest::default()
        }
    }

    async fn place_order(&self, number: &'static str, quantity: u32) -> Order {
        self.cart(number, quantity);
        self.checkout_service()
            .with_number_source(move |_| OrderNumber::new(number))
            .checkout(number, &Self::request("0765554433"))
            .await
            .unwrap()
    }

    async fn start_card(&self, order: &Order) -> String {
        self.payments
            .start(order.number().as_str(), "CARD_MOCK")
            .await
            .unwrap()
            .payment_intent
            .gateway_reference()
            .unwrap()
            .to_string()
    }

    async fn level(&self) -> StockLevel {
        let mut tx = self.store.begin().await.unwrap();
        tx.lock_stock_level(self.variant, self.reservations.main_location())
            .await
            .unwrap()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkouts_never_oversell() {
    let h = Harness::new(5).await;
    let checkout = Arc::new(h.checkout_service());

    let mut handles = Vec::new();
    for i in 0..8 {
        let token = format!("guest-{i}");
        h.cart(&token, 3);
        let checkout = checkout.clone();
        handles.push(tokio::spawn(async move {
            checkout
                .checkout(&token, &Harness::request(&format!("07700000{i:02}")))
                .await
        }));
    }

    let mut placed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => placed += 1,
            Err(EngineError::InsufficientStock { .. }) => rejected += 1,
            Err(other) => panic!("unexpected checkout error: {other}"),
        }
    }
    assert_eq!((placed, rejected), (1, 7));

    let level = h.level().await;
    assert_eq!((level.available, level.reserved), (5, 3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkouts_share_one_customer() {
    let h = Harness::new(10).await;
    let checkout = Arc::new(h.checkout_service());

    let mut handles = Vec::new();
    for i in 0..4 {
        let token = format!("repeat-{i}");
        h.cart(&token, 1);
        let checkout = checkout.clone();
        handles.push(tokio::spawn(async move {
            checkout
                .checkout(&token, &Harness::request("0765554433"))
                .await
                .unwrap()
        }));
    }

    let mut customers = Vec::new();
    for handle in handles {
        customers.push(handle.await.unwrap().customer_id().unwrap());
    }
    customers.sort();
    customers.dedup();
    assert_eq!(customers.len(), 1);
    assert_eq!(h.level().await.reserved, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_webhook_racing_poll_captures_once() {
    let h = Harness::new(10).await;
    let order = h.place_order("SM-RACE-1", 2).await;
    let reference = h.start_card(&order).await;
    h.gateway
        .set_poll_outcome(&reference, GatewayOutcome::Success);
    let payload = h
        .gateway
        .callback(&reference, "success", order.grand_total(), "LKR");

    let payments = h.payments.clone();
    let webhook =
        tokio::spawn(async move { payments.handle_webhook(MOCK_GATEWAY, payload).await });
    let payments = h.payments.clone();
    let poll = tokio::spawn(async move { payments.poll("SM-RACE-1").await });

    let ack = webhook.await.unwrap().unwrap();
    let view = poll.await.unwrap().unwrap();
    let mut messages = vec![ack.message, view.message];
    messages.sort();
    assert_eq!(
        messages,
        vec!["Already processed", "Payment captured and order confirmed"]
    );

    let stored = h.orders.get("SM-RACE-1").await.unwrap();
    assert_eq!(stored.order.payment_status(), PaymentStatus::Paid);
    assert_eq!(stored.order.status(), OrderStatus::Confirmed);
    assert_eq!(stored.payment_intents[0].status(), IntentStatus::Captured);
    let level = h.level().await;
    assert_eq!((level.available, level.reserved), (8, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_webhooks_capture_once() {
    let h = Harness::new(10).await;
    let order = h.place_order("SM-DUP-1", 3).await;
    let reference = h.start_card(&order).await;
    let payload = h
        .gateway
        .callback(&reference, "success", order.grand_total(), "LKR");

    let mut handles = Vec::new();
    for _ in 0..5 {
        let payments = h.payments.clone();
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            payments.handle_webhook(MOCK_GATEWAY, payload).await.unwrap()
        }));
    }

    let mut captured = 0;
    for handle in handles {
        let ack = handle.await.unwrap();
        assert!(ack.ok);
        match ack.message.as_str() {
            "Payment captured and order confirmed" => captured += 1,
            "Already processed" => {}
            other => panic!("unexpected ack: {other}"),
        }
    }
    assert_eq!(captured, 1);

    let level = h.level().await;
    assert_eq!((level.available, level.reserved), (7, 0));
}

#[tokio::test]
async fn test_reaper_skips_order_it_cannot_expire() {
    let h = Harness::new(10).await;
    let locked = h.place_order("SM-LOCKED-1", 2).await;
    let abandoned = h.place_order("SM-ABANDONED-1", 3).await;
    let reaper = Reaper::new(h.reservations.clone(), Duration::minutes(60));

    let expired = reaper
        .sweep_once(Utc::now() + Duration::minutes(61))
        .await
        .unwrap();

    assert_eq!(expired, 1);
    let locked = h.orders.get(locked.number().as_str()).await.unwrap();
    assert_eq!(locked.order.status(), OrderStatus::Pending);
    let abandoned = h.orders.get(abandoned.number().as_str()).await.unwrap();
    assert_eq!(abandoned.order.status(), OrderStatus::Canceled);
    // Only the locked order still holds stock.
    let level = h.level().await;
    assert_eq!((level.available, level.reserved), (10, 2));
}
