//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{LocationId, Money, VariantId};
use domain::{
    Customer, CustomerContact, FulfillmentMethod, LedgerError, Location, NewOrder, Order, OrderItem,
    OrderNumber, OrderStatus, PaymentIntent, PaymentMethod, Reservation, ReservationStatus,
    Variant,
};
use sqlx::PgPool;
use store::{PostgresStore, Store, StoreError, Transaction};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

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

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
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

struct Seed {
    location: Location,
    variant: Variant,
}

async fn seed(store: &PostgresStore, available: i64) -> Seed {
    let location = Location {
        id: LocationId::new(),
        name: "Main Shop".to_string(),
        code: "MAIN_SHOP".to_string(),
        is_active: true,
    };
    let variant = Variant {
        id: VariantId::new(),
        product_title: "Clay Pot".to_string(),
        variant_title: Some("Large".to_string()),
        sku: "POT-L".to_string(),
        price: Money::from_cents(2_500),
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

    Seed { location, variant }
}

fn make_order(number: &str, variant: &Variant, quantity: u32) -> Order {
    Order::place(new_order(number, variant, quantity), Utc::now()).unwrap()
}

fn new_order(number: &str, variant: &Variant, quantity: u32) -> NewOrder {
    NewOrder {
        number: OrderNumber::new(number),
        customer_id: None,
        customer: CustomerContact {
            name: "Kamal Silva".to_string(),
            phone: "0711111111".to_string(),
            email: Some("kamal@example.com".to_string()),
        },
        currency: "LKR".to_string(),
        fulfillment: FulfillmentMethod::Delivery,
        items: vec![OrderItem {
            variant_id: variant.id,
            product_title: variant.product_title.clone(),
            variant_title: variant.variant_title.clone(),
            sku: variant.sku.clone(),
            unit_price: variant.price,
            quantity,
        }],
        discount_total: Money::zero(),
        shipping_total: Money::from_cents(30_000),
        tax_total: Money::zero(),
        shipping_address: Some(serde_json::json!({"line1": "1 Lake Rd", "city": "Kandy"})),
        billing_address: None,
        notes: Some("Leave at the gate".to_string()),
    }
}

#[tokio::test]
async fn test_order_roundtrip_with_items() {
    let store = get_test_store().await;
    let seed = seed(&store, 10).await;
    let order = make_order("SM-RT-1", &seed.variant, 2);

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let loaded = tx.order_by_number("SM-RT-1").await.unwrap().unwrap();
    assert_eq!(loaded.id(), order.id());
    assert_eq!(loaded.items(), order.items());
    assert_eq!(loaded.totals(), order.totals());
    assert_eq!(loaded.shipping_address(), order.shipping_address());
    assert_eq!(loaded.notes(), Some("Leave at the gate"));
    assert_eq!(loaded.status(), OrderStatus::Pending);
}

#[tokio::test]
async fn test_duplicate_order_number_is_conflict() {
    let store = get_test_store().await;
    let seed = seed(&store, 10).await;

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&make_order("SM-DUP", &seed.variant, 1))
        .await
        .unwrap();
    let err = tx
        .insert_order(&make_order("SM-DUP", &seed.variant, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn test_save_order_persists_transitions() {
    let store = get_test_store().await;
    let seed = seed(&store, 10).await;
    let mut order = make_order("SM-SAVE", &seed.variant, 1);

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    order.record_capture().unwrap();
    tx.save_order(&order).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let loaded = tx.lock_order(order.id()).await.unwrap().unwrap();
    assert_eq!(loaded.status(), OrderStatus::Confirmed);
    assert!(loaded.is_paid());
}

#[tokio::test]
async fn test_uncommitted_transaction_is_rolled_back() {
    let store = get_test_store().await;
    let seed = seed(&store, 10).await;

    {
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&make_order("SM-GONE", &seed.variant, 1))
            .await
            .unwrap();
    }

    let mut tx = store.begin().await.unwrap();
    assert!(tx.order_by_number("SM-GONE").await.unwrap().is_none());
}

#[tokio::test]
async fn test_insert_reservation_ignores_duplicate_key() {
    let store = get_test_store().await;
    let seed = seed(&store, 10).await;
    let order = make_order("SM-RES", &seed.variant, 2);

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();
    let first = Reservation::new(order.id(), seed.variant.id, seed.location.id, 2);
    let again = Reservation::new(order.id(), seed.variant.id, seed.location.id, 5);
    assert!(tx.insert_reservation(&first).await.unwrap());
    assert!(!tx.insert_reservation(&again).await.unwrap());

    // The transaction is still usable after the ignored duplicate.
    let mut open = tx.lock_open_reservations(order.id()).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].quantity, 2);

    open[0].mark_captured().unwrap();
    tx.save_reservation(&open[0]).await.unwrap();
    assert!(tx.lock_open_reservations(order.id()).await.unwrap().is_empty());
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let all = tx.reservations(order.id()).await.unwrap();
    assert_eq!(all[0].status, ReservationStatus::Captured);
}

#[tokio::test]
async fn test_concurrent_holds_never_oversell() {
    let store = get_test_store().await;
    let seed = seed(&store, 5).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let variant_id = seed.variant.id;
        let location_id = seed.location.id;
        handles.push(tokio::spawn(async move {
            let mut tx = store.begin().await.unwrap();
            let mut level = tx.lock_stock_level(variant_id, location_id).await.unwrap();
            match level.hold(3) {
                Ok(()) => {
                    tx.save_stock_level(&level).await.unwrap();
                    tx.commit().await.unwrap();
                    true
                }
                Err(LedgerError::InsufficientStock { .. }) => false,
                Err(other) => panic!("unexpected ledger error: {other}"),
            }
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 1);

    let mut tx = store.begin().await.unwrap();
    let levels = tx.stock_levels(seed.variant.id).await.unwrap();
    assert_eq!(levels.len(), 1);
    assert_eq!((levels[0].available, levels[0].reserved), (5, 3));
}

#[tokio::test]
async fn test_reserved_above_available_rejected_by_schema() {
    let store = get_test_store().await;
    let seed = seed(&store, 2).await;

    let mut tx = store.begin().await.unwrap();
    let mut level = tx
        .lock_stock_level(seed.variant.id, seed.location.id)
        .await
        .unwrap();
    level.reserved = 3;
    let err = tx.save_stock_level(&level).await.unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
}

#[tokio::test]
async fn test_intent_log_sequence_and_reference_lookup() {
    let store = get_test_store().await;
    let seed = seed(&store, 10).await;
    let order = make_order("SM-INT", &seed.variant, 1);
    let method = PaymentMethod::redirect("CARD_PAYHERE", "Card", "payhere");

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&order).await.unwrap();

    let mut first = PaymentIntent::open(order.id(), &method, order.grand_total(), "LKR");
    tx.insert_intent(&mut first).await.unwrap();
    first.mark_failed().unwrap();
    tx.save_intent(&first).await.unwrap();

    let mut second = PaymentIntent::open(order.id(), &method, order.grand_total(), "LKR");
    tx.insert_intent(&mut second).await.unwrap();
    second.record_start(
        Some("SM-INT".to_string()),
        Some("https://sandbox.payhere.lk/pay/checkout".to_string()),
        serde_json::json!({"hash": "ABC"}),
    );
    tx.save_intent(&second).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let log = tx.intents(order.id()).await.unwrap();
    assert_eq!(log.len(), 2);
    assert!(log[0].sequence() < log[1].sequence());
    assert_eq!(log[0].id(), first.id());

    let latest = tx
        .latest_intent_by_reference("payhere", "SM-INT")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id(), second.id());
    assert_eq!(
        latest.request_payload(),
        Some(&serde_json::json!({"hash": "ABC"}))
    );
}

#[tokio::test]
async fn test_stale_pending_orders() {
    let store = get_test_store().await;
    let seed = seed(&store, 10).await;
    let stale = make_order("SM-STALE", &seed.variant, 1);
    let mut paid = make_order("SM-PAID", &seed.variant, 1);
    paid.record_capture().unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.insert_order(&stale).await.unwrap();
    tx.insert_order(&paid).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let future = Utc::now() + Duration::minutes(1);
    assert_eq!(
        tx.stale_pending_orders(future, 10).await.unwrap(),
        vec![OrderNumber::new("SM-STALE")]
    );
    let past = Utc::now() - Duration::hours(1);
    assert!(tx.stale_pending_orders(past, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_customer_by_phone_and_order_link() {
    let store = get_test_store().await;
    let seed = seed(&store, 10).await;
    let contact = CustomerContact {
        name: "Kamal Silva".to_string(),
        phone: "0711111111".to_string(),
        email: None,
    };
    let customer = Customer::from_contact(&contact, Utc::now());

    let mut tx = store.begin().await.unwrap();
    assert!(tx.insert_customer(&customer).await.unwrap());
    assert!(
        !tx.insert_customer(&Customer::from_contact(&contact, Utc::now()))
            .await
            .unwrap()
    );
    let order = Order::place(
        NewOrder {
            customer_id: Some(customer.id),
            ..new_order("SM-CUST", &seed.variant, 1)
        },
        Utc::now(),
    )
    .unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let mut stored = tx.lock_customer_by_phone("0711111111").await.unwrap().unwrap();
    assert_eq!(stored.id, customer.id);
    assert!(stored.fill_missing_email(Some("kamal@example.com"), Utc::now()));
    tx.save_customer(&stored).await.unwrap();
    let loaded = tx.order_by_number("SM-CUST").await.unwrap().unwrap();
    assert_eq!(loaded.customer_id(), Some(customer.id));
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let stored = tx.lock_customer_by_phone("0711111111").await.unwrap().unwrap();
    assert_eq!(stored.email.as_deref(), Some("kamal@example.com"));
    assert!(tx.lock_customer_by_phone("0700000000").await.unwrap().is_none());
}
