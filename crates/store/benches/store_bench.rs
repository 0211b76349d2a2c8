use chrono::Utc;
use common::{LocationId, Money, OrderId, VariantId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    CustomerContact, FulfillmentMethod, NewOrder, Order, OrderItem, OrderNumber, PaymentIntent,
    PaymentMethod, Reservation,
};
use store::{InMemoryStore, Store, Transaction};

fn make_order() -> Order {
    Order::place(
        NewOrder {
            number: OrderNumber::generate(Utc::now()),
            customer_id: None,
            customer: CustomerContact {
                name: "Bench Customer".to_string(),
                phone: "0770000000".to_string(),
                email: None,
            },
            currency: "LKR".to_string(),
            fulfillment: FulfillmentMethod::Pickup,
            items: vec![OrderItem {
                variant_id: VariantId::new(),
                product_title: "Charger".to_string(),
                variant_title: None,
                sku: "CHG-1".to_string(),
                unit_price: Money::from_cents(1_000),
                quantity: 1,
            }],
            discount_total: Money::zero(),
            shipping_total: Money::zero(),
            tax_total: Money::zero(),
            shipping_address: None,
            billing_address: None,
            notes: None,
        },
        Utc::now(),
    )
    .unwrap()
}

fn bench_hold_and_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let variant_id = VariantId::new();
    let location_id = LocationId::new();

    rt.block_on(async {
        let mut tx = store.begin().await.unwrap();
        let mut level = tx.lock_stock_level(variant_id, location_id).await.unwrap();
        level.adjust(1_000_000_000).unwrap();
        tx.save_stock_level(&level).await.unwrap();
        tx.commit().await.unwrap();
    });

    c.bench_function("store/memory_hold_and_commit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut tx = store.begin().await.unwrap();
                let mut level = tx.lock_stock_level(variant_id, location_id).await.unwrap();
                level.hold(1).unwrap();
                tx.save_stock_level(&level).await.unwrap();
                tx.insert_reservation(&Reservation::new(
                    OrderId::new(),
                    variant_id,
                    location_id,
                    1,
                ))
                .await
                .unwrap();
                tx.commit().await.unwrap();
            });
        });
    });
}

fn bench_intent_log_scan(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let order = make_order();
    let order_id = order.id();
    let method = PaymentMethod::redirect("CARD", "Card", "mock");

    // Pre-populate with 100 intents
    rt.block_on(async {
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();
        for _ in 0..100 {
            let mut intent = PaymentIntent::open(order_id, &method, order.grand_total(), "LKR");
            tx.insert_intent(&mut intent).await.unwrap();
        }
        tx.commit().await.unwrap();
    });

    c.bench_function("store/memory_intent_log_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut tx = store.begin().await.unwrap();
                let log = tx.intents(order_id).await.unwrap();
                assert_eq!(log.len(), 100);
            });
        });
    });
}

criterion_group!(benches, bench_hold_and_commit, bench_intent_log_scan);
criterion_main!(benches);
