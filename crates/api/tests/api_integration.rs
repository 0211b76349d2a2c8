//! Integration tests for the API server.

use std::sync::OnceLock;

use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Money, VariantId};
use domain::Variant;
use engine::InMemoryGateway;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::{InMemoryStore, Store, Transaction};
use tower::ServiceExt;

const MOCK_SECRET: &str = "test-secret";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    variant_id: VariantId,
    /// Signs callbacks with the same secret as the registered mock gateway.
    signer: InMemoryGateway,
}

impl TestApp {
    async fn new(available: i64) -> Self {
        let store = InMemoryStore::new();
        let config = Config {
            mock_gateway_secret: Some(MOCK_SECRET.to_string()),
            ..Config::default()
        };
        api::ensure_main_location(&store, &config.main_location_code)
            .await
            .unwrap();

        let variant = Variant {
            id: VariantId::new(),
            product_title: "Smart Watch".to_string(),
            variant_title: Some("42mm".to_string()),
            sku: "WATCH-42".to_string(),
            price: Money::from_cents(2_500_000),
            is_active: true,
            track_inventory: true,
            allow_backorder: false,
        };
        let mut tx = store.begin().await.unwrap();
        tx.upsert_variant(&variant).await.unwrap();
        tx.commit().await.unwrap();

        let gateways = api::gateway_registry(&config).unwrap();
        let (state, _reaper) = api::build_state(store, &config, gateways).await.unwrap();
        let app = api::create_app(state, get_metrics_handle());

        let test_app = Self {
            app,
            variant_id: variant.id,
            signer: InMemoryGateway::new(MOCK_SECRET),
        };
        if available > 0 {
            let (status, _) = test_app
                .send(
                    "POST",
                    "/inventory/receive",
                    Some(json!({"variant_id": variant.id, "quantity": available})),
                    None,
                )
                .await;
            assert_eq!(status, StatusCode::OK);
        }
        test_app
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("x-guest-token", token);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_string(&json).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn put_cart(&self, token: &str, quantity: u32) {
        let (status, _) = self
            .send(
                "PUT",
                "/cart",
                Some(json!({
                    "currency": "LKR",
                    "lines": [{
                        "variant_id": self.variant_id,
                        "quantity": quantity,
                        "unit_price": 2_500_000
                    }]
                })),
                Some(token),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    /// Checks out a delivery order and returns its number.
    async fn place_order(&self, token: &str, quantity: u32, method: Option<&str>) -> (StatusCode, Value) {
        self.put_cart(token, quantity).await;
        self.send(
            "POST",
            "/checkout",
            Some(json!({
                "fulfillment_method": "delivery",
                "payment_method_code": method,
                "guest_name": "Kasun Perera",
                "guest_phone": "0771234567",
                "shipping_address": {"line1": "12 Galle Rd", "city": "Colombo"}
            })),
            Some(token),
        )
        .await
    }

    async fn levels(&self) -> Value {
        let (status, json) = self
            .send("GET", &format!("/inventory/levels/{}", self.variant_id), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        json[0].clone()
    }
}

#[tokio::test]
async fn test_health_check() {
    let t = TestApp::new(0).await;

    let (status, json) = t.send("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = TestApp::new(0).await;

    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_checkout_creates_pending_order() {
    let t = TestApp::new(5).await;

    let (status, json) = t.place_order("guest-1", 2, None).await;

    assert_eq!(status, StatusCode::CREATED);
    let order = &json["order"];
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "unpaid");
    assert_eq!(order["totals"]["subtotal"], 5_000_000);
    assert_eq!(order["totals"]["shipping_total"], 30_000);
    assert_eq!(order["totals"]["grand_total"], 5_030_000);
    assert!(json["payment_intent"].is_null());
    assert!(order["number"].as_str().unwrap().starts_with("SM"));

    let level = t.levels().await;
    assert_eq!(level["available"], 5);
    assert_eq!(level["reserved"], 2);
}

#[tokio::test]
async fn test_checkout_with_cod_confirms_immediately() {
    let t = TestApp::new(5).await;

    let (status, json) = t.place_order("guest-cod", 1, Some("COD")).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["order"]["status"], "confirmed");
    assert_eq!(json["order"]["payment_status"], "unpaid");
    assert_eq!(json["payment_intent"]["status"], "pending");
    assert_eq!(json["payment_intent"]["method_code"], "COD");

    let level = t.levels().await;
    assert_eq!(level["available"], 4);
    assert_eq!(level["reserved"], 0);
}

#[tokio::test]
async fn test_checkout_rejections() {
    let t = TestApp::new(1).await;

    let (status, json) = t.send("POST", "/checkout", Some(json!({})), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().is_some());

    let (status, json) = t.place_order("guest-greedy", 3, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "Not enough stock for SKU WATCH-42. Available: 1");
    assert_eq!(t.levels().await["reserved"], 0);

    t.put_cart("guest-noaddr", 1).await;
    let (status, json) = t
        .send(
            "POST",
            "/checkout",
            Some(json!({
                "fulfillment_method": "delivery",
                "guest_name": "Kasun Perera",
                "guest_phone": "0771234567"
            })),
            Some("guest-noaddr"),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "Shipping address is required for delivery");
}

#[tokio::test]
async fn test_checkout_with_empty_cart() {
    let t = TestApp::new(1).await;

    let (status, json) = t
        .send(
            "POST",
            "/checkout",
            Some(json!({
                "fulfillment_method": "pickup",
                "guest_name": "Kasun Perera",
                "guest_phone": "0771234567"
            })),
            Some("nobody"),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "Cart is empty");
}

#[tokio::test]
async fn test_redirect_payment_settled_by_webhook() {
    let t = TestApp::new(5).await;
    let (_, placed) = t.place_order("guest-card", 2, None).await;
    let number = placed["order"]["number"].as_str().unwrap().to_string();

    let (status, started) = t
        .send(
            "POST",
            "/payments/start",
            Some(json!({"order_number": number, "payment_method_code": "CARD_MOCK"})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["gateway"]["provider"], "mock");
    assert_eq!(started["gateway"]["kind"], "url");
    assert_eq!(started["idempotent"], false);
    let reference = started["payment_intent"]["gateway_reference"]
        .as_str()
        .unwrap()
        .to_string();

    let callback = t.signer.callback(
        &reference,
        "success",
        Money::from_cents(5_030_000),
        "LKR",
    );
    let (status, ack) = t.send("POST", "/webhooks/mock", Some(callback.clone()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ok"], true);
    assert_eq!(ack["message"], "Payment captured and order confirmed");

    let (_, view) = t.send("GET", &format!("/orders/{number}"), None, None).await;
    assert_eq!(view["order"]["status"], "confirmed");
    assert_eq!(view["order"]["payment_status"], "paid");
    assert_eq!(view["reservations"][0]["status"], "captured");
    assert_eq!(view["payment_intents"][0]["status"], "captured");

    let (status, ack) = t.send("POST", "/webhooks/mock", Some(callback), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["message"], "Already processed");

    let level = t.levels().await;
    assert_eq!(level["available"], 3);
    assert_eq!(level["reserved"], 0);
}

#[tokio::test]
async fn test_webhooks_always_acknowledged() {
    let t = TestApp::new(0).await;

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/payhere")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("merchant_id=1211149&order_id=SM1&status_code=2"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let ack: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(ack["message"], "Unknown provider (ignored)");

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/mock")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, ack) = t
        .send(
            "POST",
            "/webhooks/mock",
            Some(json!({"reference": "MOCK-0042", "status": "success", "signature": "nope"})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["message"], "Intent not found (ignored)");
}

#[tokio::test]
async fn test_payment_start_errors() {
    let t = TestApp::new(5).await;
    let (_, placed) = t.place_order("guest-err", 1, None).await;
    let number = placed["order"]["number"].as_str().unwrap().to_string();

    let (status, json) = t
        .send(
            "POST",
            "/payments/start",
            Some(json!({"order_number": number, "payment_method_code": "KOKO"})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "Unknown payment method: KOKO");

    let (status, _) = t
        .send(
            "POST",
            "/payments/start",
            Some(json!({"order_number": "SM000000NOPE00", "payment_method_code": "COD"})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t
        .send("GET", &format!("/payments/{number}/status"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_payment_status_polls_gateway() {
    let t = TestApp::new(5).await;
    let (_, placed) = t.place_order("guest-poll", 1, None).await;
    let number = placed["order"]["number"].as_str().unwrap().to_string();
    t.send(
        "POST",
        "/payments/start",
        Some(json!({"order_number": number, "payment_method_code": "CARD_MOCK"})),
        None,
    )
    .await;

    let (status, json) = t
        .send("GET", &format!("/payments/{number}/status"), None, None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"]["outcome"], "pending");
    assert_eq!(json["order_status"], "pending");
    assert_eq!(json["message"], "Payment pending");
}

#[tokio::test]
async fn test_cancel_releases_stock_once() {
    let t = TestApp::new(5).await;
    let (_, placed) = t.place_order("guest-cancel", 3, None).await;
    let number = placed["order"]["number"].as_str().unwrap().to_string();

    let (status, order) = t
        .send("POST", &format!("/orders/{number}/cancel"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "canceled");
    assert_eq!(t.levels().await["reserved"], 0);

    let (status, json) = t
        .send("POST", &format!("/orders/{number}/cancel"), None, None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("canceled"));

    let (status, _) = t.send("POST", "/orders/SM000000NOPE00/cancel", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fulfillment_cash_collection_and_refund() {
    let t = TestApp::new(5).await;
    let (_, placed) = t.place_order("guest-ship", 1, Some("COD")).await;
    let number = placed["order"]["number"].as_str().unwrap().to_string();
    let fulfillment = format!("/orders/{number}/fulfillment");

    let (status, _) = t
        .send("POST", &fulfillment, Some(json!({"status": "ready_to_pickup"})), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, json) = t
        .send("POST", &fulfillment, Some(json!({"status": "canceled"})), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "The selected status is invalid.");

    let (status, order) = t
        .send("POST", &fulfillment, Some(json!({"status": "on_delivery"})), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "on_delivery");

    let (status, order) = t
        .send("POST", &format!("/orders/{number}/mark-paid"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["payment_status"], "paid");

    let (status, order) = t
        .send("POST", &fulfillment, Some(json!({"status": "delivered"})), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "delivered");

    let (status, json) = t
        .send("POST", &format!("/orders/{number}/refund"), None, None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("refund"));
}

#[tokio::test]
async fn test_inventory_receive_validation() {
    let t = TestApp::new(2).await;

    let (status, level) = t
        .send(
            "POST",
            "/inventory/receive",
            Some(json!({"variant_id": t.variant_id, "quantity": 8})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(level["available"], 10);

    let (status, _) = t
        .send(
            "POST",
            "/inventory/receive",
            Some(json!({"variant_id": t.variant_id, "quantity": 0})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = t
        .send(
            "POST",
            "/inventory/receive",
            Some(json!({"variant_id": VariantId::new(), "quantity": 1})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t
        .send(
            "POST",
            "/inventory/receive",
            Some(json!({"variant_id": t.variant_id, "quantity": 1, "location_code": "WAREHOUSE"})),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t.send("GET", "/inventory/levels/not-a-uuid", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bootstrap_prepares_a_fresh_store() {
    let store = InMemoryStore::new();
    let config = Config::default();

    let err = api::build_state(store.clone(), &config, api::gateway_registry(&config).unwrap())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, engine::EngineError::LocationNotFound(_)));

    api::bootstrap(store.clone(), &config).await.unwrap();
    api::bootstrap(store.clone(), &config).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let location = tx
        .location_by_code(&config.main_location_code)
        .await
        .unwrap();
    assert!(location.is_some_and(|l| l.is_active));
}
