//! HTTP API for the order pipeline.
//!
//! Provides checkout, payment, webhook, order administration and inventory
//! endpoints over the engine services, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use common::{LocationId, Money, VariantId};
use domain::{Location, PaymentMethod, PaymentMethods, Variant};
use engine::{
    CheckoutService, EngineError, GatewayError, GatewayRegistry, InMemoryCartSource,
    InMemoryGateway, KokoGateway, OnePayGateway, OrderService, PayHereGateway, PaymentService,
    Reaper, ReservationEngine, StockLedger, KOKO_GATEWAY, MOCK_GATEWAY, ONEPAY_GATEWAY,
    PAYHERE_GATEWAY,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{Store, Transaction};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub checkout: CheckoutService<S, InMemoryCartSource>,
    pub payments: PaymentService<S>,
    pub orders: OrderService<S>,
    pub ledger: StockLedger<S>,
    pub carts: InMemoryCartSource,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/cart", put(routes::checkout::put_cart::<S>))
        .route("/checkout", post(routes::checkout::checkout::<S>))
        .route("/payments/start", post(routes::payments::start::<S>))
        .route("/payments/{order_number}/status", get(routes::payments::status::<S>))
        .route("/webhooks/{provider}", post(routes::webhooks::receive::<S>))
        .route("/orders/{order_number}", get(routes::orders::get::<S>))
        .route("/orders/{order_number}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/orders/{order_number}/fulfillment",
            post(routes::orders::fulfillment::<S>),
        )
        .route("/orders/{order_number}/mark-paid", post(routes::orders::mark_paid::<S>))
        .route("/orders/{order_number}/refund", post(routes::orders::refund::<S>))
        .route("/inventory/receive", post(routes::inventory::receive::<S>))
        .route("/inventory/levels/{variant_id}", get(routes::inventory::levels::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Registers every gateway whose settings are present.
pub fn gateway_registry(config: &Config) -> Result<GatewayRegistry, GatewayError> {
    let mut registry = GatewayRegistry::new();
    if let Some(payhere) = &config.payhere {
        registry.register(Arc::new(PayHereGateway::new(payhere.clone())));
    }
    if let Some(onepay) = &config.onepay {
        registry.register(Arc::new(OnePayGateway::new(onepay.clone())?));
    }
    if let Some(koko) = &config.koko {
        registry.register(Arc::new(KokoGateway::new(koko.clone())?));
    }
    if let Some(secret) = &config.mock_gateway_secret {
        registry.register(Arc::new(InMemoryGateway::new(secret.clone())));
    }
    tracing::info!(gateways = ?registry.names(), "payment gateways registered");
    Ok(registry)
}

/// In-person methods plus one redirect method per registered gateway.
pub fn payment_methods(gateways: &GatewayRegistry) -> PaymentMethods {
    let mut methods = PaymentMethods::in_person();
    for name in gateways.names() {
        let method = match name {
            PAYHERE_GATEWAY => PaymentMethod::redirect("PAYHERE", "PayHere", PAYHERE_GATEWAY),
            ONEPAY_GATEWAY => PaymentMethod::redirect("ONEPAY", "OnePay", ONEPAY_GATEWAY),
            KOKO_GATEWAY => PaymentMethod::redirect("KOKO", "Koko", KOKO_GATEWAY),
            MOCK_GATEWAY => PaymentMethod::redirect("CARD_MOCK", "Test Card", MOCK_GATEWAY),
            _ => continue,
        };
        methods = methods.with(method);
    }
    methods
}

/// Wires the engine services over a store.
///
/// Resolves the main location once; fails if it is missing. Returns the
/// reaper separately so the caller decides whether to spawn it.
pub async fn build_state<S: Store>(
    store: S,
    config: &Config,
    gateways: GatewayRegistry,
) -> Result<(Arc<AppState<S>>, Reaper<S>), EngineError> {
    let reservations = ReservationEngine::resolve(store.clone(), &config.main_location_code).await?;
    let methods = payment_methods(&gateways);
    let carts = InMemoryCartSource::new();

    let state = AppState {
        checkout: CheckoutService::new(
            reservations.clone(),
            carts.clone(),
            methods.clone(),
            config.checkout_settings(),
        ),
        payments: PaymentService::new(
            reservations.clone(),
            methods,
            gateways,
            config.payment_settings(),
        ),
        orders: OrderService::new(reservations.clone()),
        ledger: StockLedger::new(store, reservations.main_location()),
        carts,
    };
    let reaper = Reaper::new(reservations, config.reservation_ttl());

    Ok((Arc::new(state), reaper))
}

/// Makes a fresh or existing store ready and wires the services over it:
/// seeds the main location, registers the configured gateways and builds the
/// state. Both stores go through here.
pub async fn bootstrap<S: Store>(
    store: S,
    config: &Config,
) -> Result<(Arc<AppState<S>>, Reaper<S>), EngineError> {
    ensure_main_location(&store, &config.main_location_code).await?;
    let gateways = gateway_registry(config)?;
    build_state(store, config, gateways).await
}

/// Creates the main location if the store does not have it yet.
pub async fn ensure_main_location<S: Store>(store: &S, code: &str) -> Result<(), EngineError> {
    let mut tx = store.begin().await?;
    if tx.location_by_code(code).await?.is_none() {
        tx.upsert_location(&Location {
            id: LocationId::new(),
            name: "Main Shop".to_string(),
            code: code.to_string(),
            is_active: true,
        })
        .await?;
        tracing::info!(code, "main location created");
    }
    tx.commit().await?;
    Ok(())
}

/// Seeds a small catalog for running without a database.
pub async fn seed_demo_catalog<S: Store>(store: &S) -> Result<Vec<Variant>, EngineError> {
    let variants = vec![
        Variant {
            id: VariantId::new(),
            product_title: "Wireless Earbuds".to_string(),
            variant_title: Some("White".to_string()),
            sku: "EARBUDS-WHT".to_string(),
            price: Money::from_cents(1_250_000),
            is_active: true,
            track_inventory: true,
            allow_backorder: false,
        },
        Variant {
            id: VariantId::new(),
            product_title: "USB-C Cable".to_string(),
            variant_title: Some("1m".to_string()),
            sku: "USBC-1M".to_string(),
            price: Money::from_cents(150_000),
            is_active: true,
            track_inventory: false,
            allow_backorder: false,
        },
    ];

    let mut tx = store.begin().await?;
    for variant in &variants {
        tx.upsert_variant(variant).await?;
        tracing::info!(sku = %variant.sku, variant_id = %variant.id, "demo variant seeded");
    }
    tx.commit().await?;
    Ok(variants)
}
