//! Order pipeline engine.
//!
//! This crate coordinates stock and money around the pure domain types:
//! - [`ReservationEngine`] holds, captures and releases stock per order
//! - [`CheckoutService`] turns a cart into a pending order with stock held
//! - [`PaymentService`] starts payments and applies gateway outcomes
//! - [`OrderService`] covers cancel, fulfillment, cash collection and refunds
//! - [`Reaper`] expires checkouts that were never paid
//!
//! Every business operation is one store transaction. Gateways are only
//! called while no transaction is open.

pub mod cart;
pub mod checkout;
pub mod error;
pub mod gateways;
pub mod ledger;
pub mod orders;
pub mod payments;
pub mod reaper;
pub mod reservation;

pub use cart::{Cart, CartLine, CartSource, InMemoryCartSource};
pub use checkout::{CheckoutRequest, CheckoutService, CheckoutSettings};
pub use error::{EngineError, Result};
pub use gateways::{
    CallbackVerification, GatewayError, GatewayRegistry, GatewayStart, InMemoryGateway,
    KokoConfig, KokoGateway, OnePayConfig, OnePayGateway, PayHereConfig, PayHereGateway,
    PayHereMode, PaymentGateway, PollResult, RedirectTarget, KOKO_GATEWAY, MOCK_GATEWAY,
    ONEPAY_GATEWAY, PAYHERE_GATEWAY,
};
pub use ledger::StockLedger;
pub use orders::{OrderService, OrderView};
pub use payments::{
    GatewayHandoff, PaymentService, PaymentSettings, PaymentStart, PaymentStatusView, WebhookAck,
};
pub use reaper::Reaper;
pub use reservation::{ReservationEngine, ReservationLine};
