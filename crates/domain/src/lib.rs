//! Domain layer for the order pipeline.
//!
//! This crate holds the pure, IO-free building blocks:
//! - Order aggregate with its status state machine and totals invariant
//! - Customers matched by phone number across guest checkouts
//! - Stock levels, reservations and the variant policy flags they depend on
//! - Payment intents, settlement capabilities and gateway outcomes

pub mod customer;
pub mod error;
pub mod inventory;
pub mod order;
pub mod payment;

pub use common::{
    CustomerId, LocationId, Money, OrderId, PaymentIntentId, ReservationId, StockItemId, VariantId,
};
pub use customer::Customer;
pub use error::{DomainError, UnknownValue};
pub use inventory::{
    Clamp, LedgerError, Location, Reservation, ReservationStatus, StockLevel, Variant,
};
pub use order::{
    CustomerContact, FulfillmentMethod, NewOrder, Order, OrderError, OrderItem, OrderNumber,
    OrderParts, OrderStatus, OrderTotals, PaymentStatus,
};
pub use payment::{
    GatewayOutcome, IntentError, IntentParts, IntentStatus, PaymentIntent, PaymentMethod,
    PaymentMethods, Settlement,
};
