//! Shared identifiers and value types used across the order pipeline crates.

mod ids;
mod money;

pub use ids::{
    CustomerId, LocationId, OrderId, PaymentIntentId, ReservationId, StockItemId, VariantId,
};
pub use money::Money;
