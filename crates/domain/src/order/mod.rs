//! Order aggregate and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{NewOrder, Order, OrderParts};
pub use state::{FulfillmentMethod, OrderStatus, PaymentStatus};
pub use value_objects::{CustomerContact, OrderItem, OrderNumber, OrderTotals};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Order is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// The action only applies to the other fulfillment method.
    #[error("Cannot {action} a {fulfillment} order")]
    FulfillmentMismatch {
        fulfillment: FulfillmentMethod,
        action: &'static str,
    },

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Invalid price.
    #[error("Invalid price: {price} (must not be negative)")]
    InvalidPrice { price: i64 },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Delivery orders need somewhere to deliver to.
    #[error("Shipping address is required for delivery")]
    ShippingAddressRequired,

    /// An amount does not fit in the money representation.
    #[error("Order amount is too large")]
    AmountOverflow,

    /// Totals would be negative.
    #[error("Order totals must not be negative")]
    InvalidTotals,

    /// The order is terminal and cannot take a payment.
    #[error("Order cannot accept payment in this status.")]
    NotPayable { current_state: OrderStatus },

    /// The order has already been paid.
    #[error("Order already paid.")]
    AlreadyPaid,

    /// Refund requested for an order that was never paid.
    #[error("Order is not paid")]
    NotPaid,
}
