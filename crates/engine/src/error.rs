//! Engine error types.

use common::VariantId;
use domain::{DomainError, IntentError, LedgerError, OrderError, UnknownValue};
use store::StoreError;
use thiserror::Error;

use crate::gateways::GatewayError;

/// Errors returned by the checkout, reservation and payment services.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The cart has no lines, or no cart exists for the token.
    #[error("Cart is empty")]
    EmptyCart,

    /// A cart line points at a missing or inactive variant.
    #[error("One of the items is not available.")]
    ItemUnavailable,

    /// Free stock at the location cannot cover a line.
    #[error("Not enough stock for SKU {sku}. Available: {free}")]
    InsufficientStock { sku: String, free: i64 },

    /// Request data failed validation; the message names the field.
    #[error("{0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Unknown payment method: {0}")]
    UnknownPaymentMethod(String),

    /// The method settles through a gateway that is not registered.
    #[error("Payment gateway not configured: {0}")]
    GatewayNotConfigured(String),

    /// No intent of the order carries a gateway reference to poll.
    #[error("No gateway transaction found for this order")]
    NoGatewayTransaction,

    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("Variant not found: {0}")]
    VariantNotFound(VariantId),

    /// An aggregate rejected the requested change.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<OrderError> for EngineError {
    fn from(e: OrderError) -> Self {
        EngineError::Domain(e.into())
    }
}

impl From<IntentError> for EngineError {
    fn from(e: IntentError) -> Self {
        EngineError::Domain(e.into())
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        EngineError::Domain(e.into())
    }
}

impl From<UnknownValue> for EngineError {
    fn from(e: UnknownValue) -> Self {
        EngineError::Domain(e.into())
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;
