//! Domain error types.

use thiserror::Error;

use crate::inventory::LedgerError;
use crate::order::OrderError;
use crate::payment::IntentError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the order aggregate.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A payment intent rejected a transition.
    #[error("Payment intent error: {0}")]
    Intent(#[from] IntentError),

    /// A stock level or reservation rejected a change.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A stored enum value could not be recognised.
    #[error(transparent)]
    UnknownValue(#[from] UnknownValue),
}

/// A persisted or submitted string did not match any known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
