use serde::{Deserialize, Serialize};

/// What a gateway says happened to a payment, reduced to the three cases the
/// order pipeline acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GatewayOutcome {
    /// Money captured. Stock is converted and the order marked paid.
    Success,
    /// Not settled yet. Nothing moves.
    Pending,
    /// Unambiguous decline, cancellation or chargeback.
    Failure { reason: String },
}

impl GatewayOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        GatewayOutcome::Failure {
            reason: reason.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOutcome::Success => "success",
            GatewayOutcome::Pending => "pending",
            GatewayOutcome::Failure { .. } => "failure",
        }
    }
}
