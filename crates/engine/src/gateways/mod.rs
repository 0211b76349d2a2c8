//! Payment gateway adapters.
//!
//! The engine only ever talks to a gateway through [`PaymentGateway`]:
//! start a hosted checkout, verify a callback, poll a transaction. Every
//! provider answer is reduced to a [`GatewayOutcome`].

mod koko;
mod mock;
mod onepay;
mod payhere;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{GatewayOutcome, Order, PaymentIntent};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use koko::{KOKO_GATEWAY, KokoConfig, KokoGateway};
pub use mock::{InMemoryGateway, MOCK_GATEWAY};
pub use onepay::{ONEPAY_GATEWAY, OnePayConfig, OnePayGateway};
pub use payhere::{PAYHERE_GATEWAY, PayHereConfig, PayHereGateway, PayHereMode};

/// Errors talking to a payment provider.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure or timeout reaching the provider.
    #[error("gateway unreachable: {0}")]
    Unavailable(String),

    /// The provider answered with a non-success HTTP status.
    #[error("gateway rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The provider answered, but not with what the protocol promises.
    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),

    /// Credentials or keys could not be loaded.
    #[error("gateway misconfigured: {0}")]
    Misconfigured(String),

    /// The provider has no such capability.
    #[error("{gateway} does not support {operation}")]
    Unsupported {
        gateway: &'static str,
        operation: &'static str,
    },
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::MalformedResponse(e.to_string())
        } else {
            GatewayError::Unavailable(e.to_string())
        }
    }
}

/// Where the customer's browser goes to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RedirectTarget {
    /// Plain redirect.
    Url { url: String },
    /// Auto-submitted form posted to the provider.
    FormPost {
        action_url: String,
        fields: BTreeMap<String, String>,
    },
}

impl RedirectTarget {
    /// URL the browser lands on, for either kind.
    pub fn url(&self) -> &str {
        match self {
            RedirectTarget::Url { url } => url,
            RedirectTarget::FormPost { action_url, .. } => action_url,
        }
    }
}

/// Result of starting a hosted checkout.
#[derive(Debug, Clone)]
pub struct GatewayStart {
    pub redirect: RedirectTarget,
    /// Provider id later used to match callbacks and polls to the intent.
    pub correlation_id: Option<String>,
    /// What was sent (and received), kept on the intent for audit.
    pub request_snapshot: Value,
}

/// A verified (or rejected) provider callback.
#[derive(Debug, Clone)]
pub struct CallbackVerification {
    pub verified: bool,
    pub correlation_id: Option<String>,
    pub outcome: GatewayOutcome,
    /// Amount exactly as the provider sent it. Parsing happens at settlement
    /// so an unreadable amount is told apart from an absent one.
    pub reported_amount: Option<String>,
    pub reported_currency: Option<String>,
}

impl CallbackVerification {
    /// A callback that failed authentication.
    pub fn rejected(correlation_id: Option<String>) -> Self {
        Self {
            verified: false,
            correlation_id,
            outcome: GatewayOutcome::Pending,
            reported_amount: None,
            reported_currency: None,
        }
    }
}

/// Result of querying a transaction's status.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub outcome: GatewayOutcome,
    pub raw: Value,
}

/// Capability set of a hosted-checkout payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registry key, also stored on intents.
    fn name(&self) -> &'static str;

    /// Prepares a hosted checkout for the intent's amount.
    async fn start(
        &self,
        order: &Order,
        intent: &PaymentIntent,
    ) -> Result<GatewayStart, GatewayError>;

    /// Authenticates a callback payload and maps it to an outcome.
    async fn verify_callback(&self, payload: &Value) -> Result<CallbackVerification, GatewayError>;

    /// Asks the provider for the current state of a transaction.
    async fn poll(&self, reference: &str) -> Result<PollResult, GatewayError>;
}

/// Gateways available to payment orchestration, keyed by name.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.name().to_string(), gateway);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.gateways.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Reads a scalar field of a callback payload as a string. Form posts arrive
/// as strings, JSON bodies may carry numbers.
fn field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First name and the rest, as hosted checkouts ask for both.
fn split_name(full: &str) -> (String, String) {
    let mut parts = full.split_whitespace();
    let first = parts.next().unwrap_or("Customer").to_string();
    let rest: Vec<&str> = parts.collect();
    (first, rest.join(" "))
}
