//! Scriptable gateway for local development and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::Money;
use constant_time_eq::constant_time_eq;
use domain::{GatewayOutcome, Order, PaymentIntent};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use super::{
    CallbackVerification, GatewayError, GatewayStart, PaymentGateway, PollResult, RedirectTarget,
    field,
};

pub const MOCK_GATEWAY: &str = "mock";

#[derive(Debug, Default)]
struct MockState {
    next_id: u32,
    started: Vec<String>,
    poll_outcomes: HashMap<String, GatewayOutcome>,
    fail_on_start: bool,
}

/// In-memory gateway. Hands out `MOCK-0001`-style references and accepts
/// callbacks signed with `SHA256(secret|reference|status)`.
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    secret: String,
    state: Arc<Mutex<MockState>>,
}

impl InMemoryGateway {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            state: Arc::default(),
        }
    }

    /// A panic while holding the lock leaves the counters usable.
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signature a genuine callback for `reference` with `status` carries.
    pub fn sign(&self, reference: &str, status: &str) -> String {
        let raw = format!("{}|{reference}|{status}", self.secret);
        format!("{:x}", Sha256::digest(raw.as_bytes()))
    }

    /// Builds a correctly signed callback payload.
    pub fn callback(&self, reference: &str, status: &str, amount: Money, currency: &str) -> Value {
        json!({
            "reference": reference,
            "status": status,
            "amount": amount.to_string(),
            "currency": currency,
            "signature": self.sign(reference, status),
        })
    }

    /// Configures the gateway to fail every start call.
    pub fn set_fail_on_start(&self, fail: bool) {
        self.state().fail_on_start = fail;
    }

    /// Scripts what the next polls of `reference` report.
    pub fn set_poll_outcome(&self, reference: &str, outcome: GatewayOutcome) {
        self.state()
            .poll_outcomes
            .insert(reference.to_string(), outcome);
    }

    /// Number of checkouts started so far.
    pub fn started_count(&self) -> usize {
        self.state().started.len()
    }

    fn outcome(status: &str) -> GatewayOutcome {
        match status {
            "success" => GatewayOutcome::Success,
            "failed" => GatewayOutcome::failure("declined by mock gateway"),
            _ => GatewayOutcome::Pending,
        }
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    fn name(&self) -> &'static str {
        MOCK_GATEWAY
    }

    async fn start(
        &self,
        order: &Order,
        intent: &PaymentIntent,
    ) -> Result<GatewayStart, GatewayError> {
        let mut state = self.state();
        if state.fail_on_start {
            return Err(GatewayError::Unavailable(
                "mock gateway is down".to_string(),
            ));
        }

        state.next_id += 1;
        let reference = format!("MOCK-{:04}", state.next_id);
        state.started.push(reference.clone());

        Ok(GatewayStart {
            redirect: RedirectTarget::Url {
                url: format!("https://mock-gateway.local/pay/{reference}"),
            },
            correlation_id: Some(reference.clone()),
            request_snapshot: json!({
                "provider": MOCK_GATEWAY,
                "reference": reference,
                "order_number": order.number(),
                "amount": intent.amount(),
            }),
        })
    }

    async fn verify_callback(&self, payload: &Value) -> Result<CallbackVerification, GatewayError> {
        let reference = field(payload, "reference");
        let (Some(r), Some(status), Some(signature)) = (
            reference.clone(),
            field(payload, "status"),
            field(payload, "signature"),
        ) else {
            return Ok(CallbackVerification::rejected(reference));
        };
        if !constant_time_eq(self.sign(&r, &status).as_bytes(), signature.as_bytes()) {
            return Ok(CallbackVerification::rejected(Some(r)));
        }

        Ok(CallbackVerification {
            verified: true,
            correlation_id: Some(r),
            outcome: Self::outcome(&status),
            reported_amount: field(payload, "amount"),
            reported_currency: field(payload, "currency"),
        })
    }

    async fn poll(&self, reference: &str) -> Result<PollResult, GatewayError> {
        let outcome = self
            .state()
            .poll_outcomes
            .get(reference)
            .cloned()
            .unwrap_or(GatewayOutcome::Pending);
        Ok(PollResult {
            raw: json!({"reference": reference, "status": outcome.as_str()}),
            outcome,
        })
    }
}
