//! Payment intents, settlement capabilities and gateway outcomes.
//!
//! Intents form an append-only log per order. Nothing here stores a "current"
//! intent; the latest relevant one is always a query over the log.

mod method;
mod outcome;

pub use method::{PaymentMethod, PaymentMethods, Settlement};
pub use outcome::GatewayOutcome;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentIntentId};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::UnknownValue;

/// Errors raised by payment intent transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntentError {
    #[error("Invalid payment intent transition: cannot {action} a {current} intent")]
    InvalidTransition {
        current: IntentStatus,
        action: &'static str,
    },
}

/// Status of a single payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Created,
    Pending,
    Authorized,
    Captured,
    Failed,
    Cancelled,
    Refunded,
}

impl IntentStatus {
    /// Still waiting on the customer or the gateway.
    pub fn is_open(&self) -> bool {
        matches!(self, IntentStatus::Created | IntentStatus::Pending)
    }

    /// Not failed, cancelled or refunded.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            IntentStatus::Created
                | IntentStatus::Pending
                | IntentStatus::Authorized
                | IntentStatus::Captured
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Created => "created",
            IntentStatus::Pending => "pending",
            IntentStatus::Authorized => "authorized",
            IntentStatus::Captured => "captured",
            IntentStatus::Failed => "failed",
            IntentStatus::Cancelled => "cancelled",
            IntentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IntentStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(IntentStatus::Created),
            "pending" => Ok(IntentStatus::Pending),
            "authorized" => Ok(IntentStatus::Authorized),
            "captured" => Ok(IntentStatus::Captured),
            "failed" => Ok(IntentStatus::Failed),
            "cancelled" => Ok(IntentStatus::Cancelled),
            "refunded" => Ok(IntentStatus::Refunded),
            other => Err(UnknownValue::new("payment intent status", other)),
        }
    }
}

/// Flat view of a persisted intent, used by stores to rehydrate it.
#[derive(Debug, Clone)]
pub struct IntentParts {
    pub id: PaymentIntentId,
    pub order_id: OrderId,
    pub method_code: String,
    pub gateway: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub status: IntentStatus,
    pub gateway_reference: Option<String>,
    pub redirect_url: Option<String>,
    pub request_payload: Option<Value>,
    pub response_payload: Option<Value>,
    pub webhook_payload: Option<Value>,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One attempt to collect payment for an order.
///
/// Raw gateway payloads are kept as opaque JSON snapshots for audit; nothing
/// in the pipeline parses them after the adapter has.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    id: PaymentIntentId,
    order_id: OrderId,
    method_code: String,
    gateway: Option<String>,
    amount: Money,
    currency: String,
    status: IntentStatus,
    gateway_reference: Option<String>,
    redirect_url: Option<String>,
    request_payload: Option<Value>,
    response_payload: Option<Value>,
    webhook_payload: Option<Value>,
    sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Opens a new `pending` intent. The store assigns the sequence number.
    pub fn open(
        order_id: OrderId,
        method: &PaymentMethod,
        amount: Money,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentIntentId::new(),
            order_id,
            method_code: method.code.clone(),
            gateway: method.gateway().map(str::to_string),
            amount,
            currency: currency.into(),
            status: IntentStatus::Pending,
            gateway_reference: None,
            redirect_url: None,
            request_payload: None,
            response_payload: None,
            webhook_payload: None,
            sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_parts(parts: IntentParts) -> Self {
        Self {
            id: parts.id,
            order_id: parts.order_id,
            method_code: parts.method_code,
            gateway: parts.gateway,
            amount: parts.amount,
            currency: parts.currency,
            status: parts.status,
            gateway_reference: parts.gateway_reference,
            redirect_url: parts.redirect_url,
            request_payload: parts.request_payload,
            response_payload: parts.response_payload,
            webhook_payload: parts.webhook_payload,
            sequence: parts.sequence,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }

    pub fn id(&self) -> PaymentIntentId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn method_code(&self) -> &str {
        &self.method_code
    }

    pub fn gateway(&self) -> Option<&str> {
        self.gateway.as_deref()
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn status(&self) -> IntentStatus {
        self.status
    }

    pub fn gateway_reference(&self) -> Option<&str> {
        self.gateway_reference.as_deref()
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.redirect_url.as_deref()
    }

    pub fn request_payload(&self) -> Option<&Value> {
        self.request_payload.as_ref()
    }

    pub fn response_payload(&self) -> Option<&Value> {
        self.response_payload.as_ref()
    }

    pub fn webhook_payload(&self) -> Option<&Value> {
        self.webhook_payload.as_ref()
    }

    /// Position in the order's intent log.
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn assign_sequence(&mut self, sequence: i64) {
        self.sequence = sequence;
    }

    /// Records what the gateway handed back when the payment was started.
    pub fn record_start(
        &mut self,
        reference: Option<String>,
        redirect_url: Option<String>,
        request: Value,
    ) {
        if reference.is_some() {
            self.gateway_reference = reference;
        }
        self.redirect_url = redirect_url;
        self.request_payload = Some(request);
        self.touch();
    }

    pub fn record_response(&mut self, raw: Value) {
        self.response_payload = Some(raw);
        self.touch();
    }

    pub fn record_webhook(&mut self, raw: Value) {
        self.webhook_payload = Some(raw);
        self.touch();
    }

    /// Returns `Ok(false)` when already captured.
    ///
    /// A capture reported after the intent failed or was cancelled still
    /// wins: the money moved. Only a refunded intent refuses it.
    pub fn mark_captured(&mut self) -> Result<bool, IntentError> {
        match self.status {
            IntentStatus::Captured => Ok(false),
            IntentStatus::Created
            | IntentStatus::Pending
            | IntentStatus::Authorized
            | IntentStatus::Failed
            | IntentStatus::Cancelled => {
                self.set_status(IntentStatus::Captured);
                Ok(true)
            }
            current => Err(IntentError::InvalidTransition {
                current,
                action: "capture",
            }),
        }
    }

    /// Returns `Ok(false)` when already failed.
    pub fn mark_failed(&mut self) -> Result<bool, IntentError> {
        match self.status {
            IntentStatus::Failed => Ok(false),
            IntentStatus::Created | IntentStatus::Pending | IntentStatus::Authorized => {
                self.set_status(IntentStatus::Failed);
                Ok(true)
            }
            current => Err(IntentError::InvalidTransition {
                current,
                action: "fail",
            }),
        }
    }

    pub fn cancel(&mut self) -> Result<(), IntentError> {
        if !self.status.is_open() {
            return Err(IntentError::InvalidTransition {
                current: self.status,
                action: "cancel",
            });
        }
        self.set_status(IntentStatus::Cancelled);
        Ok(())
    }

    pub fn refund(&mut self) -> Result<(), IntentError> {
        if self.status != IntentStatus::Captured {
            return Err(IntentError::InvalidTransition {
                current: self.status,
                action: "refund",
            });
        }
        self.set_status(IntentStatus::Refunded);
        Ok(())
    }

    fn set_status(&mut self, status: IntentStatus) {
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent() -> PaymentIntent {
        let method = PaymentMethod::redirect("CARD_PAYHERE", "Card", "payhere");
        PaymentIntent::open(OrderId::new(), &method, Money::from_cents(5_000), "LKR")
    }

    #[test]
    fn test_open_intent_is_pending_with_gateway() {
        let intent = intent();
        assert_eq!(intent.status(), IntentStatus::Pending);
        assert_eq!(intent.gateway(), Some("payhere"));
        assert!(intent.gateway_reference().is_none());
    }

    #[test]
    fn test_capture_is_idempotent() {
        let mut intent = intent();
        assert!(intent.mark_captured().unwrap());
        assert!(!intent.mark_captured().unwrap());
        assert_eq!(intent.status(), IntentStatus::Captured);
    }

    #[test]
    fn test_captured_intent_cannot_fail() {
        let mut intent = intent();
        intent.mark_captured().unwrap();
        assert_eq!(
            intent.mark_failed().unwrap_err(),
            IntentError::InvalidTransition {
                current: IntentStatus::Captured,
                action: "fail"
            }
        );
    }

    #[test]
    fn test_late_capture_overrides_failure() {
        let mut failed = intent();
        assert!(failed.mark_failed().unwrap());
        assert!(!failed.mark_failed().unwrap());
        assert!(failed.mark_captured().unwrap());
        assert_eq!(failed.status(), IntentStatus::Captured);

        let mut cancelled = intent();
        cancelled.cancel().unwrap();
        assert!(cancelled.mark_captured().unwrap());
    }

    #[test]
    fn test_refunded_intent_cannot_capture() {
        let mut intent = intent();
        intent.mark_captured().unwrap();
        intent.refund().unwrap();
        assert_eq!(
            intent.mark_captured().unwrap_err(),
            IntentError::InvalidTransition {
                current: IntentStatus::Refunded,
                action: "capture"
            }
        );
    }

    #[test]
    fn test_cancel_only_open_and_refund_only_captured() {
        let mut open = intent();
        assert!(open.refund().is_err());
        open.cancel().unwrap();
        assert_eq!(open.status(), IntentStatus::Cancelled);

        let mut captured = intent();
        captured.mark_captured().unwrap();
        assert!(captured.cancel().is_err());
        captured.refund().unwrap();
        assert_eq!(captured.status(), IntentStatus::Refunded);
    }

    #[test]
    fn test_record_start_keeps_reference_when_none_given() {
        let mut intent = intent();
        intent.record_start(
            Some("REF-1".to_string()),
            Some("https://pay".to_string()),
            serde_json::json!({}),
        );
        intent.record_start(None, None, serde_json::json!({"again": true}));
        assert_eq!(intent.gateway_reference(), Some("REF-1"));
        assert!(intent.redirect_url().is_none());
    }

    #[test]
    fn test_status_strings_parse_back() {
        for status in [
            IntentStatus::Created,
            IntentStatus::Pending,
            IntentStatus::Authorized,
            IntentStatus::Captured,
            IntentStatus::Failed,
            IntentStatus::Cancelled,
            IntentStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<IntentStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_open_and_live_sets() {
        assert!(IntentStatus::Pending.is_open());
        assert!(!IntentStatus::Authorized.is_open());
        assert!(IntentStatus::Captured.is_live());
        assert!(!IntentStatus::Failed.is_live());
        assert!(!IntentStatus::Cancelled.is_live());
    }
}
