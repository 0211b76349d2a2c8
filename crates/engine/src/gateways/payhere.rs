//! PayHere hosted checkout: the browser form-posts signed fields to PayHere,
//! which later calls the notify URL with an `md5sig`-signed form.

use std::collections::BTreeMap;

use async_trait::async_trait;
use common::Money;
use constant_time_eq::constant_time_eq;
use domain::{GatewayOutcome, Order, PaymentIntent};
use md5::{Digest, Md5};
use serde_json::{Value, json};

use super::{
    CallbackVerification, GatewayError, GatewayStart, PaymentGateway, PollResult, RedirectTarget,
    field, split_name,
};

pub const PAYHERE_GATEWAY: &str = "payhere";

const SANDBOX_ACTION_URL: &str = "https://sandbox.payhere.lk/pay/checkout";
const LIVE_ACTION_URL: &str = "https://www.payhere.lk/pay/checkout";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayHereMode {
    #[default]
    Sandbox,
    Live,
}

impl PayHereMode {
    /// `live` selects production; anything else stays on the sandbox.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("live") {
            PayHereMode::Live
        } else {
            PayHereMode::Sandbox
        }
    }

    pub fn action_url(&self) -> &'static str {
        match self {
            PayHereMode::Sandbox => SANDBOX_ACTION_URL,
            PayHereMode::Live => LIVE_ACTION_URL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayHereConfig {
    pub merchant_id: String,
    pub merchant_secret: String,
    pub mode: PayHereMode,
    pub return_url: String,
    pub cancel_url: String,
    pub notify_url: String,
}

/// PayHere adapter. Correlates by order number, which PayHere echoes back
/// as `order_id`.
#[derive(Debug, Clone)]
pub struct PayHereGateway {
    config: PayHereConfig,
}

impl PayHereGateway {
    pub fn new(config: PayHereConfig) -> Self {
        Self { config }
    }

    fn md5_upper(input: &str) -> String {
        format!("{:X}", Md5::digest(input.as_bytes()))
    }

    fn hashed_secret(&self) -> String {
        Self::md5_upper(&self.config.merchant_secret)
    }

    /// `UPPER(MD5(merchant_id + order_id + amount + currency + UPPER(MD5(secret))))`
    pub fn checkout_hash(&self, order_id: &str, amount: Money, currency: &str) -> String {
        Self::md5_upper(&format!(
            "{}{}{}{}{}",
            self.config.merchant_id,
            order_id,
            amount,
            currency,
            self.hashed_secret()
        ))
    }

    /// The `md5sig` PayHere puts on a notify callback.
    pub fn notify_signature(
        &self,
        order_id: &str,
        amount: &str,
        currency: &str,
        status_code: &str,
    ) -> String {
        Self::md5_upper(&format!(
            "{}{}{}{}{}{}",
            self.config.merchant_id,
            order_id,
            amount,
            currency,
            status_code,
            self.hashed_secret()
        ))
    }

    fn outcome(status_code: &str, message: Option<String>) -> GatewayOutcome {
        match status_code.trim() {
            "2" => GatewayOutcome::Success,
            "0" => GatewayOutcome::Pending,
            "-1" => GatewayOutcome::failure(message.unwrap_or_else(|| "canceled".to_string())),
            "-2" => GatewayOutcome::failure(message.unwrap_or_else(|| "failed".to_string())),
            "-3" => GatewayOutcome::failure(message.unwrap_or_else(|| "charged back".to_string())),
            _ => GatewayOutcome::Pending,
        }
    }

    fn checkout_fields(&self, order: &Order, intent: &PaymentIntent) -> BTreeMap<String, String> {
        let (first_name, last_name) = split_name(&order.customer().name);
        let shipping = order.shipping_address();
        let address_part = |keys: &[&str], fallback: &str| {
            keys.iter()
                .find_map(|k| shipping.and_then(|a| a.get(*k)).and_then(Value::as_str))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };

        let order_id = order.number().as_str();
        let mut fields = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            fields.insert(k.to_string(), v);
        };
        put("merchant_id", self.config.merchant_id.clone());
        put("return_url", self.config.return_url.clone());
        put("cancel_url", self.config.cancel_url.clone());
        put("notify_url", self.config.notify_url.clone());
        put("first_name", first_name);
        put(
            "last_name",
            if last_name.is_empty() { "NA".to_string() } else { last_name },
        );
        put("email", order.customer().email.clone().unwrap_or_default());
        put("phone", order.customer().phone.clone());
        put("address", address_part(&["address", "line1"], "N/A"));
        put("city", address_part(&["city"], "Colombo"));
        put("country", address_part(&["country"], "Sri Lanka"));
        put("order_id", order_id.to_string());
        put("items", format!("Order {order_id}"));
        put("currency", intent.currency().to_string());
        put("amount", intent.amount().to_string());
        put(
            "hash",
            self.checkout_hash(order_id, intent.amount(), intent.currency()),
        );
        put("custom_1", intent.id().to_string());
        put("custom_2", intent.method_code().to_string());
        fields
    }
}

#[async_trait]
impl PaymentGateway for PayHereGateway {
    fn name(&self) -> &'static str {
        PAYHERE_GATEWAY
    }

    async fn start(
        &self,
        order: &Order,
        intent: &PaymentIntent,
    ) -> Result<GatewayStart, GatewayError> {
        let fields = self.checkout_fields(order, intent);
        let action_url = self.config.mode.action_url().to_string();
        let request_snapshot = json!({
            "provider": PAYHERE_GATEWAY,
            "action_url": action_url,
            "fields": fields,
        });

        Ok(GatewayStart {
            redirect: RedirectTarget::FormPost { action_url, fields },
            correlation_id: Some(order.number().as_str().to_string()),
            request_snapshot,
        })
    }

    async fn verify_callback(&self, payload: &Value) -> Result<CallbackVerification, GatewayError> {
        let order_id = field(payload, "order_id").filter(|s| !s.is_empty());
        let required = (
            field(payload, "merchant_id"),
            field(payload, "payhere_amount"),
            field(payload, "payhere_currency"),
            field(payload, "status_code"),
            field(payload, "md5sig"),
        );
        let (
            Some(order_ref),
            (Some(merchant_id), Some(amount), Some(currency), Some(status), Some(sig)),
        ) = (order_id.clone(), required)
        else {
            return Ok(CallbackVerification::rejected(order_id));
        };

        let expected = self.notify_signature(&order_ref, &amount, &currency, &status);
        if !constant_time_eq(expected.as_bytes(), sig.to_uppercase().as_bytes()) {
            return Ok(CallbackVerification::rejected(Some(order_ref)));
        }
        if merchant_id != self.config.merchant_id {
            tracing::warn!(%merchant_id, "payhere notify for another merchant");
            return Ok(CallbackVerification::rejected(Some(order_ref)));
        }

        Ok(CallbackVerification {
            verified: true,
            correlation_id: Some(order_ref),
            outcome: Self::outcome(&status, field(payload, "status_message")),
            reported_amount: Some(amount),
            reported_currency: Some(currency),
        })
    }

    async fn poll(&self, _reference: &str) -> Result<PollResult, GatewayError> {
        Err(GatewayError::Unsupported {
            gateway: PAYHERE_GATEWAY,
            operation: "status polling",
        })
    }
}
