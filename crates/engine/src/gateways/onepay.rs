//! OnePay payment links. Checkout is a plain redirect; callbacks are not
//! signed, so the adapter trusts only what the status API says.

use std::time::Duration;

use async_trait::async_trait;
use common::Money;
use domain::{GatewayOutcome, Order, PaymentIntent};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use super::{
    CallbackVerification, GatewayError, GatewayStart, PaymentGateway, PollResult, RedirectTarget,
    field, split_name,
};

pub const ONEPAY_GATEWAY: &str = "onepay";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OnePayConfig {
    pub app_id: String,
    pub hash_salt: String,
    pub base_url: String,
    /// Customer lands here after paying; the order number is appended.
    pub redirect_url: String,
}

#[derive(Debug, Clone)]
pub struct OnePayGateway {
    config: OnePayConfig,
    client: reqwest::Client,
}

impl OnePayGateway {
    pub fn new(config: OnePayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// `SHA256(app_id + currency + amount + salt)`, lowercase hex.
    pub fn checkout_hash(&self, currency: &str, amount: Money) -> String {
        let raw = format!(
            "{}{}{}{}",
            self.config.app_id, currency, amount, self.config.hash_salt
        );
        format!("{:x}", Sha256::digest(raw.as_bytes()))
    }

    fn link_request(&self, order: &Order, intent: &PaymentIntent) -> Value {
        let (first, last) = split_name(&order.customer().name);
        let number = order.number().as_str();
        let additional = json!({
            "order_number": number,
            "intent_id": intent.id(),
        });

        json!({
            "currency": intent.currency(),
            "app_id": self.config.app_id,
            "hash": self.checkout_hash(intent.currency(), intent.amount()),
            "amount": intent.amount().cents() as f64 / 100.0,
            "reference": number,
            "customer_first_name": first,
            "customer_last_name": last,
            "customer_phone_number": order.customer().phone,
            "customer_email": order.customer().email.clone().unwrap_or_default(),
            "transaction_redirect_url": format!("{}?order={}", self.config.redirect_url, number),
            "additionalData": additional.to_string(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, GatewayError> {
        let response = self.client.post(self.endpoint(path)).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

/// Pulls the transaction id and redirect URL out of a link response.
fn parse_link(response: &Value) -> Result<(String, String), GatewayError> {
    let data = &response["data"];
    match (
        data["ipg_transaction_id"].as_str(),
        data["gateway"]["redirect_url"].as_str(),
    ) {
        (Some(id), Some(url)) if !id.is_empty() && !url.is_empty() => {
            Ok((id.to_string(), url.to_string()))
        }
        _ => Err(GatewayError::MalformedResponse(format!(
            "onepay link response without transaction id or redirect url: {response}"
        ))),
    }
}

/// The status word of a status response, under `data.status` or `status`.
fn status_word(response: &Value) -> String {
    field(&response["data"], "status")
        .or_else(|| field(response, "status"))
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

fn map_status(status: &str) -> GatewayOutcome {
    match status {
        "success" | "paid" | "completed" | "captured" => GatewayOutcome::Success,
        "failed" | "failure" | "declined" | "cancelled" | "canceled" | "rejected" => {
            GatewayOutcome::failure(status)
        }
        _ => GatewayOutcome::Pending,
    }
}

#[async_trait]
impl PaymentGateway for OnePayGateway {
    fn name(&self) -> &'static str {
        ONEPAY_GATEWAY
    }

    #[tracing::instrument(skip_all, fields(order_number = %order.number()))]
    async fn start(
        &self,
        order: &Order,
        intent: &PaymentIntent,
    ) -> Result<GatewayStart, GatewayError> {
        let request = self.link_request(order, intent);
        let response = self.post("/v3/checkout/link/", &request).await?;
        let (transaction_id, url) = parse_link(&response)?;

        Ok(GatewayStart {
            redirect: RedirectTarget::Url { url },
            correlation_id: Some(transaction_id),
            request_snapshot: json!({
                "provider": ONEPAY_GATEWAY,
                "request": request,
                "response": response["data"],
            }),
        })
    }

    async fn verify_callback(&self, payload: &Value) -> Result<CallbackVerification, GatewayError> {
        let Some(transaction_id) = field(payload, "transaction_id").filter(|s| !s.is_empty())
        else {
            return Ok(CallbackVerification::rejected(None));
        };

        let polled = self.poll(&transaction_id).await?;
        Ok(CallbackVerification {
            verified: true,
            correlation_id: Some(transaction_id),
            outcome: polled.outcome,
            reported_amount: None,
            reported_currency: None,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn poll(&self, reference: &str) -> Result<PollResult, GatewayError> {
        let body = json!({
            "app_id": self.config.app_id,
            "onepay_transaction_id": reference,
        });
        let raw = self.post("/v3/transaction/status/", &body).await?;
        Ok(PollResult {
            outcome: map_status(&status_word(&raw)),
            raw,
        })
    }
}
