//! Koko buy-now-pay-later checkout. The browser form-posts an order created
//! and signed with the merchant's RSA key; Koko signs its callbacks with its
//! own key. Both signatures are RSA-SHA256 (PKCS#1 v1.5), base64 encoded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use domain::{GatewayOutcome, Order, PaymentIntent};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{Value, json};
use sha2::Sha256;

use super::{
    CallbackVerification, GatewayError, GatewayStart, PaymentGateway, PollResult, RedirectTarget,
    field, split_name,
};

pub const KOKO_GATEWAY: &str = "koko";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ORDER_CREATE_PATH: &str = "/api/merchants/orderCreate";
const ORDER_VIEW_PATH: &str = "/api/merchants/orderView";

#[derive(Debug, Clone)]
pub struct KokoConfig {
    pub base_url: String,
    pub merchant_id: String,
    pub api_key: String,
    pub plugin_name: String,
    pub plugin_version: String,
    /// Basic auth credentials, when Koko issued them.
    pub basic_auth: Option<(String, String)>,
    pub merchant_private_key_path: PathBuf,
    pub koko_public_key_path: PathBuf,
    pub return_url: String,
    pub cancel_url: String,
    /// Backend callback URL; the order number is appended as `?order=`.
    pub response_url: String,
}

/// Koko adapter. Correlates by `KOKO-{intent id}`, which Koko echoes back as
/// `orderId`.
#[derive(Clone)]
pub struct KokoGateway {
    config: KokoConfig,
    signing_key: SigningKey<Sha256>,
    verifying_key: VerifyingKey<Sha256>,
    client: reqwest::Client,
}

fn read_key(path: &Path) -> Result<String, GatewayError> {
    std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Misconfigured(format!("{}: {e}", path.display())))
}

/// Koko statuses arrive upper-cased; anything that is neither a success nor
/// still pending is final.
fn map_status(status: &str) -> GatewayOutcome {
    match status.trim().to_uppercase().as_str() {
        "SUCCESS" => GatewayOutcome::Success,
        "" | "PENDING" => GatewayOutcome::Pending,
        other => GatewayOutcome::failure(other.to_lowercase()),
    }
}

impl KokoGateway {
    /// Loads the merchant private key and Koko's public key from disk.
    pub fn new(config: KokoConfig) -> Result<Self, GatewayError> {
        let private_pem = read_key(&config.merchant_private_key_path)?;
        let public_pem = read_key(&config.koko_public_key_path)?;
        Self::from_pem(config, &private_pem, &public_pem)
    }

    /// Accepts PKCS#8 or PKCS#1 PEM for either key.
    pub fn from_pem(
        config: KokoConfig,
        merchant_private_pem: &str,
        koko_public_pem: &str,
    ) -> Result<Self, GatewayError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(merchant_private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(merchant_private_pem))
            .map_err(|e| GatewayError::Misconfigured(format!("koko merchant private key: {e}")))?;
        let public_key = RsaPublicKey::from_public_key_pem(koko_public_pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(koko_public_pem))
            .map_err(|e| GatewayError::Misconfigured(format!("koko public key: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            config,
            signing_key: SigningKey::new(private_key),
            verifying_key: VerifyingKey::new(public_key),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Base64 RSA-SHA256 signature over `data` with the merchant key.
    pub fn sign(&self, data: &str) -> String {
        BASE64.encode(self.signing_key.sign(data.as_bytes()).to_bytes())
    }

    fn verify(&self, data: &str, signature_b64: &str) -> bool {
        let Ok(bytes) = BASE64.decode(signature_b64.trim()) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(bytes.as_slice()) else {
            return false;
        };
        self.verifying_key.verify(data.as_bytes(), &signature).is_ok()
    }

    /// `merchant_id + plugin_name + plugin_version + order_id + api_key`, signed.
    pub fn order_view_signature(&self, koko_order_id: &str) -> String {
        let c = &self.config;
        self.sign(
            &[
                c.merchant_id.as_str(),
                &c.plugin_name,
                &c.plugin_version,
                koko_order_id,
                &c.api_key,
            ]
            .concat(),
        )
    }

    fn order_create_fields(
        &self,
        order: &Order,
        intent: &PaymentIntent,
        koko_order_id: &str,
    ) -> BTreeMap<String, String> {
        let c = &self.config;
        let (first_name, last_name) = split_name(&order.customer().name);
        let number = order.number().as_str();
        let amount = intent.amount().to_string();
        let email = order.customer().email.clone().unwrap_or_default();
        let description = format!("Order {number}");
        let response_url = format!("{}?order={number}", c.response_url);

        // Koko fixes this concatenation order; it is not alphabetical.
        let data = [
            c.merchant_id.as_str(),
            &amount,
            intent.currency(),
            &c.plugin_name,
            &c.plugin_version,
            &c.return_url,
            &c.cancel_url,
            koko_order_id,
            number,
            &first_name,
            &last_name,
            &email,
            &description,
            &c.api_key,
            &response_url,
        ]
        .concat();
        let signature = self.sign(&data);

        let mut fields = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            fields.insert(k.to_string(), v);
        };
        put("_mId", c.merchant_id.clone());
        put("_amount", amount.clone());
        put("_currency", intent.currency().to_string());
        put("_pluginName", c.plugin_name.clone());
        put("_pluginVersion", c.plugin_version.clone());
        put("_returnUrl", c.return_url.clone());
        put("_cancelUrl", c.cancel_url.clone());
        put("_orderId", koko_order_id.to_string());
        put("_reference", number.to_string());
        put("_firstName", first_name.clone());
        put("_lastName", last_name.clone());
        put("_email", email.clone());
        put("_description", description.clone());
        put("api_key", c.api_key.clone());
        put("_responseUrl", response_url.clone());
        put("signature", signature);
        fields
    }
}

#[async_trait]
impl PaymentGateway for KokoGateway {
    fn name(&self) -> &'static str {
        KOKO_GATEWAY
    }

    async fn start(
        &self,
        order: &Order,
        intent: &PaymentIntent,
    ) -> Result<GatewayStart, GatewayError> {
        let koko_order_id = format!("KOKO-{}", intent.id());
        let fields = self.order_create_fields(order, intent, &koko_order_id);
        let action_url = self.endpoint(ORDER_CREATE_PATH);

        let mut snapshot_fields = fields.clone();
        snapshot_fields.remove("api_key");
        let request_snapshot = json!({
            "provider": KOKO_GATEWAY,
            "action_url": action_url,
            "fields": snapshot_fields,
        });

        Ok(GatewayStart {
            redirect: RedirectTarget::FormPost { action_url, fields },
            correlation_id: Some(koko_order_id),
            request_snapshot,
        })
    }

    async fn verify_callback(&self, payload: &Value) -> Result<CallbackVerification, GatewayError> {
        let order_id = field(payload, "orderId").filter(|s| !s.is_empty());
        let (Some(koko_order_id), Some(trn_id), Some(status), Some(signature)) = (
            order_id.clone(),
            field(payload, "trnId"),
            field(payload, "status"),
            field(payload, "signature"),
        ) else {
            return Ok(CallbackVerification::rejected(order_id));
        };

        let status = status.trim().to_uppercase();
        if !self.verify(&format!("{koko_order_id}{trn_id}{status}"), &signature) {
            return Ok(CallbackVerification::rejected(Some(koko_order_id)));
        }

        Ok(CallbackVerification {
            verified: true,
            correlation_id: Some(koko_order_id),
            outcome: map_status(&status),
            reported_amount: None,
            reported_currency: None,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn poll(&self, reference: &str) -> Result<PollResult, GatewayError> {
        let c = &self.config;
        let signature = self.order_view_signature(reference);
        let form = [
            ("_mId", c.merchant_id.as_str()),
            ("_pluginName", c.plugin_name.as_str()),
            ("_pluginVersion", c.plugin_version.as_str()),
            ("api_key", c.api_key.as_str()),
            ("_orderId", reference),
            ("signature", signature.as_str()),
        ];

        let mut request = self.client.post(self.endpoint(ORDER_VIEW_PATH)).form(&form);
        if let Some((user, pass)) = &c.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let raw = response.json::<Value>().await?;
        let word = field(&raw["data"], "status")
            .or_else(|| field(&raw, "status"))
            .unwrap_or_default();
        Ok(PollResult {
            outcome: map_status(&word),
            raw,
        })
    }
}
