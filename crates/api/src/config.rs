//! Application configuration loaded from environment variables.

use std::path::PathBuf;

use common::Money;
use engine::{
    CheckoutSettings, KokoConfig, OnePayConfig, PayHereConfig, PayHereMode, PaymentSettings,
};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: Postgres connection; absent means the in-memory store
/// - `MAIN_LOCATION_CODE`: location checkout reserves at (default `MAIN_SHOP`)
/// - `DEFAULT_CURRENCY`, `DELIVERY_FEE_CENTS`: checkout pricing
/// - `RESERVATION_TTL_MINUTES`, `REAPER_INTERVAL_SECS`: abandoned checkout expiry
/// - `PAYMENT_RELEASE_ON_FAILURE`: release stock and cancel on a failed payment
/// - `PAYHERE_*`, `ONEPAY_*`, `KOKO_*`, `MOCK_GATEWAY_SECRET`: gateway
///   credentials. A gateway is only registered when its required settings are
///   present.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub main_location_code: String,
    pub default_currency: String,
    pub delivery_fee_cents: i64,
    pub reservation_ttl_minutes: i64,
    pub reaper_interval_secs: u64,
    pub release_on_failure: bool,
    pub payhere: Option<PayHereConfig>,
    pub onepay: Option<OnePayConfig>,
    pub koko: Option<KokoConfig>,
    pub mock_gateway_secret: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let payhere = match (get("PAYHERE_MERCHANT_ID"), get("PAYHERE_MERCHANT_SECRET")) {
            (Some(merchant_id), Some(merchant_secret)) => Some(PayHereConfig {
                merchant_id,
                merchant_secret,
                mode: get("PAYHERE_MODE")
                    .map(|m| PayHereMode::parse(&m))
                    .unwrap_or(PayHereMode::Sandbox),
                return_url: get("PAYHERE_RETURN_URL").unwrap_or_default(),
                cancel_url: get("PAYHERE_CANCEL_URL").unwrap_or_default(),
                notify_url: get("PAYHERE_NOTIFY_URL").unwrap_or_default(),
            }),
            _ => None,
        };

        let onepay = match (get("ONEPAY_APP_ID"), get("ONEPAY_HASH_SALT")) {
            (Some(app_id), Some(hash_salt)) => Some(OnePayConfig {
                app_id,
                hash_salt,
                base_url: get("ONEPAY_BASE_URL")
                    .unwrap_or_else(|| "https://api.onepay.lk".to_string()),
                redirect_url: get("ONEPAY_REDIRECT_URL").unwrap_or_default(),
            }),
            _ => None,
        };

        let koko = match (
            get("KOKO_MERCHANT_ID"),
            get("KOKO_API_KEY"),
            get("KOKO_MERCHANT_PRIVATE_KEY_PATH"),
            get("KOKO_PUBLIC_KEY_PATH"),
        ) {
            (Some(merchant_id), Some(api_key), Some(private_key), Some(public_key)) => {
                Some(KokoConfig {
                    base_url: get("KOKO_BASE_URL")
                        .unwrap_or_else(|| "https://prodapi.paykoko.com".to_string()),
                    merchant_id,
                    api_key,
                    plugin_name: get("KOKO_PLUGIN_NAME").unwrap_or_else(|| "customapi".to_string()),
                    plugin_version: get("KOKO_PLUGIN_VERSION")
                        .unwrap_or_else(|| "1.0.1".to_string()),
                    basic_auth: get("KOKO_AUTH_USER").zip(get("KOKO_AUTH_PASS")),
                    merchant_private_key_path: PathBuf::from(private_key),
                    koko_public_key_path: PathBuf::from(public_key),
                    return_url: get("KOKO_RETURN_URL").unwrap_or_default(),
                    cancel_url: get("KOKO_CANCEL_URL").unwrap_or_default(),
                    response_url: get("KOKO_RESPONSE_URL").unwrap_or_default(),
                })
            }
            _ => None,
        };

        Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_value(get("PORT")).unwrap_or(defaults.port),
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: get("DATABASE_URL"),
            main_location_code: get("MAIN_LOCATION_CODE").unwrap_or(defaults.main_location_code),
            default_currency: get("DEFAULT_CURRENCY")
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or(defaults.default_currency),
            delivery_fee_cents: parse_value(get("DELIVERY_FEE_CENTS")).unwrap_or(defaults.delivery_fee_cents),
            reservation_ttl_minutes: parse_value(get("RESERVATION_TTL_MINUTES"))
                .unwrap_or(defaults.reservation_ttl_minutes),
            reaper_interval_secs: parse_value(get("REAPER_INTERVAL_SECS"))
                .unwrap_or(defaults.reaper_interval_secs),
            release_on_failure: get("PAYMENT_RELEASE_ON_FAILURE")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.release_on_failure),
            payhere,
            onepay,
            koko,
            mock_gateway_secret: get("MOCK_GATEWAY_SECRET"),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn checkout_settings(&self) -> CheckoutSettings {
        CheckoutSettings {
            default_currency: self.default_currency.clone(),
            delivery_fee: Money::from_cents(self.delivery_fee_cents),
        }
    }

    pub fn payment_settings(&self) -> PaymentSettings {
        PaymentSettings {
            release_on_failure: self.release_on_failure,
        }
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reservation_ttl_minutes)
    }

    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}

/// Parses a trimmed value; unparseable values count as unset.
fn parse_value<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            main_location_code: "MAIN_SHOP".to_string(),
            default_currency: "LKR".to_string(),
            delivery_fee_cents: 30_000,
            reservation_ttl_minutes: 60,
            reaper_interval_secs: 60,
            release_on_failure: true,
            payhere: None,
            onepay: None,
            koko: None,
            mock_gateway_secret: None,
        }
    }
}
