//! HTTP handlers, one module per resource.

pub mod checkout;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod orders;
pub mod payments;
pub mod webhooks;

use axum::http::HeaderMap;

/// Header carrying the guest cart token.
pub const GUEST_TOKEN_HEADER: &str = "x-guest-token";

pub(crate) fn guest_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(GUEST_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
