//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use engine::{EngineError, GatewayError};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Malformed request (bad header, unparsable id).
    BadRequest(String),
    /// Well-formed request the business rules reject.
    Unprocessable(String),
    /// Duplicate write.
    Conflict(String),
    /// A payment gateway failed or answered nonsense.
    BadGateway(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => {
                tracing::warn!(error = %msg, "payment gateway error");
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

/// Aggregate rejections surface with the aggregate's own wording.
fn domain_message(err: &DomainError) -> String {
    match err {
        DomainError::Order(e) => e.to_string(),
        DomainError::Intent(e) => e.to_string(),
        DomainError::Ledger(e) => e.to_string(),
        DomainError::UnknownValue(e) => e.to_string(),
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::EmptyCart
            | EngineError::ItemUnavailable
            | EngineError::InsufficientStock { .. }
            | EngineError::Validation(_)
            | EngineError::UnknownPaymentMethod(_)
            | EngineError::GatewayNotConfigured(_) => ApiError::Unprocessable(err.to_string()),
            EngineError::Domain(ref e) => ApiError::Unprocessable(domain_message(e)),
            EngineError::OrderNotFound(_)
            | EngineError::LocationNotFound(_)
            | EngineError::VariantNotFound(_)
            | EngineError::NoGatewayTransaction => ApiError::NotFound(err.to_string()),
            EngineError::Gateway(e) => e.into(),
            EngineError::Store(e) => e.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unsupported { .. } => ApiError::Unprocessable(err.to_string()),
            GatewayError::Misconfigured(_) => ApiError::Internal(err.to_string()),
            _ => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StoreError::Conflict(_) => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
