//! Payment start and gateway status polling.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use engine::{PaymentStart, PaymentStatusView};
use serde::Deserialize;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct StartPaymentRequest {
    pub order_number: String,
    pub payment_method_code: String,
}

/// POST /payments/start: start (or resume) paying an order.
#[tracing::instrument(skip(state, req), fields(order_number = %req.order_number))]
pub async fn start<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<StartPaymentRequest>,
) -> Result<Json<PaymentStart>, ApiError> {
    let started = state
        .payments
        .start(&req.order_number, &req.payment_method_code)
        .await?;
    Ok(Json(started))
}

/// GET /payments/{order_number}/status: ask the gateway and apply its answer.
#[tracing::instrument(skip(state))]
pub async fn status<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_number): Path<String>,
) -> Result<Json<PaymentStatusView>, ApiError> {
    Ok(Json(state.payments.poll(&order_number).await?))
}
