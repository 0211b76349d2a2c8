//! Order lookup and administration endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{Order, OrderStatus};
use engine::OrderView;
use serde::Deserialize;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct FulfillmentRequest {
    pub status: String,
}

/// GET /orders/{order_number}: order with reservations and intent log.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderView>, ApiError> {
    Ok(Json(state.orders.get(&order_number).await?))
}

/// POST /orders/{order_number}/cancel
#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_number): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orders.cancel(&order_number).await?))
}

/// POST /orders/{order_number}/fulfillment: `{"status": "on_delivery"}` etc.
#[tracing::instrument(skip(state, req))]
pub async fn fulfillment<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_number): Path<String>,
    Json(req): Json<FulfillmentRequest>,
) -> Result<Json<Order>, ApiError> {
    let target = match req.status.parse::<OrderStatus>() {
        Ok(
            status @ (OrderStatus::ReadyToPickup | OrderStatus::OnDelivery | OrderStatus::Delivered),
        ) => status,
        _ => {
            return Err(ApiError::Unprocessable(
                "The selected status is invalid.".to_string(),
            ));
        }
    };
    Ok(Json(state.orders.advance(&order_number, target).await?))
}

/// POST /orders/{order_number}/mark-paid: cash collected.
#[tracing::instrument(skip(state))]
pub async fn mark_paid<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_number): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orders.mark_paid(&order_number).await?))
}

/// POST /orders/{order_number}/refund: bookkeeping only.
#[tracing::instrument(skip(state))]
pub async fn refund<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_number): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orders.refund(&order_number).await?))
}
