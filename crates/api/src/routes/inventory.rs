//! Stock intake and inspection.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::VariantId;
use domain::StockLevel;
use serde::Deserialize;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ReceiveRequest {
    pub variant_id: VariantId,
    /// Units added; negative for a correction.
    pub quantity: i64,
    pub location_code: Option<String>,
}

/// POST /inventory/receive
#[tracing::instrument(skip(state, req), fields(variant_id = %req.variant_id))]
pub async fn receive<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ReceiveRequest>,
) -> Result<Json<StockLevel>, ApiError> {
    if req.quantity == 0 {
        return Err(ApiError::Unprocessable(
            "The quantity must not be zero.".to_string(),
        ));
    }
    let level = state
        .ledger
        .receive(req.variant_id, req.quantity, req.location_code.as_deref())
        .await?;
    Ok(Json(level))
}

/// GET /inventory/levels/{variant_id}
#[tracing::instrument(skip(state))]
pub async fn levels<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(variant_id): Path<String>,
) -> Result<Json<Vec<StockLevel>>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&variant_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(Json(state.ledger.levels(VariantId::from(uuid)).await?))
}
