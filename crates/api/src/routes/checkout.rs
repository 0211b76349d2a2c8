//! Guest cart intake and checkout.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use domain::{Order, PaymentIntent};
use engine::{Cart, CartLine, CheckoutRequest, EngineError};
use serde::{Deserialize, Serialize};
use store::Store;

use super::guest_token;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CartRequest {
    #[serde(default)]
    pub currency: String,
    pub lines: Vec<CartLine>,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub token: String,
    pub lines: usize,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order: Order,
    pub payment_intent: Option<PaymentIntent>,
}

/// PUT /cart: store the guest cart behind `X-Guest-Token`.
#[tracing::instrument(skip(state, headers, req))]
pub async fn put_cart<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CartRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let token = guest_token(&headers)
        .ok_or_else(|| ApiError::BadRequest("Missing X-Guest-Token header".to_string()))?;
    let lines = req.lines.len();
    state.carts.put(Cart {
        token: token.clone(),
        currency: req.currency.to_ascii_uppercase(),
        lines: req.lines,
    });
    Ok(Json(CartResponse { token, lines }))
}

/// POST /checkout: turn the guest cart into a pending order with stock held.
///
/// When the request names an in-person method, that payment is started
/// straight away and its intent returned alongside the order.
#[tracing::instrument(skip(state, headers, req))]
pub async fn checkout<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let token = guest_token(&headers).ok_or(EngineError::EmptyCart)?;
    let order = state.checkout.checkout(&token, &req).await?;

    let immediate = req
        .payment_method_code
        .as_deref()
        .filter(|code| state.payments.method(code).is_some_and(|m| m.is_immediate()));
    let Some(code) = immediate else {
        return Ok((
            StatusCode::CREATED,
            Json(CheckoutResponse {
                order,
                payment_intent: None,
            }),
        ));
    };

    match state.payments.start(order.number().as_str(), code).await {
        Ok(started) => Ok((
            StatusCode::CREATED,
            Json(CheckoutResponse {
                order: started.order,
                payment_intent: Some(started.payment_intent),
            }),
        )),
        Err(e) => {
            tracing::error!(
                order_number = %order.number(),
                error = %e,
                "order placed but in-person payment not started"
            );
            Ok((
                StatusCode::CREATED,
                Json(CheckoutResponse {
                    order,
                    payment_intent: None,
                }),
            ))
        }
    }
}
