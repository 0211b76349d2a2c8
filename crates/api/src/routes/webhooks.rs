//! Gateway callbacks. Always answered with 200 so providers stop retrying;
//! anything that cannot be applied is logged and ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{FromRequest, Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::{Form, Json};
use engine::WebhookAck;
use serde_json::Value;
use store::Store;

use crate::AppState;

/// Reads a form-encoded or JSON body into a JSON object.
async fn payload(request: Request) -> Option<Value> {
    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        let Form(fields) = Form::<BTreeMap<String, String>>::from_request(request, &())
            .await
            .ok()?;
        serde_json::to_value(fields).ok()
    } else {
        let Json(value) = Json::<Value>::from_request(request, &()).await.ok()?;
        Some(value)
    }
}

/// POST /webhooks/{provider}
#[tracing::instrument(skip(state, request))]
pub async fn receive<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(provider): Path<String>,
    request: Request,
) -> Json<WebhookAck> {
    let Some(payload) = payload(request).await else {
        tracing::warn!("unreadable webhook body");
        metrics::counter!("webhooks_rejected_total", "provider" => provider, "reason" => "unreadable_body")
            .increment(1);
        return Json(WebhookAck {
            ok: true,
            message: "Invalid payload (ignored)".to_string(),
        });
    };

    match state.payments.handle_webhook(&provider, payload).await {
        Ok(ack) => Json(ack),
        Err(e) => {
            tracing::error!(error = %e, "webhook processing failed");
            Json(WebhookAck {
                ok: true,
                message: "Processing failed (logged)".to_string(),
            })
        }
    }
}
