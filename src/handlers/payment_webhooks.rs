use axum::{extract::State, http::HeaderMap, response::Json, routing::post, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::webhooks::SIGNATURE_HEADER;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookReceipt {
    pub received: bool,
    pub event_type: String,
    /// False when the event referenced no known order
    pub matched: bool,
}

pub fn payment_webhook_routes() -> Router<AppState> {
    Router::new().route("/payments", post(payment_webhook))
}

// POST /api/v1/webhooks/payments
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/payments",
    request_body = String,
    params(("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")),
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookReceipt),
        (status = 400, description = "Missing or invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReceipt>, ServiceError> {
    // A missing header takes the same rejection path as a bad one.
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    let ack = state.webhooks.process_event(&body, signature).await?;

    Ok(Json(WebhookReceipt {
        received: true,
        event_type: ack.event_type,
        matched: ack.matched,
    }))
}
