//! Inbound balance-paid webhook: signature verification over the raw body,
//! then reconciliation.

use axum::{extract::State, http::HeaderMap, response::IntoResponse, routing::post, Json, Router};
use base64::Engine;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::warn;

use crate::errors::ServiceError;
use crate::services::BalancePaidNotification;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Signature header carrying the base64 HMAC-SHA256 digest of the raw body.
pub const SIGNATURE_HEADER: &str = "x-signature";

#[utoipa::path(
    post,
    path = "/api/v1/webhooks/balance-paid",
    request_body = String,
    responses(
        (status = 200, description = "Notification applied (or recognized redelivery)"),
        (status = 401, description = "Missing or invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Payload invalid or no order identifier resolvable", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order has no partial payment record", body = crate::errors::ErrorResponse),
        (status = 502, description = "Commerce gateway failure; sender should redeliver", body = crate::errors::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn balance_paid_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Signature is computed over the exact raw bytes; nothing is parsed
    // before verification passes.
    authenticate(&state, &headers, &body)?;

    let notification: BalancePaidNotification = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook body: {}", e)))?;

    let outcome = state
        .services
        .reconciler
        .process_balance_paid(&notification)
        .await?;

    Ok(Json(json!({
        "success": true,
        "order_id": outcome.order_id,
        "payment_status": outcome.payment_status,
        "already_applied": outcome.already_applied,
    })))
}

fn authenticate(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), ServiceError> {
    let secret = match &state.config.webhook_secret {
        Some(secret) => secret,
        None => {
            // Unsigned webhooks pass only as an explicit development choice.
            if state.config.allow_unsigned_webhooks && state.config.is_development() {
                warn!("Accepting unsigned webhook (development fallback)");
                return Ok(());
            }
            return Err(ServiceError::Unauthorized(
                "no webhook secret configured".into(),
            ));
        }
    };

    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing signature header".into()))?;

    if verify_signature(secret, body, provided) {
        Ok(())
    } else {
        warn!("Webhook signature verification failed");
        Err(ServiceError::Unauthorized("invalid signature".into()))
    }
}

/// Base64-encoded HMAC-SHA256 of the raw body, compared in constant time.
pub fn verify_signature(secret: &str, body: &[u8], provided: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, provided)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/balance-paid", post(balance_paid_webhook))
}
