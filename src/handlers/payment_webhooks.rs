//! Inbound payment webhook: the reconciliation path for order finalization.
//!
//! The provider notifies us of completed sessions independently of the
//! customer's browser, so a finalize here must tolerate having already run
//! on the success-callback path (and vice versa).

use crate::{errors::ServiceError, AppState};
use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.clone() {
        let tolerance = state.config.payment_webhook_tolerance_secs.unwrap_or(300);
        if !verify_signature(&headers, &body, &secret, tolerance) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let json: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    // Exactly-once processing per provider event id.
    if let Some(event_id) = json.get("id").and_then(|v| v.as_str()) {
        let key = format!("wh:{}", event_id);
        let claimed = state
            .cache
            .set_if_absent(&key, "1", Some(Duration::from_secs(24 * 3600)))
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;
        if !claimed {
            info!("Webhook event {} already processed", event_id);
            return Ok((axum::http::StatusCode::OK, "ok"));
        }
    }

    let event_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match event_type {
        "checkout.session.completed" | "payment.succeeded" | "charge.succeeded" => {
            match session_ref_from_payload(&json) {
                Some(session_ref) => match state.services.orders.reconcile(&session_ref).await {
                    Ok(order) => {
                        info!(order_id = %order.id, "Webhook reconciled session {}", session_ref);
                    }
                    Err(err) => {
                        // The provider retries; a missing pending context now
                        // may resolve once the session registry catches up.
                        warn!("Webhook reconciliation failed for {}: {}", session_ref, err);
                    }
                },
                None => warn!("Payment webhook without a session reference"),
            }
        }
        "payment.failed" | "charge.failed" => {
            info!("Payment failure reported by webhook");
        }
        other => {
            info!("Unhandled payment webhook type: {}", other);
        }
    }

    Ok((axum::http::StatusCode::OK, "ok"))
}

fn session_ref_from_payload(json: &Value) -> Option<String> {
    json.pointer("/data/object/id")
        .or_else(|| json.get("session_id"))
        .or_else(|| json.get("session_ref"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub(crate) fn verify_signature(
    headers: &HeaderMap,
    payload: &Bytes,
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    // Generic HMAC: x-timestamp and x-signature headers
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            if let Ok(ts_i) = ts.parse::<i64>() {
                let now = chrono::Utc::now().timestamp();
                if (now - ts_i).unsigned_abs() > tolerance_secs {
                    return false;
                }
            }
            let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
            let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
                Ok(mac) => mac,
                Err(_) => return false,
            };
            mac.update(signed.as_bytes());
            let expected = hex::encode(mac.finalize().into_bytes());
            return constant_time_eq(&expected, sig);
        }
    }
    // Stripe-style support: Stripe-Signature with t=, v1=
    if let Some(sig) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) {
        let mut ts = "";
        let mut v1 = "";
        for part in sig.split(',') {
            let mut it = part.split('=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => ts = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }
        if !ts.is_empty() && !v1.is_empty() {
            let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
            let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
                Ok(mac) => mac,
                Err(_) => return false,
            };
            mac.update(signed.as_bytes());
            let expected = hex::encode(mac.finalize().into_bytes());
            return constant_time_eq(&expected, v1);
        }
    }
    false
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
