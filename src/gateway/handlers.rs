use super::AppState;
use super::signature::verify_signature;
use crate::error::WebhookError;
use crate::webhook::{normalize, route_event};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::json;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn error_body(error: &str) -> Json<serde_json::Value> {
    Json(json!({"success": false, "error": error}))
}

/// GET /health: store connectivity probe, no secrets leaked
pub(super) async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "database": "ok"})),
        ),
        Err(error) => {
            tracing::error!(error = %error, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "degraded", "database": "unreachable"})),
            )
        }
    }
}

/// POST /webhook: main ingestion endpoint.
///
/// The body is consumed as raw bytes: the signature covers the exact wire
/// payload, so parsing must come second. Malformed payloads and signature
/// failures are acknowledged with HTTP 200 and `success:false`; the
/// vendor's redelivery contract keys on the body, not the status.
pub(super) async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if body.is_empty() {
        tracing::warn!("empty webhook payload received");
        return (
            StatusCode::OK,
            error_body(&WebhookError::EmptyPayload.to_string()),
        );
    }

    // ── Signature over the raw bytes (legacy X-Signature accepted) ──
    let signature = header_str(&headers, "X-Webhook-Signature")
        .or_else(|| header_str(&headers, "X-Signature"))
        .unwrap_or("");
    if !verify_signature(state.webhook_secret.as_deref(), &body, signature) {
        tracing::warn!(
            signature = if signature.is_empty() { "missing" } else { "invalid" },
            "webhook signature verification failed"
        );
        return (
            StatusCode::OK,
            error_body(&WebhookError::InvalidSignature.to_string()),
        );
    }

    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        tracing::warn!("invalid JSON webhook payload");
        return (
            StatusCode::OK,
            error_body(&WebhookError::InvalidJson.to_string()),
        );
    };

    let header_event = header_str(&headers, "X-Webhook-Event");
    let header_session = header_str(&headers, "X-Webhook-Session");

    let envelope = match normalize(header_event, header_session, &payload) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(error = %error, "webhook payload failed normalization");
            return (StatusCode::OK, error_body("Invalid data"));
        }
    };

    match route_event(&state.store, state.media.as_ref(), &envelope).await {
        Ok(outcome) => {
            let body = json!({
                "success": true,
                "received": true,
                "processed": outcome,
                "event": envelope.event_name,
            });
            (StatusCode::OK, Json(body))
        }
        Err(error) => {
            tracing::error!(
                event = envelope.event_name.as_str(),
                error = %error,
                "webhook processing failed"
            );
            (StatusCode::OK, error_body(&error.to_string()))
        }
    }
}
