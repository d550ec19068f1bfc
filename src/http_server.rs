use crate::cache::TagRevalidator;
use crate::config::Config;
use crate::error::ApiError;
use crate::queue::WebhookQueue;
use crate::router::EventHandler;
use crate::types::WebhookEnvelope;
use crate::verification::{self, MissingMaterial, SignatureScheme};
use crate::worker::{self, DrainReport, FailurePolicy};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const SIGNATURE_HEADER: &str = "x-square-hmacsha256-signature";
pub const TIMESTAMP_HEADER: &str = "x-square-hmacsha256-timestamp";

/// Request-handling knobs resolved from [`Config`] once at startup.
#[derive(Debug, Clone, Default)]
pub struct ReceiverSettings {
    pub signature_key: Option<String>,
    pub signature_scheme: SignatureScheme,
    pub test_merchant_prefix: String,
    pub process_token: Option<String>,
    pub default_limit: usize,
    pub failure_policy: FailurePolicy,
}

impl ReceiverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            signature_key: config.signature_key().map(String::from),
            signature_scheme: config.signature_scheme,
            test_merchant_prefix: config.test_merchant_prefix.clone(),
            process_token: config.process_token().map(String::from),
            default_limit: config.webhook_drain_default_limit,
            failure_policy: config.failure_policy(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    settings: Arc<ReceiverSettings>,
    queue: WebhookQueue,
    handler: Arc<dyn EventHandler>,
    cache: Arc<TagRevalidator>,
}

impl AppState {
    pub fn new(
        settings: ReceiverSettings,
        queue: WebhookQueue,
        handler: Arc<dyn EventHandler>,
        cache: Arc<TagRevalidator>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            queue,
            handler,
            cache,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/square/webhooks",
            post(receive_webhook).get(receiver_status),
        )
        .route("/api/webhooks/process", post(drain_queue))
        .route("/api/webhooks/dead-letter", get(list_dead_letters))
        .route(
            "/api/webhooks/dead-letter/{task_id}/requeue",
            post(requeue_dead_letter),
        )
        .route("/api/cache/tags", get(cache_tags))
        .with_state(state)
}

/// Serve `app` on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped gracefully");
    Ok(())
}

// ---------------------------------------------------------------------------
// Webhook receiver
// ---------------------------------------------------------------------------

async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let envelope: WebhookEnvelope =
        serde_json::from_slice(&body).map_err(|_| ApiError::InvalidJson)?;

    let signature = header_str(&headers, SIGNATURE_HEADER);
    let settings = &state.settings;

    if signature.is_none() && is_test_sender(&envelope, &settings.test_merchant_prefix) {
        info!(
            merchant_id = envelope.merchant_id.as_deref().unwrap_or_default(),
            event = envelope.event_type.as_deref().unwrap_or_default(),
            "sandbox test webhook acknowledged without verification"
        );
        return Ok(Json(json!({ "success": true, "test": true })));
    }

    let Some(secret) = settings.signature_key.as_deref() else {
        error!("SQUARE_WEBHOOK_SIGNATURE_KEY is not set; rejecting webhook");
        return Err(ApiError::Misconfigured);
    };

    let timestamp = verification::signed_timestamp(
        settings.signature_scheme,
        signature,
        header_str(&headers, TIMESTAMP_HEADER),
    )
    .map_err(|missing| match missing {
        MissingMaterial::Signature => ApiError::MissingSignature,
        MissingMaterial::Timestamp => ApiError::MissingTimestamp,
    })?;

    if !verification::verify(secret, &body, signature.unwrap_or_default(), timestamp) {
        warn!(timestamped = timestamp.is_some(), "webhook signature mismatch");
        return Err(ApiError::InvalidSignature);
    }

    let event = envelope
        .event_type
        .filter(|t| !t.trim().is_empty())
        .ok_or(ApiError::MissingEventType)?;

    info!(
        event = %event,
        event_id = envelope.event_id.as_deref().unwrap_or_default(),
        body_sha256 = %fingerprint(&body),
        queued = state.queue.is_enabled(),
        "webhook accepted"
    );

    if state.queue.is_enabled() {
        let queue = state.queue.clone();
        let data = envelope.data;
        let raw_body = String::from_utf8_lossy(&body).into_owned();
        tokio::spawn(async move {
            queue.enqueue(&event, data, Some(raw_body)).await;
        });
    } else {
        state
            .handler
            .handle(&event, &envelope.data)
            .await
            .map_err(|e| {
                error!(event = %event, error = %e, "synchronous webhook handling failed");
                ApiError::Processing(e.to_string())
            })?;
    }

    Ok(Json(json!({ "success": true })))
}

async fn receiver_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "Square webhook endpoint is active",
        "timestamp": Utc::now().to_rfc3339(),
        "queueEnabled": state.queue.is_enabled(),
    }))
}

// ---------------------------------------------------------------------------
// Drain and replay
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DrainParams {
    limit: Option<String>,
}

async fn drain_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DrainParams>,
) -> Result<Json<DrainReport>, ApiError> {
    authorize(&state.settings, &headers)?;
    if !state.queue.is_enabled() {
        return Err(ApiError::QueueDisabled);
    }

    let limit = worker::parse_limit(params.limit.as_deref(), state.settings.default_limit);
    let report = worker::drain(
        &state.queue,
        state.handler.as_ref(),
        limit,
        state.settings.failure_policy,
    )
    .await;
    Ok(Json(report))
}

async fn list_dead_letters(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state.settings, &headers)?;
    let entries = state.queue.dead_letters().await;
    Ok(Json(json!({ "count": entries.len(), "entries": entries })))
}

async fn requeue_dead_letter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state.settings, &headers)?;
    if !state.queue.is_enabled() {
        return Err(ApiError::QueueDisabled);
    }

    let requeued = state.queue.requeue_dead_letter(&task_id).await;
    let status = if requeued {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(json!({ "requeued": requeued, "id": task_id }))))
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

async fn cache_tags(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tags": state.cache.snapshot().await }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn is_test_sender(envelope: &WebhookEnvelope, prefix: &str) -> bool {
    !prefix.is_empty()
        && envelope
            .merchant_id
            .as_deref()
            .is_some_and(|id| id.starts_with(prefix))
}

/// Bearer check for operator endpoints. Open when no token is configured.
fn authorize(settings: &ReceiverSettings, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = settings.process_token.as_deref() else {
        return Ok(());
    };
    let presented = header_str(headers, header::AUTHORIZATION.as_str()).and_then(|value| {
        let mut parts = value.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
                Some(token)
            }
            _ => None,
        }
    });

    match presented {
        Some(token) if verification::secrets_match(expected, token) => Ok(()),
        _ => {
            warn!("rejected unauthorized operator request");
            Err(ApiError::Unauthorized)
        }
    }
}

fn fingerprint(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn settings_with_token(token: Option<&str>) -> ReceiverSettings {
        ReceiverSettings {
            process_token: token.map(String::from),
            ..ReceiverSettings::default()
        }
    }

    fn auth_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn open_without_configured_token() {
        assert!(authorize(&settings_with_token(None), &HeaderMap::new()).is_ok());
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let settings = settings_with_token(Some("s3cret"));
        assert!(authorize(&settings, &auth_headers("Bearer s3cret")).is_ok());
        assert!(authorize(&settings, &auth_headers("bearer s3cret")).is_ok());
        assert!(authorize(&settings, &auth_headers("Bearer   s3cret")).is_ok());
        assert!(authorize(&settings, &auth_headers("Bearer\ts3cret")).is_ok());
        assert!(authorize(&settings, &auth_headers("Bearer s3cret extra")).is_err());
        assert!(authorize(&settings, &auth_headers("Bearer s3cre")).is_err());
        assert!(authorize(&settings, &auth_headers("Bearer wrong")).is_err());
        assert!(authorize(&settings, &auth_headers("Basic s3cret")).is_err());
        assert!(authorize(&settings, &HeaderMap::new()).is_err());
    }

    #[test]
    fn test_sender_needs_non_empty_prefix() {
        let envelope: WebhookEnvelope =
            serde_json::from_value(json!({ "merchant_id": "6SSW123", "type": "order.created" }))
                .unwrap();
        assert!(is_test_sender(&envelope, "6SSW"));
        assert!(!is_test_sender(&envelope, ""));
        assert!(!is_test_sender(&envelope, "MLR"));
    }

    #[test]
    fn fingerprint_is_short_hex() {
        let fp = fingerprint(b"{}");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
