use crate::billing::{TopUpRequester, WebhookOutcome, WebhookProcessor};
use crate::cache_ratio::{CacheRatioSnapshot, CacheRatioTable};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::logging::MAX_LOG_ENTRIES;
use crate::registry;
use crate::relay::{Relay, RelayOutcome};
use crate::router::{ModelRouter, RouteRequest};
use crate::translate::response::error_body;
use crate::translate::{InboundKind, InboundRequest, RelayInfo};

use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const WEBHOOK_BODY_LIMIT: usize = 64 * 1024;
pub const SESSION_HEADER: &str = "x-session-id";

pub struct AppState {
    pub config: GatewayConfig,
    pub relay: Relay,
    pub router: Arc<ModelRouter>,
    pub cache_ratios: Arc<CacheRatioTable>,
    /// Shares its order store with `webhook`.
    pub topup: TopUpRequester,
    /// `None` when no webhook secret is configured.
    pub webhook: Option<WebhookProcessor>,
    /// `None` leaves `/admin/*` open.
    pub admin_token: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/images/generations", post(handle_images))
        .route("/v1/audio/speech", post(handle_speech))
        .route("/v1/embeddings", post(handle_embeddings))
        .route("/v1/models", get(handle_models))
        .route("/v1/router/models", get(handle_router_models))
        .route("/health", get(handle_health))
        .route("/admin/cache-ratio", get(handle_get_cache_ratio).put(handle_put_cache_ratio))
        .route("/admin/sessions/sweep", post(handle_sweep_sessions))
        .route("/admin/sessions/stats", get(handle_session_stats))
        .route("/admin/logs", get(handle_recent_logs))
        .route("/topup/stripe", post(handle_topup_request))
        .route(
            "/webhook/stripe",
            post(handle_stripe_webhook).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Relay endpoints
// ---------------------------------------------------------------------------

async fn handle_chat(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    match serde_json::from_slice(&body) {
        Ok(req) => relay_inbound(state, &headers, InboundRequest::Chat(req)).await,
        Err(e) => invalid_body(InboundKind::Chat, e),
    }
}

async fn handle_messages(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    match serde_json::from_slice(&body) {
        Ok(req) => relay_inbound(state, &headers, InboundRequest::Messages(req)).await,
        Err(e) => invalid_body(InboundKind::Messages, e),
    }
}

async fn handle_images(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    match serde_json::from_slice(&body) {
        Ok(req) => relay_inbound(state, &headers, InboundRequest::Image(req)).await,
        Err(e) => invalid_body(InboundKind::Image, e),
    }
}

async fn handle_speech(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    match serde_json::from_slice(&body) {
        Ok(req) => relay_inbound(state, &headers, InboundRequest::Audio(req)).await,
        Err(e) => invalid_body(InboundKind::Audio, e),
    }
}

async fn handle_embeddings(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    match serde_json::from_slice(&body) {
        Ok(req) => relay_inbound(state, &headers, InboundRequest::Embedding(req)).await,
        Err(e) => invalid_body(InboundKind::Embedding, e),
    }
}

fn invalid_body(kind: InboundKind, e: serde_json::Error) -> Response {
    tracing::warn!(error = %e, ?kind, "rejected request body");
    let body = error_body(kind, "invalid_request_error", format!("Invalid request body: {}", e));
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Session routing for the chat endpoints. Rewrites the model and strips a `/model` command.
fn apply_routing(state: &AppState, headers: &HeaderMap, inbound: &mut InboundRequest) {
    if !matches!(inbound.kind(), InboundKind::Chat | InboundKind::Messages) {
        return;
    }

    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .or_else(|| inbound.session_hint())
        .map(str::to_string);

    let decision = state.router.route(&RouteRequest {
        session_id: session_id.as_deref(),
        latest_user_message: inbound.latest_user_text(),
        headers: &header_pairs,
        requested_model: Some(inbound.model()),
    });
    tracing::debug!(model = %decision.model, source = ?decision.source, "route decided");

    if let Some(remaining) = decision.stripped_message {
        let text = if remaining.is_empty() {
            format!("(model switched to {})", decision.model)
        } else {
            remaining
        };
        inbound.replace_latest_user_text(text);
    }
    if decision.model != inbound.model() {
        inbound.set_model(decision.model);
    }
}

async fn relay_inbound(state: Arc<AppState>, headers: &HeaderMap, mut inbound: InboundRequest) -> Response {
    let kind = inbound.kind();
    apply_routing(&state, headers, &mut inbound);

    let vertex = &state.config.vertex;
    let info = RelayInfo::resolve(
        inbound.model(),
        inbound.is_stream(),
        vertex.default_mode,
        vertex.thinking_adapter,
        &vertex.region,
    );

    match state.relay.relay(info, inbound).await {
        Ok(RelayOutcome::Complete(resp)) => Json(resp).into_response(),
        Ok(RelayOutcome::Stream(events)) => {
            let event_stream = events.map(|sse| -> std::result::Result<Event, Infallible> {
                let event = Event::default().data(sse.data);
                Ok(match sse.event {
                    Some(name) => event.event(name),
                    None => event,
                })
            });
            Sse::new(event_stream).keep_alive(KeepAlive::default()).into_response()
        }
        Ok(RelayOutcome::UpstreamError { status, body }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(body)).into_response()
        }
        Err(e) => error_response(kind, &e),
    }
}

fn error_response(kind: InboundKind, e: &GatewayError) -> Response {
    tracing::error!(error = %e, "relay failed");
    let status = StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error_body(kind, e.error_type(), e.to_string()))).into_response()
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models() -> Json<Value> {
    let models: Vec<Value> = registry::model_list()
        .into_iter()
        .map(|id| json!({ "id": id, "object": "model", "owned_by": "vertex-ai" }))
        .collect();
    Json(json!({ "data": models, "object": "list" }))
}

async fn handle_router_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "default_model": state.router.default_model(),
        "aliases": ModelRouter::supported_aliases(),
        "help": ModelRouter::help_message(),
    }))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

fn require_admin(state: &AppState, headers: &HeaderMap) -> Option<Response> {
    let expected = state.admin_token.as_deref()?;
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if presented == Some(expected) {
        None
    } else {
        Some((StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response())
    }
}

async fn handle_get_cache_ratio(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(denied) = require_admin(&state, &headers) {
        return denied;
    }
    Json(state.cache_ratios.snapshot().as_ref().clone()).into_response()
}

/// A body with any of the three table keys replaces the whole table; a flat
/// model-to-ratio object replaces only the read ratios.
async fn handle_put_cache_ratio(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(denied) = require_admin(&state, &headers) {
        return denied;
    }
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return bad_request(format!("Invalid JSON: {}", e)),
    };
    let is_document = ["cache_ratio", "create_cache_ratio", "cache_storage_ratio"]
        .iter()
        .any(|key| value.get(*key).map_or(false, Value::is_object));

    let result = if is_document {
        serde_json::from_value::<CacheRatioSnapshot>(value)
            .map_err(GatewayError::from)
            .map(|snapshot| state.cache_ratios.replace(snapshot))
    } else {
        state.cache_ratios.update_cache_ratio_json(&String::from_utf8_lossy(&body))
    };

    match result {
        Ok(()) => {
            tracing::info!(full = is_document, "cache ratio table updated");
            Json(state.cache_ratios.snapshot().as_ref().clone()).into_response()
        }
        Err(e) => bad_request(format!("Invalid cache ratio table: {}", e)),
    }
}

async fn handle_sweep_sessions(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(denied) = require_admin(&state, &headers) {
        return denied;
    }
    let removed = state.router.sweep_expired(chrono::Utc::now());
    Json(json!({ "removed": removed, "remaining": state.router.session_count() })).into_response()
}

async fn handle_session_stats(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(denied) = require_admin(&state, &headers) {
        return denied;
    }
    Json(json!({
        "sessions": state.router.session_count(),
        "models": state.router.usage_stats(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

/// Newest relay-log entries first.
async fn handle_recent_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Response {
    if let Some(denied) = require_admin(&state, &headers) {
        return denied;
    }
    let limit = query.limit.unwrap_or(100).min(MAX_LOG_ENTRIES);
    let entries = state.relay.relay_log().map(|log| log.recent(limit)).unwrap_or_default();
    Json(json!({ "entries": entries })).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TopUpRequest {
    user_id: i64,
    amount: i64,
}

/// Opens a checkout page for a top-up. Callers act for the user, so this
/// sits behind the admin token.
async fn handle_topup_request(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(denied) = require_admin(&state, &headers) {
        return denied;
    }
    let req: TopUpRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            tracing::debug!(error = %e, "invalid top-up request");
            return Json(json!({ "message": "error", "data": "Invalid parameters" })).into_response();
        }
    };

    match state.topup.request(req.user_id, req.amount).await {
        Ok(url) => Json(json!({ "message": "success", "data": url })).into_response(),
        Err(message) => Json(json!({ "message": "error", "data": message })).into_response(),
    }
}

async fn handle_stripe_webhook(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(ref webhook) = state.webhook else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "webhook not configured" })),
        )
            .into_response();
    };

    let signature = headers.get("stripe-signature").and_then(|v| v.to_str().ok());
    match webhook.handle(signature, &body).await {
        Ok(WebhookOutcome::OrderNotFound { .. }) => {
            (StatusCode::OK, Json(json!({ "error": "topup not found" }))).into_response()
        }
        Ok(_) => (StatusCode::OK, Json(json!({ "message": "success" }))).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "webhook rejected");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": "webhook error" }))).into_response()
        }
    }
}
