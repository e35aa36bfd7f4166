use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use vertex_gateway::auth::StaticTokenProvider;
use vertex_gateway::billing::{
    sign_payload, InMemoryQuotaLedger, InMemoryTopUpStore, OrderStatus, QuotaLedger, StripeCheckout, TopUpOrder,
    TopUpRequester, TopUpStore, UsageSink, WebhookProcessor,
};
use vertex_gateway::endpoint::VertexCredentials;
use vertex_gateway::registry::Mode;
use vertex_gateway::translate::request::build_upstream_request;
use vertex_gateway::translate::response::parse_upstream_response;
use vertex_gateway::translate::usage::{UsageRecord, UsageUnit};
use vertex_gateway::translate::{CallerResponse, Compat, InboundKind, InboundRequest, RelayInfo};
use vertex_gateway::{build_router, AppState, CacheRatioTable, GatewayConfig, ModelRouter, Relay, RelayLog};

const WEBHOOK_SECRET: &str = "whsec_integration";
const ADMIN_TOKEN: &str = "admin-secret";

// ────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct UpstreamCall {
    path: String,
    authorization: Option<String>,
    body: Value,
    raw: String,
}

type CallLog = Arc<Mutex<Vec<UpstreamCall>>>;

#[derive(Default)]
struct CapturingSink(Mutex<Vec<(String, UsageRecord)>>);

impl UsageSink for CapturingSink {
    fn record(&self, model: &str, _mode: Mode, usage: &UsageRecord) {
        self.0.lock().push((model.to_string(), usage.clone()));
    }
}

fn gemini_reply(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP",
            "index": 0
        }],
        "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1, "totalTokenCount": 4}
    })
}

const CLAUDE_SSE: &str = "event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"claude-sonnet-4@20250514\",\"usage\":{\"input_tokens\":5,\"output_tokens\":1}}}\n\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"pong\"}}\n\n\
event: content_block_stop\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\n\
event: message_delta\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

/// Stand-in for Vertex: answers by URL shape and records every call.
async fn mock_vertex(State(calls): State<CallLog>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let path = uri.path_and_query().map(|p| p.as_str().to_string()).unwrap_or_default();
    calls.lock().push(UpstreamCall {
        path: path.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        raw: String::from_utf8_lossy(&body).into_owned(),
    });

    if path.contains("gemini-2.0-flash-lite") {
        let err = json!({"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}});
        return (StatusCode::TOO_MANY_REQUESTS, axum::Json(err)).into_response();
    }
    if path.contains(":streamRawPredict") {
        return Response::builder()
            .header("content-type", "text/event-stream")
            .body(Body::from(CLAUDE_SSE))
            .unwrap();
    }
    if path.contains(":rawPredict") {
        return axum::Json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4@20250514",
            "content": [{"type": "text", "text": "pong"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 2}
        }))
        .into_response();
    }
    if path.contains(":generateContent") {
        return axum::Json(gemini_reply("pong")).into_response();
    }
    if path.contains("/models/imagen") && path.ends_with(":predict") {
        return axum::Json(json!({
            "predictions": [
                {"bytesBase64Encoded": "AAA", "mimeType": "image/png"},
                {"bytesBase64Encoded": "", "mimeType": "image/png", "safetyAttributes": {"blocked": true}},
                {"bytesBase64Encoded": "CCC", "mimeType": "image/png"}
            ]
        }))
        .into_response();
    }
    if path.contains("embedding") && path.ends_with(":predict") {
        return axum::Json(json!({
            "predictions": [
                {"embeddings": {"values": [0.1, 0.2], "statistics": {"token_count": 3}}},
                {"embeddings": {"values": [0.3, 0.4], "statistics": {"token_count": 5}}}
            ]
        }))
        .into_response();
    }
    if path == "/v1/text:synthesize" {
        return axum::Json(json!({
            "audioContent": "SUQz",
            "audioConfig": {"audioEncoding": "MP3", "sampleRateHertz": 24000}
        }))
        .into_response();
    }
    if path == "/v1/checkout/sessions" {
        return axum::Json(json!({"id": "cs_test_1", "url": "https://checkout.stripe.test/pay/cs_test_1"}))
            .into_response();
    }
    (StatusCode::NOT_FOUND, "unexpected path").into_response()
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Harness {
    gateway: SocketAddr,
    calls: CallLog,
    usage: Arc<CapturingSink>,
    router: Arc<ModelRouter>,
    store: Arc<InMemoryTopUpStore>,
    ledger: Arc<InMemoryQuotaLedger>,
    _log_dir: tempfile::TempDir,
}

async fn start_gateway() -> Harness {
    let calls: CallLog = Arc::default();
    let upstream = spawn(Router::new().fallback(mock_vertex).with_state(calls.clone())).await;

    let usage = Arc::new(CapturingSink::default());
    let log_dir = tempfile::tempdir().unwrap();
    let relay_log = RelayLog::open(log_dir.path().join("relay.jsonl")).unwrap();
    let credentials = VertexCredentials::from_json(r#"{"project_id":"test-project"}"#).unwrap();
    let relay = Relay::new(
        reqwest::Client::new(),
        credentials,
        Arc::new(StaticTokenProvider("test-token".to_string())),
        Compat::default(),
        usage.clone(),
    )
    .with_endpoint_override(Some(format!("http://{}", upstream)))
    .with_relay_log(relay_log);

    let router = Arc::new(ModelRouter::default().with_env_lookup(|_| None));
    let store = Arc::new(InMemoryTopUpStore::default());
    let ledger = Arc::new(InMemoryQuotaLedger::default());
    let checkout = StripeCheckout::new(reqwest::Client::new(), "sk_test").with_base_url(format!("http://{}", upstream));
    let topup = TopUpRequester::new(store.clone(), 5, "http://gateway.test")
        .with_checkout(Arc::new(checkout), Some("price_test".to_string()));

    let state = Arc::new(AppState {
        config: GatewayConfig::default(),
        relay,
        router: router.clone(),
        cache_ratios: Arc::new(CacheRatioTable::default()),
        topup,
        webhook: Some(WebhookProcessor::new(WEBHOOK_SECRET, 300, store.clone(), ledger.clone())),
        admin_token: Some(ADMIN_TOKEN.to_string()),
    });
    let gateway = spawn(build_router(state)).await;

    Harness {
        gateway,
        calls,
        usage,
        router,
        store,
        ledger,
        _log_dir: log_dir,
    }
}

// ────────────────────────────────────────────────────────────────
// Translation through the public API
// ────────────────────────────────────────────────────────────────

#[test]
fn test_openai_to_gemini_round_trip() {
    let inbound = InboundRequest::Chat(
        serde_json::from_value(json!({
            "model": "gemini-2.5-pro",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "ping"}
            ],
            "temperature": 0.2
        }))
        .unwrap(),
    );
    let info = RelayInfo::resolve(inbound.model(), false, Mode::Gemini, true, "");
    let prepared = build_upstream_request(&info, inbound, &Compat::default()).unwrap();

    let body = serde_json::to_value(&prepared.body).unwrap();
    assert_eq!(body["contents"][0]["role"], "user");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "ping");
    assert!(body["systemInstruction"]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .contains("Be terse."));
    assert_eq!(body["generationConfig"]["temperature"], 0.2);

    let reply = serde_json::to_vec(&gemini_reply("pong")).unwrap();
    let (resp, usage) = parse_upstream_response(&info, InboundKind::Chat, &prepared.meta, &reply).unwrap();
    let CallerResponse::Chat(chat) = resp else {
        panic!("expected a chat completion");
    };
    assert_eq!(chat.choices[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(usage.prompt_units(), 3);
    assert_eq!(usage.total_units(), 4);
}

#[test]
fn test_claude_web_search_gets_shell_fallback() {
    let inbound = InboundRequest::Messages(
        serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 256,
            "messages": [{"role": "user", "content": "latest rust release?"}],
            "tools": [{"type": "web_search_20250305", "name": "web_search", "max_uses": 3}]
        }))
        .unwrap(),
    );
    let info = RelayInfo::resolve(inbound.model(), false, Mode::Gemini, true, "");
    assert_eq!(info.mode, Mode::Claude);

    let prepared = build_upstream_request(&info, inbound, &Compat::default()).unwrap();
    let body = serde_json::to_value(&prepared.body).unwrap();
    assert_eq!(body["anthropic_version"], "vertex-2023-10-16");
    let tools = body["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["type"], "bash_20250124");
    assert_eq!(tools[0]["name"], "bash");
}

// ────────────────────────────────────────────────────────────────
// HTTP round trips against a mock upstream
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_completion_round_trip() {
    let h = start_gateway().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/v1/chat/completions", h.gateway))
        .json(&json!({
            "model": "gemini-2.5-pro",
            "messages": [{"role": "user", "content": "ping"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "pong");

    let calls = h.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].path,
        "/v1/projects/test-project/locations/global/publishers/google/models/gemini-2.5-pro:generateContent"
    );
    assert_eq!(calls[0].authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(calls[0].body["contents"][0]["parts"][0]["text"], "ping");

    let usage = h.usage.0.lock();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].1.total_units(), 4);
}

#[tokio::test]
async fn test_claude_messages_non_streaming() {
    let h = start_gateway().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/v1/messages", h.gateway))
        .json(&json!({
            "model": "claude-sonnet-4",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "ping"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["content"][0]["text"], "pong");

    let calls = h.calls.lock().clone();
    assert!(calls[0].path.ends_with("/publishers/anthropic/models/claude-sonnet-4@20250514:rawPredict"));
    assert!(calls[0].body.get("model").is_none());
}

#[tokio::test]
async fn test_claude_messages_streaming() {
    let h = start_gateway().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/v1/messages", h.gateway))
        .json(&json!({
            "model": "claude-sonnet-4",
            "max_tokens": 64,
            "stream": true,
            "messages": [{"role": "user", "content": "ping"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("event: message_start"));
    assert!(text.contains("\"text\":\"pong\""));
    assert!(text.contains("event: message_stop"));

    let calls = h.calls.lock().clone();
    assert!(calls[0].path.ends_with(":streamRawPredict?alt=sse"));
}

#[tokio::test]
async fn test_model_command_switches_and_sticks() {
    let h = start_gateway().await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("http://{}/v1/messages", h.gateway))
        .header("X-Session-Id", "sess-42")
        .header("X-Claude-Model", "opus")
        .json(&json!({
            "model": "claude-sonnet-4",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "/model flash what is 2+2"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["type"], "message");

    let second = client
        .post(format!("http://{}/v1/messages", h.gateway))
        .header("X-Session-Id", "sess-42")
        .json(&json!({
            "model": "claude-sonnet-4",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "and 3+3?"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 200);

    let calls = h.calls.lock().clone();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert!(call.path.contains("/models/gemini-2.5-flash:generateContent"), "{}", call.path);
    }
    // The command is stripped before the message reaches the model.
    let sent = calls[0].body.to_string();
    assert!(sent.contains("what is 2+2"));
    assert!(!sent.contains("/model"));

    assert_eq!(h.router.session_model("sess-42").as_deref(), Some("gemini-2.5-flash"));
}

#[tokio::test]
async fn test_upstream_error_keeps_status() {
    let h = start_gateway().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/v1/chat/completions", h.gateway))
        .json(&json!({
            "model": "gemini-2.0-flash-lite",
            "messages": [{"role": "user", "content": "ping"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("Quota exceeded"));
    assert!(h.usage.0.lock().is_empty());
}

#[tokio::test]
async fn test_mismatched_endpoint_is_rejected_before_upstream() {
    let h = start_gateway().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/v1/images/generations", h.gateway))
        .json(&json!({"model": "gemini-2.5-pro", "prompt": "a cat"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(h.calls.lock().is_empty());
}

#[tokio::test]
async fn test_discovery_endpoints() {
    let h = start_gateway().await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{}/health", h.gateway))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let models: Value = client
        .get(format!("http://{}/v1/models", h.gateway))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["object"], "list");
    assert!(!models["data"].as_array().unwrap().is_empty());

    let router: Value = client
        .get(format!("http://{}/v1/router/models", h.gateway))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(router["default_model"], "claude-sonnet-4");
    assert!(router["aliases"].as_array().unwrap().iter().any(|a| a == "flash"));
}

// ────────────────────────────────────────────────────────────────
// Media and embeddings through the mock upstream
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_imagen_round_trip_skips_blocked_images() {
    let h = start_gateway().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/v1/images/generations", h.gateway))
        .json(&json!({"model": "imagen-3.0-generate-002", "prompt": "a lighthouse", "n": 3, "size": "1792x1024"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let images = body["data"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[1]["b64_json"], "CCC");

    let calls = h.calls.lock().clone();
    assert!(calls[0].path.ends_with("/publishers/google/models/imagen-3.0-generate-002:predict"));
    assert_eq!(calls[0].body["instances"][0]["prompt"], "a lighthouse");
    assert_eq!(calls[0].body["parameters"]["sampleCount"], 3);
    assert_eq!(calls[0].body["parameters"]["aspectRatio"], "16:9");

    let usage = h.usage.0.lock();
    assert_eq!(usage[0].1.unit(), UsageUnit::Images);
    assert_eq!(usage[0].1.prompt_units(), 2);
}

#[tokio::test]
async fn test_tts_round_trip_bills_input_characters() {
    let h = start_gateway().await;
    let input = "a".repeat(120);
    let resp = reqwest::Client::new()
        .post(format!("http://{}/v1/audio/speech", h.gateway))
        .json(&json!({"model": "text-to-speech-neural", "input": input, "voice": "nova"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"][0]["audio_base64"], "SUQz");
    assert_eq!(body["data"][0]["format"], "mp3");

    let calls = h.calls.lock().clone();
    assert_eq!(calls[0].path, "/v1/text:synthesize");
    assert_eq!(calls[0].body["voice"]["name"], "en-US-Neural2-E");

    let usage = h.usage.0.lock();
    assert_eq!(usage[0].1.unit(), UsageUnit::Characters);
    assert_eq!(usage[0].1.prompt_units(), 120);
}

#[tokio::test]
async fn test_embedding_round_trip_sums_token_counts() {
    let h = start_gateway().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/v1/embeddings", h.gateway))
        .json(&json!({"model": "text-embedding-004", "input": ["first", "second"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["usage"]["total_tokens"], 8);

    let calls = h.calls.lock().clone();
    assert!(calls[0].path.ends_with("/models/text-embedding-004:predict"));
    assert_eq!(calls[0].body["instances"][1]["content"], "second");
    assert_eq!(calls[0].body["instances"][0]["task"], "RETRIEVAL_DOCUMENT");

    let usage = h.usage.0.lock();
    assert_eq!(usage[0].1.prompt_units(), 8);
}

// ────────────────────────────────────────────────────────────────
// Admin
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_admin_cache_ratio_requires_token() {
    let h = start_gateway().await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/admin/cache-ratio", h.gateway);

    let denied = client.get(&url).send().await.unwrap();
    assert_eq!(denied.status(), 401);

    let table: Value = client
        .get(&url)
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(table["cache_ratio"]["gemini-2.5-pro"], 0.125);

    let updated = client
        .put(&url)
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({"my-model": 0.5}))
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status(), 200);
    let table: Value = updated.json().await.unwrap();
    assert_eq!(table["cache_ratio"], json!({"my-model": 0.5}));
    assert_eq!(table["cache_storage_ratio"]["gemini-2.5-pro"], 0.25);

    let rejected = client.put(&url).bearer_auth(ADMIN_TOKEN).body("nope").send().await.unwrap();
    assert_eq!(rejected.status(), 400);
}

#[tokio::test]
async fn test_admin_logs_show_relayed_requests() {
    let h = start_gateway().await;
    let client = reqwest::Client::new();
    client
        .post(format!("http://{}/v1/chat/completions", h.gateway))
        .json(&json!({"model": "gemini-2.5-pro", "messages": [{"role": "user", "content": "ping"}]}))
        .send()
        .await
        .unwrap();

    let url = format!("http://{}/admin/logs?limit=5", h.gateway);
    assert_eq!(client.get(&url).send().await.unwrap().status(), 401);

    let logs: Value = client
        .get(&url)
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = logs["entries"].as_array().unwrap();
    let relay = entries.iter().find(|e| e["component"] == "relay").unwrap();
    assert_eq!(relay["context"]["upstream_model"], "gemini-2.5-pro");
    assert_eq!(relay["context"]["caller_format"], "chat");
}

#[tokio::test]
async fn test_admin_session_endpoints() {
    let h = start_gateway().await;
    h.router.set_session_model("old", "gemini-2.5-pro", chrono::Utc::now() - chrono::Duration::hours(30));
    h.router.set_session_model("fresh", "claude-opus-4", chrono::Utc::now());
    let client = reqwest::Client::new();

    let stats: Value = client
        .get(format!("http://{}/admin/sessions/stats", h.gateway))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["sessions"], 2);

    let swept: Value = client
        .post(format!("http://{}/admin/sessions/sweep", h.gateway))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(swept["removed"], 1);
    assert_eq!(swept["remaining"], 1);
    assert_eq!(h.router.session_model("fresh").as_deref(), Some("claude-opus-4"));
}

// ────────────────────────────────────────────────────────────────
// Payments
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_webhook_redelivery_credits_once() {
    let h = start_gateway().await;
    let order = TopUpOrder::pending(7, 50);
    let trade_no = order.trade_no.clone();
    h.store.insert(order).await.unwrap();

    let payload = serde_json::to_vec(&json!({
        "type": "checkout.session.completed",
        "data": {"object": {"client_reference_id": trade_no}}
    }))
    .unwrap();
    let signature = sign_payload(&payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp()).unwrap();
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let resp = client
            .post(format!("http://{}/webhook/stripe", h.gateway))
            .header("Stripe-Signature", &signature)
            .body(payload.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "success");
    }

    assert_eq!(h.ledger.balance(7).await.unwrap(), 50);
}

#[tokio::test]
async fn test_topup_request_then_webhook_credits_user() {
    let h = start_gateway().await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/topup/stripe", h.gateway);

    let denied = client.post(&url).json(&json!({"user_id": 9, "amount": 20})).send().await.unwrap();
    assert_eq!(denied.status(), 401);

    let too_small: Value = client
        .post(&url)
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({"user_id": 9, "amount": 2}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(too_small["message"], "error");
    assert!(h.calls.lock().is_empty());

    let opened: Value = client
        .post(&url)
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({"user_id": 9, "amount": 20}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(opened["message"], "success");
    assert_eq!(opened["data"], "https://checkout.stripe.test/pay/cs_test_1");

    let call = h.calls.lock()[0].clone();
    assert_eq!(call.path, "/v1/checkout/sessions");
    assert_eq!(call.authorization.as_deref(), Some("Bearer sk_test"));
    let trade_no = call
        .raw
        .split('&')
        .find_map(|pair| pair.strip_prefix("client_reference_id="))
        .unwrap()
        .to_string();
    assert!(trade_no.starts_with("stripe_"));
    assert_eq!(h.store.get(&trade_no).await.unwrap().unwrap().status, OrderStatus::Pending);

    let payload = serde_json::to_vec(&json!({
        "type": "checkout.session.completed",
        "data": {"object": {"client_reference_id": trade_no}}
    }))
    .unwrap();
    let signature = sign_payload(&payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp()).unwrap();
    let resp = client
        .post(format!("http://{}/webhook/stripe", h.gateway))
        .header("Stripe-Signature", signature)
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    assert_eq!(h.ledger.balance(9).await.unwrap(), 20);
    assert_eq!(h.store.get(&trade_no).await.unwrap().unwrap().status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature_and_large_bodies() {
    let h = start_gateway().await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/webhook/stripe", h.gateway);

    let bad = client
        .post(&url)
        .header("Stripe-Signature", "t=1,v1=00")
        .body(r#"{"type":"checkout.session.completed"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    let huge = vec![b'x'; 70 * 1024];
    let too_large = client
        .post(&url)
        .header("Stripe-Signature", "t=1,v1=00")
        .body(huge)
        .send()
        .await
        .unwrap();
    assert_eq!(too_large.status(), 413);
}

// ────────────────────────────────────────────────────────────────
// Live Vertex (needs credentials)
// ────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires VERTEX_CREDENTIALS and VERTEX_ACCESS_TOKEN"]
async fn test_live_gemini_completion() {
    let config = GatewayConfig::default();
    let relay = Relay::new(
        reqwest::Client::new(),
        config.resolve_credentials().unwrap(),
        Arc::new(vertex_gateway::auth::EnvTokenProvider::new(config.vertex.access_token_env.clone())),
        Compat::default(),
        Arc::new(CapturingSink::default()),
    );
    let inbound = InboundRequest::Chat(
        serde_json::from_value(json!({
            "model": "gemini-2.5-flash",
            "messages": [{"role": "user", "content": "Say 'pong' and nothing else."}]
        }))
        .unwrap(),
    );
    let info = RelayInfo::resolve(inbound.model(), false, Mode::Gemini, true, "");
    let outcome = relay.relay(info, inbound).await.unwrap();
    println!("Live outcome: {outcome:?}");
    assert!(matches!(outcome, vertex_gateway::relay::RelayOutcome::Complete(_)));
}
