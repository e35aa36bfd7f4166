use crate::auth::AccessTokenProvider;
use crate::billing::UsageSink;
use crate::endpoint::{request_url, VertexCredentials};
use crate::error::{GatewayError, Result};
use crate::logging::RelayLog;
use crate::translate::request::build_upstream_request;
use crate::translate::response::{map_upstream_error, parse_upstream_response, truncate};
use crate::translate::streaming::{stream_translator, SseEvent, StreamTranslate};
use crate::translate::{CallerResponse, Compat, InboundRequest, RelayInfo};

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;

/// Caller-format SSE events, ending once the upstream stream ends.
pub type SseStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

/// Outcome of relaying one request.
pub enum RelayOutcome {
    Complete(CallerResponse),
    Stream(SseStream),
    /// Vendor status >= 400, already mapped into the caller's error schema.
    UpstreamError { status: u16, body: serde_json::Value },
}

impl std::fmt::Debug for RelayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayOutcome::Complete(resp) => f.debug_tuple("Complete").field(resp).finish(),
            RelayOutcome::Stream(_) => f.write_str("Stream(..)"),
            RelayOutcome::UpstreamError { status, body } => f
                .debug_struct("UpstreamError")
                .field("status", status)
                .field("body", body)
                .finish(),
        }
    }
}

/// Sends translated requests to Vertex and translates what comes back.
pub struct Relay {
    client: reqwest::Client,
    credentials: VertexCredentials,
    tokens: Arc<dyn AccessTokenProvider>,
    endpoint_override: Option<String>,
    compat: Compat,
    usage_sink: Arc<dyn UsageSink>,
    relay_log: Option<RelayLog>,
}

impl Relay {
    pub fn new(
        client: reqwest::Client,
        credentials: VertexCredentials,
        tokens: Arc<dyn AccessTokenProvider>,
        compat: Compat,
        usage_sink: Arc<dyn UsageSink>,
    ) -> Self {
        Self {
            client,
            credentials,
            tokens,
            endpoint_override: None,
            compat,
            usage_sink,
            relay_log: None,
        }
    }

    pub fn with_endpoint_override(mut self, base: Option<String>) -> Self {
        self.endpoint_override = base;
        self
    }

    pub fn with_relay_log(mut self, log: RelayLog) -> Self {
        self.relay_log = Some(log);
        self
    }

    pub fn relay_log(&self) -> Option<&RelayLog> {
        self.relay_log.as_ref()
    }

    pub fn project_id(&self) -> &str {
        &self.credentials.project_id
    }

    pub async fn relay(&self, info: RelayInfo, inbound: InboundRequest) -> Result<RelayOutcome> {
        let kind = inbound.kind();
        let prepared = build_upstream_request(&info, inbound, &self.compat)?;
        let translator = if info.is_stream {
            Some(stream_translator(&info, kind, &prepared.meta)?)
        } else {
            None
        };

        if let Some(ref log) = self.relay_log {
            log.record_relay(&info, kind, &prepared.meta);
        }

        let url = request_url(&info, &self.credentials.project_id, self.endpoint_override.as_deref());
        let token = self.tokens.access_token(&self.credentials).await?;

        tracing::info!(
            model = %info.origin_model,
            upstream = %info.upstream_model,
            mode = %info.mode,
            region = %info.region,
            stream = info.is_stream,
            "relaying request"
        );
        tracing::debug!(%url, "upstream url");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .json(&prepared.body)
            .send()
            .await
            .map_err(|e| GatewayError::provider(format!("Request failed: {}", e)))?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.bytes().await.unwrap_or_default();
            let body_text = String::from_utf8_lossy(&body);
            tracing::warn!(status, model = %info.origin_model, body = truncate(&body_text, 300), "upstream error");
            if let Some(ref log) = self.relay_log {
                log.warn("relay", format!("{} returned status {}", info.upstream_model, status));
            }
            return Ok(RelayOutcome::UpstreamError {
                status,
                body: map_upstream_error(kind, status, &body),
            });
        }

        if let Some(translator) = translator {
            let events = translate_stream(
                response.bytes_stream(),
                translator,
                info,
                self.usage_sink.clone(),
                self.relay_log.clone(),
            );
            return Ok(RelayOutcome::Stream(Box::pin(events)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::provider(format!("Failed to read response body: {}", e)))?;
        let (caller_response, usage) = parse_upstream_response(&info, kind, &prepared.meta, &body)?;
        self.usage_sink.record(&info.origin_model, info.mode, &usage);

        Ok(RelayOutcome::Complete(caller_response))
    }
}

/// Feed each upstream SSE `data:` payload to the translator, then flush it
/// and report usage once the upstream closes.
fn translate_stream(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
    mut translator: Box<dyn StreamTranslate>,
    info: RelayInfo,
    usage_sink: Arc<dyn UsageSink>,
    relay_log: Option<RelayLog>,
) -> impl Stream<Item = SseEvent> + Send + 'static {
    async_stream::stream! {
        let events = byte_stream.eventsource();
        tokio::pin!(events);

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(ev) => ev,
                Err(e) => {
                    tracing::error!(model = %info.origin_model, error = %e, "upstream stream error");
                    if let Some(ref log) = relay_log {
                        log.error("stream", format!("Upstream stream error: {}", e));
                    }
                    break;
                }
            };
            if event.data.is_empty() {
                continue;
            }
            for out in translator.on_data(&event.data) {
                yield out;
            }
        }

        for out in translator.finish() {
            yield out;
        }

        let usage = translator.usage();
        usage_sink.record(&info.origin_model, info.mode, &usage);
        tracing::debug!(model = %info.origin_model, "stream completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Mode;
    use crate::translate::usage::UsageRecord;
    use crate::translate::InboundKind;
    use crate::translate::RequestMeta;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingSink(Mutex<Vec<(String, UsageRecord)>>);

    impl UsageSink for CapturingSink {
        fn record(&self, model: &str, _mode: Mode, usage: &UsageRecord) {
            self.0.lock().push((model.to_string(), usage.clone()));
        }
    }

    fn sse_bytes(chunks: &[&str]) -> impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static {
        let owned: Vec<std::result::Result<Bytes, reqwest::Error>> =
            chunks.iter().map(|c| Ok(Bytes::from(c.to_string()))).collect();
        futures::stream::iter(owned)
    }

    #[tokio::test]
    async fn test_gemini_stream_to_openai_reports_usage() {
        let info = RelayInfo::resolve("gemini-2.5-pro", true, Mode::Gemini, true, "");
        let translator = stream_translator(&info, InboundKind::Chat, &RequestMeta::default()).unwrap();
        let sink = Arc::new(CapturingSink::default());

        // Split mid-event to exercise the SSE parser's buffering.
        let upstream = sse_bytes(&[
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]},",
            "\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":2}}\n\n",
        ]);

        let events: Vec<SseEvent> = translate_stream(upstream, translator, info, sink.clone(), None)
            .collect()
            .await;

        assert!(events.last().unwrap().is_done());
        let text: String = events
            .iter()
            .filter_map(|e| serde_json::from_str::<serde_json::Value>(&e.data).ok())
            .filter_map(|v| v["choices"][0]["delta"]["content"].as_str().map(str::to_string))
            .collect();
        assert_eq!(text, "Hello");

        let recorded = sink.0.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "gemini-2.5-pro");
        assert_eq!(recorded[0].1.prompt_units(), 4);
        assert_eq!(recorded[0].1.completion_units(), 2);
    }

    #[tokio::test]
    async fn test_claude_passthrough_stream_keeps_event_names() {
        let info = RelayInfo::resolve("claude-sonnet-4", true, Mode::Gemini, true, "");
        let translator = stream_translator(&info, InboundKind::Messages, &RequestMeta::default()).unwrap();
        let sink = Arc::new(CapturingSink::default());

        let upstream = sse_bytes(&[
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"m\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"claude\",\"usage\":{\"input_tokens\":9,\"output_tokens\":1}}}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ]);

        let events: Vec<SseEvent> = translate_stream(upstream, translator, info, sink.clone(), None)
            .collect()
            .await;
        let names: Vec<_> = events.iter().filter_map(|e| e.event.clone()).collect();
        assert_eq!(names, vec!["message_start", "message_delta", "message_stop"]);

        let recorded = sink.0.lock();
        assert_eq!(recorded[0].1.prompt_units(), 9);
        assert_eq!(recorded[0].1.completion_units(), 3);
    }
}
