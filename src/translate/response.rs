//! Turn an upstream response body into the caller's schema, and count what
//! it cost.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::anthropic_types::{ErrorResponse, MessagesResponse, ResponseContentBlock};
use super::gemini_types::GenerateContentResponse;
use super::openai_types::{
    ChatCompletionResponse, ChatErrorResponse, ChatToolCall, ChatToolCallFunction, ChatUsage, Choice,
    ChoiceMessage, PromptTokensDetails,
};
use super::usage::UsageRecord;
use super::vertex_types::{ImagenResponse, LyriaResponse, TtsResponse, VeoResponse, VertexEmbeddingResponse};
use super::{gemini, media, openai_compat};
use super::{CallerResponse, InboundKind, RelayInfo, RequestMeta};
use crate::error::{GatewayError, Result};
use crate::registry::Mode;

/// Decode a successful (status < 400) upstream body and convert it for the
/// caller.
///
/// A body that does not match the mode's shape fails with
/// [`GatewayError::UpstreamDecode`]; the vendor body is logged at debug level
/// and never returned.
pub fn parse_upstream_response(
    info: &RelayInfo,
    kind: InboundKind,
    meta: &RequestMeta,
    body: &[u8],
) -> Result<(CallerResponse, UsageRecord)> {
    if info.is_stream && !info.mode.supports_streaming() {
        return Err(GatewayError::unsupported(format!(
            "streaming is not available for {} models",
            info.mode
        )));
    }

    let converted = match (info.mode, kind) {
        (Mode::Claude, InboundKind::Messages) => {
            let value: Value = decode(info.mode, body)?;
            let resp: MessagesResponse = decode_value(info.mode, value.clone())?;
            (CallerResponse::Passthrough(value), claude_usage(&resp))
        }
        (Mode::Claude, InboundKind::Chat) => {
            let resp: MessagesResponse = decode(info.mode, body)?;
            let usage = claude_usage(&resp);
            (CallerResponse::Chat(claude_to_openai_response(&resp, info)), usage)
        }
        (Mode::Gemini, InboundKind::Chat) => {
            let resp: GenerateContentResponse = decode(info.mode, body)?;
            let usage = gemini::usage_from_metadata(resp.usage_metadata.as_ref());
            (CallerResponse::Chat(gemini::gemini_to_openai(&resp, info)), usage)
        }
        (Mode::Gemini, InboundKind::Messages) => {
            let resp: GenerateContentResponse = decode(info.mode, body)?;
            let usage = gemini::usage_from_metadata(resp.usage_metadata.as_ref());
            let message = gemini::gemini_to_claude(&resp, info, &meta.declared_tools);
            (CallerResponse::Message(message), usage)
        }
        (Mode::Llama | Mode::ReasoningChat, InboundKind::Chat) => {
            let value: Value = decode(info.mode, body)?;
            let resp: ChatCompletionResponse = decode_value(info.mode, value.clone())?;
            let usage = openai_compat::usage_record(resp.usage.as_ref());
            (CallerResponse::Passthrough(value), usage)
        }
        (Mode::Llama | Mode::ReasoningChat, InboundKind::Messages) => {
            let resp: ChatCompletionResponse = decode(info.mode, body)?;
            let usage = openai_compat::usage_record(resp.usage.as_ref());
            let message = openai_compat::openai_to_claude_response(&resp, info, &meta.declared_tools);
            (CallerResponse::Message(message), usage)
        }
        (Mode::VideoGen, InboundKind::Chat) => {
            let resp: VeoResponse = decode(info.mode, body)?;
            let (chat, usage) = media::veo_response(&resp, info);
            (CallerResponse::Chat(chat), usage)
        }
        (Mode::ImageGen, InboundKind::Image) => {
            let resp: ImagenResponse = decode(info.mode, body)?;
            let (images, usage) = media::imagen_response(&resp);
            (CallerResponse::Image(images), usage)
        }
        (Mode::AudioGen, InboundKind::Audio) => {
            let resp: LyriaResponse = decode(info.mode, body)?;
            let (audio, usage) = media::lyria_response(&resp);
            (CallerResponse::Audio(audio), usage)
        }
        (Mode::TextToSpeech, InboundKind::Audio) => {
            let resp: TtsResponse = decode(info.mode, body)?;
            let (audio, usage) = media::tts_response(&resp, meta.input_chars);
            (CallerResponse::Audio(audio), usage)
        }
        (Mode::Embedding, InboundKind::Embedding) => {
            let resp: VertexEmbeddingResponse = decode(info.mode, body)?;
            let (embeddings, usage) = media::embedding_response(&resp, info);
            (CallerResponse::Embedding(embeddings), usage)
        }
        (mode, kind) => {
            return Err(GatewayError::unsupported(format!(
                "no response conversion from {mode} to the {kind:?} endpoint"
            )));
        }
    };

    Ok(converted)
}

fn decode<T: DeserializeOwned>(mode: Mode, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(%mode, error = %e, body = %truncate(&String::from_utf8_lossy(body), 300), "upstream body did not decode");
        GatewayError::upstream_decode(format!("{mode} upstream returned an unreadable response"))
    })
}

fn decode_value<T: DeserializeOwned>(mode: Mode, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        tracing::debug!(%mode, error = %e, "upstream body has an unexpected shape");
        GatewayError::upstream_decode(format!("{mode} upstream returned an unreadable response"))
    })
}

fn claude_usage(resp: &MessagesResponse) -> UsageRecord {
    UsageRecord::tokens(resp.usage.input_tokens, resp.usage.output_tokens).with_cache(
        resp.usage.cache_read_input_tokens,
        resp.usage.cache_creation_input_tokens,
    )
}

// ---------------------------------------------------------------------------
// Claude -> OpenAI
// ---------------------------------------------------------------------------

/// Claude `stop_reason` to OpenAI `finish_reason`.
pub fn map_stop_reason_to_openai(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

/// Fold a Claude message into an OpenAI chat completion. Thinking blocks
/// become `reasoning_content`.
pub fn claude_to_openai_response(resp: &MessagesResponse, info: &RelayInfo) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in &resp.content {
        match block {
            ResponseContentBlock::Text { text: t } => text.push_str(t),
            ResponseContentBlock::Thinking { thinking, .. } => reasoning.push_str(thinking),
            ResponseContentBlock::ToolUse { id, name, input } => tool_calls.push(ChatToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            ResponseContentBlock::Unsupported => {
                tracing::debug!("skipping Claude block with no OpenAI counterpart");
            }
        }
    }

    let has_calls = !tool_calls.is_empty();
    let finish_reason = resp
        .stop_reason
        .as_deref()
        .map_or("stop", map_stop_reason_to_openai);

    let u = &resp.usage;
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", resp.id.trim_start_matches("msg_")),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: info.origin_model.clone(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() && has_calls { None } else { Some(text) },
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: has_calls.then_some(tool_calls),
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: Some(ChatUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
            prompt_tokens_details: u
                .cache_read_input_tokens
                .map(|cached_tokens| PromptTokensDetails { cached_tokens }),
            completion_tokens_details: None,
        }),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error envelope in the caller's schema.
pub fn error_body(kind: InboundKind, error_type: &str, message: impl Into<String>) -> Value {
    let body = if kind.is_claude() {
        serde_json::to_value(ErrorResponse::new(error_type, message))
    } else {
        serde_json::to_value(ChatErrorResponse::new(error_type, message))
    };
    body.unwrap_or(Value::Null)
}

/// Map an upstream error (status >= 400) to the caller's schema. Claude,
/// OpenAI and Google error bodies are recognised; anything else gets a
/// generic message.
pub fn map_upstream_error(kind: InboundKind, status: u16, body: &[u8]) -> Value {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    // Vertex wraps some Gemini errors in a one-element array.
    let parsed = match parsed {
        Some(Value::Array(mut items)) if !items.is_empty() => Some(items.swap_remove(0)),
        other => other,
    };

    let recognised = parsed.as_ref().and_then(|v| {
        let error = v.get("error")?;
        let message = error.get("message").and_then(Value::as_str)?.to_string();
        let error_type = error
            .get("type")
            .and_then(Value::as_str)
            .map(normalize_error_type)
            .or_else(|| error.get("status").and_then(Value::as_str).map(google_status_type))
            .unwrap_or_else(|| status_error_type(status));
        Some((error_type, message))
    });

    let (error_type, message) = recognised.unwrap_or_else(|| {
        tracing::debug!(status, body = %truncate(&String::from_utf8_lossy(body), 300), "unrecognised upstream error body");
        (status_error_type(status), format!("upstream returned status {status}"))
    });
    error_body(kind, error_type, message)
}

fn normalize_error_type(t: &str) -> &'static str {
    match t {
        "invalid_request_error" => "invalid_request_error",
        "authentication_error" => "authentication_error",
        "permission_error" => "permission_error",
        "not_found_error" => "not_found_error",
        "rate_limit_error" | "rate_limit_exceeded" => "rate_limit_error",
        "overloaded_error" => "overloaded_error",
        _ => "api_error",
    }
}

fn google_status_type(status: &str) -> &'static str {
    match status {
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "OUT_OF_RANGE" => "invalid_request_error",
        "UNAUTHENTICATED" => "authentication_error",
        "PERMISSION_DENIED" => "permission_error",
        "NOT_FOUND" => "not_found_error",
        "RESOURCE_EXHAUSTED" => "rate_limit_error",
        "UNAVAILABLE" => "overloaded_error",
        _ => "api_error",
    }
}

fn status_error_type(status: u16) -> &'static str {
    match status {
        400 | 413 | 422 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        503 | 529 => "overloaded_error",
        _ => "api_error",
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(model: &str, stream: bool) -> RelayInfo {
        RelayInfo::resolve(model, stream, Mode::Gemini, true, "")
    }

    fn bytes(v: Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    #[test]
    fn test_claude_to_openai_chat() {
        let body = bytes(json!({
            "id": "msg_abc",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4@20250514",
            "content": [
                {"type": "thinking", "thinking": "plan", "signature": "sig"},
                {"type": "text", "text": "Reading it."},
                {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"file_path": "a.rs"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5, "cache_read_input_tokens": 4}
        }));
        let (resp, usage) =
            parse_upstream_response(&info("claude-sonnet-4", false), InboundKind::Chat, &RequestMeta::default(), &body)
                .unwrap();

        let CallerResponse::Chat(chat) = resp else {
            panic!("expected chat completion");
        };
        assert_eq!(chat.id, "chatcmpl-abc");
        assert_eq!(chat.model, "claude-sonnet-4");
        let choice = &chat.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(choice.message.content.as_deref(), Some("Reading it."));
        assert_eq!(choice.message.reasoning_content.as_deref(), Some("plan"));
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "Read");
        assert_eq!(calls[0].function.arguments, r#"{"file_path":"a.rs"}"#);

        assert_eq!(usage.total_units(), 15);
        assert_eq!(usage.cache_read_tokens(), Some(4));
    }

    #[test]
    fn test_claude_passthrough_keeps_body() {
        let raw = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-opus-4@20250514",
            "content": [{"type": "server_tool_use", "id": "s", "name": "web_search", "input": {}}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 2, "output_tokens": 1}
        });
        let (resp, usage) = parse_upstream_response(
            &info("claude-opus-4", false),
            InboundKind::Messages,
            &RequestMeta::default(),
            &bytes(raw.clone()),
        )
        .unwrap();
        match resp {
            CallerResponse::Passthrough(v) => assert_eq!(v, raw),
            other => panic!("expected passthrough, got {other:?}"),
        }
        assert_eq!(usage, UsageRecord::tokens(2, 1));
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(map_stop_reason_to_openai("end_turn"), "stop");
        assert_eq!(map_stop_reason_to_openai("max_tokens"), "length");
        assert_eq!(map_stop_reason_to_openai("tool_use"), "tool_calls");
        assert_eq!(map_stop_reason_to_openai("stop_sequence"), "stop");
    }

    #[test]
    fn test_imagen_usage_skips_blocked() {
        let body = bytes(json!({"predictions": [
            {"bytesBase64Encoded": "AAA", "mimeType": "image/png"},
            {"bytesBase64Encoded": "BBB", "mimeType": "image/png"},
            {"safetyAttributes": {"blocked": true}}
        ]}));
        let info = RelayInfo::resolve("imagen-3.0-generate-002", false, Mode::Gemini, true, "");
        let (resp, usage) =
            parse_upstream_response(&info, InboundKind::Image, &RequestMeta::default(), &body).unwrap();
        let CallerResponse::Image(images) = resp else {
            panic!("expected image response");
        };
        assert_eq!(images.data.len(), 2);
        assert_eq!(usage.prompt_units(), 2);
    }

    #[test]
    fn test_tts_bills_request_chars() {
        let body = bytes(json!({"audioContent": "UklGR"}));
        let info = RelayInfo::resolve("text-to-speech-neural2", false, Mode::Gemini, true, "");
        let meta = RequestMeta {
            input_chars: Some(120),
            ..RequestMeta::default()
        };
        let (_, usage) = parse_upstream_response(&info, InboundKind::Audio, &meta, &body).unwrap();
        assert_eq!(usage.prompt_units(), 120);
        assert_eq!(usage.total_units(), 120);
    }

    #[test]
    fn test_undecodable_body_is_generic() {
        let err = parse_upstream_response(
            &info("gemini-2.5-pro", false),
            InboundKind::Chat,
            &RequestMeta::default(),
            b"<html>secret backend page</html>",
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamDecode { .. }));
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn test_stream_to_non_streaming_mode_rejected() {
        let info = RelayInfo::resolve("veo-3.0-generate-preview", true, Mode::Gemini, true, "");
        let err = parse_upstream_response(&info, InboundKind::Chat, &RequestMeta::default(), b"{}").unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_mismatched_endpoint_rejected() {
        let err = parse_upstream_response(
            &info("gemini-2.5-pro", false),
            InboundKind::Image,
            &RequestMeta::default(),
            b"{}",
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_google_error_to_claude() {
        let body = bytes(json!([{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}]));
        let mapped = map_upstream_error(InboundKind::Messages, 429, &body);
        assert_eq!(mapped["type"], "error");
        assert_eq!(mapped["error"]["type"], "rate_limit_error");
        assert_eq!(mapped["error"]["message"], "Quota exceeded");
    }

    #[test]
    fn test_claude_error_to_openai() {
        let body = bytes(json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}));
        let mapped = map_upstream_error(InboundKind::Chat, 529, &body);
        assert_eq!(mapped["error"]["type"], "overloaded_error");
        assert_eq!(mapped["error"]["message"], "Overloaded");
    }

    #[test]
    fn test_unknown_error_body_is_generic() {
        let mapped = map_upstream_error(InboundKind::Chat, 502, b"Bad Gateway");
        assert_eq!(mapped["error"]["type"], "api_error");
        assert_eq!(mapped["error"]["message"], "upstream returned status 502");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
