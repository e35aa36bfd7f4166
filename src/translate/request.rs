//! Build the upstream request body for a relayed call.
//!
//! [`build_upstream_request`] picks the converter for the (mode, caller)
//! pair. This module also owns the Claude-on-Vertex path: OpenAI chat
//! requests are turned into Claude messages, then every Claude request gets
//! the Vertex compatibility pass (fixed `anthropic_version`, tool
//! normalization, version-gated field stripping).

use std::collections::HashSet;

use serde_json::{json, Value};

use super::anthropic_types::{
    ContentBlock, ContentItem, ImageSource, Message, MessageContent, MessagesRequest, Metadata,
    Role, SystemContent, ToolChoice, ToolChoiceAuto, ToolChoiceSpecific, ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatRole, ChatToolChoice, ContentPart,
};
use super::tools::{normalize_tools, NativeTool, ToolSpec, ToolTarget};
use super::vertex_types::{VertexClaudeRequest, VERTEX_ANTHROPIC_VERSION};
use super::{gemini, media, openai_compat};
use super::{Compat, InboundRequest, PreparedRequest, RelayInfo, RequestMeta, UpstreamBody};
use crate::error::{GatewayError, Result};
use crate::registry::Mode;

const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Translate an inbound request into the body the mode's endpoint expects.
///
/// Fails with [`GatewayError::UnsupportedOperation`] when the caller asked
/// for a stream the mode cannot produce, or when the endpoint the request
/// came in on has no meaning for the mode (an image request to a chat model).
pub fn build_upstream_request(
    info: &RelayInfo,
    inbound: InboundRequest,
    compat: &Compat,
) -> Result<PreparedRequest> {
    if info.is_stream && !info.mode.supports_streaming() {
        return Err(GatewayError::unsupported(format!(
            "streaming is not available for {} models",
            info.mode
        )));
    }

    let kind = inbound.kind();
    let (body, meta) = match (info.mode, inbound) {
        (Mode::Claude, InboundRequest::Messages(req)) => {
            let (body, meta) = claude_to_vertex(req, compat);
            (UpstreamBody::Claude(body), meta)
        }
        (Mode::Claude, InboundRequest::Chat(req)) => {
            let (body, meta) = claude_to_vertex(openai_to_claude(req), compat);
            (UpstreamBody::Claude(body), meta)
        }
        (Mode::Gemini, InboundRequest::Chat(req)) => {
            let (body, meta) = gemini::openai_to_gemini(req, info, compat);
            (UpstreamBody::Gemini(body), meta)
        }
        (Mode::Gemini, InboundRequest::Messages(req)) => {
            let (body, meta) = gemini::claude_to_gemini(req, info, compat);
            (UpstreamBody::Gemini(body), meta)
        }
        (Mode::Llama | Mode::ReasoningChat, InboundRequest::Chat(req)) => {
            let (body, meta) = openai_compat::prepare_openai(req, info, compat);
            (UpstreamBody::OpenAi(body), meta)
        }
        (Mode::Llama | Mode::ReasoningChat, InboundRequest::Messages(req)) => {
            let (body, meta) = openai_compat::claude_to_openai(req, info, compat);
            (UpstreamBody::OpenAi(body), meta)
        }
        (Mode::VideoGen, InboundRequest::Chat(req)) => {
            (UpstreamBody::Veo(media::veo_request(&req)), RequestMeta::default())
        }
        (Mode::ImageGen, InboundRequest::Image(req)) => {
            (UpstreamBody::Imagen(media::imagen_request(&req)), RequestMeta::default())
        }
        (Mode::AudioGen, InboundRequest::Audio(req)) => (
            UpstreamBody::Lyria(media::lyria_request(&req, &info.upstream_model)),
            RequestMeta::default(),
        ),
        (Mode::TextToSpeech, InboundRequest::Audio(req)) => {
            let meta = RequestMeta {
                input_chars: Some(req.input.chars().count() as u64),
                ..RequestMeta::default()
            };
            (UpstreamBody::Tts(media::tts_request(&req)), meta)
        }
        (Mode::Embedding, InboundRequest::Embedding(req)) => (
            UpstreamBody::Embedding(media::embedding_request(&req, &info.upstream_model)),
            RequestMeta::default(),
        ),
        (mode, _) => {
            return Err(GatewayError::unsupported(format!(
                "model {} ({mode}) cannot serve {kind:?} requests",
                info.origin_model
            )));
        }
    };

    Ok(PreparedRequest { body, meta })
}

// ---------------------------------------------------------------------------
// Claude on Vertex
// ---------------------------------------------------------------------------

/// Apply the Vertex compatibility pass to a Claude Messages request.
pub fn claude_to_vertex(req: MessagesRequest, compat: &Compat) -> (VertexClaudeRequest, RequestMeta) {
    let mut meta = RequestMeta::default();
    let MessagesRequest {
        max_tokens,
        mut messages,
        mut system,
        stream,
        temperature,
        top_p,
        top_k,
        tools,
        tool_choice,
        stop_sequences,
        thinking,
        ..
    } = req;

    let caller_tools = tools.unwrap_or_default();

    let normalized = normalize_tools(
        &caller_tools,
        ToolTarget::ClaudeMessages,
        &compat.supported_tool_types,
    );
    meta.declared_tools = normalized.declared_names(&caller_tools);
    if normalized.tools.len() != caller_tools.len() || normalized.has_web_intent {
        meta.adjustments.push(format!(
            "tools normalized: {} -> {}",
            caller_tools.len(),
            normalized.tools.len()
        ));
    }

    let remaining: HashSet<&str> = normalized.names().collect();
    let tool_choice = match tool_choice {
        Some(_) if normalized.tools.is_empty() => {
            meta.adjustments.push("tool_choice dropped: no tools remain".to_string());
            None
        }
        Some(ToolChoice::Specific(ref s)) if !remaining.contains(s.name.as_str()) => {
            meta.adjustments.push(format!("tool_choice dropped: {} was removed", s.name));
            None
        }
        other => other,
    };

    // cache_control is not accepted by vertex-2023-10-16.
    let mut stripped = false;
    for message in &mut messages {
        if let MessageContent::Blocks(items) = &mut message.content {
            for item in items.iter_mut() {
                stripped |= item.strip_cache_control();
            }
        }
    }
    if let Some(SystemContent::Blocks(items)) = &mut system {
        for item in items.iter_mut() {
            stripped |= item.strip_cache_control();
        }
    }
    if stripped {
        meta.adjustments.push("cache_control removed".to_string());
    }

    if thinking.is_some() {
        tracing::debug!("forwarding thinking configuration to Claude");
    }

    meta.tool_actions = normalized.actions;
    let tools = if normalized.tools.is_empty() {
        None
    } else {
        Some(normalized.tools)
    };

    for note in &meta.adjustments {
        tracing::info!(adjustment = %note, "Claude request adjusted for Vertex");
    }

    let body = VertexClaudeRequest {
        anthropic_version: VERTEX_ANTHROPIC_VERSION.to_string(),
        messages,
        system,
        max_tokens,
        stop_sequences,
        stream,
        temperature,
        top_p,
        top_k,
        tools,
        tool_choice,
        thinking,
    };
    (body, meta)
}

// ---------------------------------------------------------------------------
// OpenAI chat -> Claude messages
// ---------------------------------------------------------------------------

/// Translate an OpenAI Chat Completions request into a Claude Messages request.
///
/// System and developer messages are hoisted into `system`; tool messages
/// become `tool_result` blocks; consecutive messages of the same role are
/// merged, since Claude requires alternation.
pub fn openai_to_claude(req: ChatCompletionRequest) -> MessagesRequest {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for msg in &req.messages {
        let (role, items) = match msg.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = &msg.content {
                    system_parts.push(content.joined_text());
                }
                continue;
            }
            ChatRole::User => (Role::User, user_items(msg.content.as_ref())),
            ChatRole::Assistant => (Role::Assistant, assistant_items(msg)),
            ChatRole::Tool => {
                let text = msg.content.as_ref().map(ChatContent::joined_text).unwrap_or_default();
                let item = ContentItem::Block(ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: Some(ToolResultContent::Text(text)),
                    is_error: None,
                    cache_control: None,
                });
                (Role::User, vec![item])
            }
        };
        push_merged(&mut messages, role, items);
    }

    let mut tools: Vec<ToolSpec> = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(function_to_custom)
        .collect();
    if req.web_search_options.is_some() {
        tools.push(ToolSpec::WebSearch(NativeTool {
            tool_type: "web_search_20250305".to_string(),
            name: Some("web_search".to_string()),
            extra: serde_json::Map::new(),
        }));
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(SystemContent::Text(system_parts.join("\n")))
    };

    MessagesRequest {
        model: req.model,
        max_tokens: req
            .max_tokens
            .or(req.max_completion_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system,
        stream: req.stream,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        tools: if tools.is_empty() { None } else { Some(tools) },
        tool_choice: req.tool_choice.as_ref().map(translate_tool_choice),
        metadata: req.user.map(|user_id| Metadata {
            user_id: Some(user_id),
            extra: Default::default(),
        }),
        stop_sequences: req.stop.map(|s| s.to_vec()),
        thinking: None,
        extra: Default::default(),
    }
}

fn push_merged(messages: &mut Vec<Message>, role: Role, items: Vec<ContentItem>) {
    if items.is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut() {
        if last.role == role {
            let mut merged = last.content.items();
            merged.extend(items);
            last.content = MessageContent::Blocks(merged);
            return;
        }
    }
    let content = match items.as_slice() {
        [ContentItem::Block(ContentBlock::Text { text, cache_control: None })] => {
            MessageContent::Text(text.clone())
        }
        _ => MessageContent::Blocks(items),
    };
    messages.push(Message { role, content });
}

fn user_items(content: Option<&ChatContent>) -> Vec<ContentItem> {
    match content {
        None => Vec::new(),
        Some(ChatContent::Text(t)) => vec![ContentItem::text_block(t.clone())],
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(ContentItem::text_block(text.clone())),
                ContentPart::ImageUrl { image_url } => {
                    let source = match image_url.as_inline_data() {
                        Some((mime, data)) => ImageSource {
                            source_type: "base64".to_string(),
                            media_type: Some(mime.to_string()),
                            data: Some(data.to_string()),
                            url: None,
                        },
                        None => ImageSource {
                            source_type: "url".to_string(),
                            media_type: None,
                            data: None,
                            url: Some(image_url.url.clone()),
                        },
                    };
                    Some(ContentItem::Block(ContentBlock::Image {
                        source,
                        cache_control: None,
                    }))
                }
                ContentPart::Unsupported => {
                    tracing::warn!("dropping unsupported content part");
                    None
                }
            })
            .collect(),
    }
}

fn assistant_items(msg: &super::openai_types::ChatMessage) -> Vec<ContentItem> {
    let mut items = Vec::new();
    if let Some(content) = &msg.content {
        let text = content.joined_text();
        if !text.is_empty() {
            items.push(ContentItem::text_block(text));
        }
    }
    for call in msg.tool_calls.iter().flatten() {
        let input = parse_arguments(&call.function.arguments);
        items.push(ContentItem::Block(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input,
            cache_control: None,
        }));
    }
    items
}

/// Parse a tool call's JSON argument string, falling back to an empty object.
pub(crate) fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "tool call arguments are not valid JSON");
        json!({})
    })
}

fn function_to_custom(tool: ToolSpec) -> ToolSpec {
    match tool {
        ToolSpec::Function(f) => {
            let input_schema = if f.parameters.is_null() {
                json!({"type": "object", "properties": {}})
            } else {
                f.parameters
            };
            ToolSpec::Custom(super::tools::CustomTool {
                name: f.name,
                description: f.description,
                input_schema,
                extra: serde_json::Map::new(),
            })
        }
        other => other,
    }
}

fn translate_tool_choice(tc: &ChatToolChoice) -> ToolChoice {
    match tc {
        ChatToolChoice::String(s) => {
            let choice_type = match s.as_str() {
                "required" => "any",
                "none" => "none",
                _ => "auto",
            };
            ToolChoice::Auto(ToolChoiceAuto {
                choice_type: choice_type.to_string(),
            })
        }
        ChatToolChoice::Specific(s) => ToolChoice::Specific(ToolChoiceSpecific {
            choice_type: "tool".to_string(),
            name: s.function.name.clone(),
        }),
    }
}
