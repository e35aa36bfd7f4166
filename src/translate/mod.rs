//! API translation between the caller schemas (OpenAI, Claude) and the
//! Vertex AI upstream schemas.
//!
//! The core of the gateway: converts requests, responses, and streaming events.
//! All translation functions are pure (no I/O).

pub mod anthropic_types;
pub mod gemini;
pub mod gemini_types;
pub mod media;
pub mod openai_compat;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod tools;
pub mod usage;
pub mod vertex_types;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::registry::{self, Mode, ThinkingDirective};
use anthropic_types::{ContentBlock, ContentItem, MessageContent, MessagesRequest, MessagesResponse, Role};
use gemini_types::GenerateContentRequest;
use openai_types::{
    AudioEnvelope, ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatRole,
    ContentPart, EmbeddingRequest, EmbeddingResponse, ImageGenerationRequest, ImageResponse,
    SpeechRequest,
};
use tools::{ToolAction, ToolPolicy};
use vertex_types::{
    ImagenRequest, LyriaRequest, TtsRequest, VeoRequest, VertexClaudeRequest,
    VertexEmbeddingRequest,
};

pub const DEFAULT_GEMINI_GUIDANCE: &str = "When using tools, always:\n\
1. First explain what you're about to do and why\n\
2. Use the appropriate tool\n\
3. After getting the result, explain what you found and how it answers the user's question\n\
Be conversational and helpful like Claude.";

/// Knobs for the vendor compatibility shims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Compat {
    /// Prepended to Claude-format requests served by Gemini.
    pub gemini_guidance: String,
    pub supported_tool_types: ToolPolicy,
}

impl Default for Compat {
    fn default() -> Self {
        Self {
            gemini_guidance: DEFAULT_GEMINI_GUIDANCE.to_string(),
            supported_tool_types: ToolPolicy::default(),
        }
    }
}

/// Per-request facts every converter needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayInfo {
    /// Model the caller asked for, after routing.
    pub origin_model: String,
    /// Model name on the vendor's wire.
    pub upstream_model: String,
    pub mode: Mode,
    pub region: String,
    pub is_stream: bool,
    pub thinking: Option<ThinkingDirective>,
}

impl RelayInfo {
    /// Classify `model`, strip a thinking suffix when the adapter is on,
    /// translate the vendor name and resolve the region.
    pub fn resolve(
        model: &str,
        is_stream: bool,
        default_mode: Mode,
        thinking_adapter: bool,
        region_setting: &str,
    ) -> Self {
        let mode = registry::classify_or(model, default_mode);
        let (base, thinking) = if mode == Mode::Gemini && thinking_adapter {
            registry::parse_thinking_suffix(model)
        } else {
            (model, None)
        };
        Self {
            origin_model: model.to_string(),
            upstream_model: registry::translate_model_name(mode, base).to_string(),
            mode,
            region: registry::resolve_region(region_setting, model),
            is_stream,
            thinking,
        }
    }
}

/// Which public endpoint a request came in on; fixes the response schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    Chat,
    Messages,
    Image,
    Audio,
    Embedding,
}

impl InboundKind {
    /// Claude callers get Claude error envelopes, everyone else OpenAI ones.
    pub fn is_claude(self) -> bool {
        self == InboundKind::Messages
    }
}

#[derive(Debug, Clone)]
pub enum InboundRequest {
    Chat(ChatCompletionRequest),
    Messages(MessagesRequest),
    Image(ImageGenerationRequest),
    Audio(SpeechRequest),
    Embedding(EmbeddingRequest),
}

impl InboundRequest {
    pub fn kind(&self) -> InboundKind {
        match self {
            InboundRequest::Chat(_) => InboundKind::Chat,
            InboundRequest::Messages(_) => InboundKind::Messages,
            InboundRequest::Image(_) => InboundKind::Image,
            InboundRequest::Audio(_) => InboundKind::Audio,
            InboundRequest::Embedding(_) => InboundKind::Embedding,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            InboundRequest::Chat(r) => &r.model,
            InboundRequest::Messages(r) => &r.model,
            InboundRequest::Image(r) => &r.model,
            InboundRequest::Audio(r) => &r.model,
            InboundRequest::Embedding(r) => &r.model,
        }
    }

    pub fn set_model(&mut self, model: String) {
        match self {
            InboundRequest::Chat(r) => r.model = model,
            InboundRequest::Messages(r) => r.model = model,
            InboundRequest::Image(r) => r.model = model,
            InboundRequest::Audio(r) => r.model = model,
            InboundRequest::Embedding(r) => r.model = model,
        }
    }

    /// Caller-supplied conversation key: Claude `metadata.user_id` or OpenAI `user`.
    pub fn session_hint(&self) -> Option<&str> {
        match self {
            InboundRequest::Chat(r) => r.user.as_deref(),
            InboundRequest::Messages(r) => r.metadata.as_ref().and_then(|m| m.user_id.as_deref()),
            _ => None,
        }
    }

    /// First text of the newest user message.
    pub fn latest_user_text(&self) -> Option<&str> {
        match self {
            InboundRequest::Chat(r) => {
                let msg = r.messages.iter().rev().find(|m| m.role == ChatRole::User)?;
                match msg.content.as_ref()? {
                    ChatContent::Text(t) => Some(t.as_str()),
                    ChatContent::Parts(parts) => parts.iter().find_map(|p| match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    }),
                }
            }
            InboundRequest::Messages(r) => {
                let msg = r.messages.iter().rev().find(|m| m.role == Role::User)?;
                match &msg.content {
                    MessageContent::Text(t) => Some(t.as_str()),
                    MessageContent::Blocks(blocks) => blocks.iter().find_map(|b| match b {
                        ContentItem::Block(ContentBlock::Text { text, .. }) => Some(text.as_str()),
                        _ => None,
                    }),
                }
            }
            _ => None,
        }
    }

    /// Overwrite the text returned by [`latest_user_text`](Self::latest_user_text).
    pub fn replace_latest_user_text(&mut self, replacement: String) {
        match self {
            InboundRequest::Chat(r) => {
                let Some(msg) = r.messages.iter_mut().rev().find(|m| m.role == ChatRole::User) else {
                    return;
                };
                match msg.content.as_mut() {
                    Some(ChatContent::Text(t)) => *t = replacement,
                    Some(ChatContent::Parts(parts)) => {
                        if let Some(ContentPart::Text { text }) =
                            parts.iter_mut().find(|p| matches!(p, ContentPart::Text { .. }))
                        {
                            *text = replacement;
                        }
                    }
                    None => {}
                }
            }
            InboundRequest::Messages(r) => {
                let Some(msg) = r.messages.iter_mut().rev().find(|m| m.role == Role::User) else {
                    return;
                };
                match &mut msg.content {
                    MessageContent::Text(t) => *t = replacement,
                    MessageContent::Blocks(blocks) => {
                        if let Some(ContentItem::Block(ContentBlock::Text { text, .. })) = blocks
                            .iter_mut()
                            .find(|b| matches!(b, ContentItem::Block(ContentBlock::Text { .. })))
                        {
                            *text = replacement;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    pub fn is_stream(&self) -> bool {
        match self {
            InboundRequest::Chat(r) => r.stream.unwrap_or(false),
            InboundRequest::Messages(r) => r.stream.unwrap_or(false),
            InboundRequest::Audio(r) => r.stream.unwrap_or(false),
            InboundRequest::Image(_) | InboundRequest::Embedding(_) => false,
        }
    }
}

/// Body sent to Vertex. Serializes as the inner shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum UpstreamBody {
    Claude(VertexClaudeRequest),
    Gemini(GenerateContentRequest),
    OpenAi(ChatCompletionRequest),
    Veo(VeoRequest),
    Imagen(ImagenRequest),
    Lyria(LyriaRequest),
    Embedding(VertexEmbeddingRequest),
    Tts(TtsRequest),
}

/// Side facts gathered while building a request, needed again when the
/// response comes back.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Characters of text-to-speech input, for billing.
    pub input_chars: Option<u64>,
    /// Every tool name present in the upstream request or declared by the caller.
    pub declared_tools: HashSet<String>,
    pub tool_actions: Vec<ToolAction>,
    /// Human-readable notes on fields that were dropped or rewritten.
    pub adjustments: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub body: UpstreamBody,
    pub meta: RequestMeta,
}

/// Response in the caller's schema. Serializes as the inner shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CallerResponse {
    Chat(ChatCompletionResponse),
    Message(MessagesResponse),
    Image(ImageResponse),
    Audio(AudioEnvelope),
    Embedding(EmbeddingResponse),
    /// Upstream body already in the caller's schema.
    Passthrough(serde_json::Value),
}
