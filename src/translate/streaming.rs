//! Stateful translators for server-sent event streams.
//!
//! The relay feeds each upstream `data:` payload to a [`StreamTranslate`]
//! and forwards whatever events come back. When the upstream stream ends
//! (or sends `[DONE]`), [`StreamTranslate::finish`] flushes the closing
//! events, and [`StreamTranslate::usage`] reports what the stream consumed.
//!
//! | Upstream | Caller | Translator |
//! |---|---|---|
//! | Claude | Claude | [`ClaudePassthrough`] |
//! | Claude | OpenAI | [`ClaudeToOpenAi`] |
//! | Gemini | OpenAI | [`GeminiToOpenAi`] |
//! | Gemini | Claude | [`GeminiToClaude`] |
//! | OpenAI | OpenAI | [`OpenAiPassthrough`] |
//! | OpenAI | Claude | [`OpenAiToClaude`] |

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};

use super::anthropic_types::{
    Delta, DeltaUsage, ErrorResponse, MessageDeltaBody, MessagesResponse, ResponseContentBlock,
    StreamEvent, Usage,
};
use super::gemini::{self, map_finish_to_claude, map_finish_to_openai};
use super::gemini_types::{GenerateContentResponse, UsageMetadata};
use super::openai_compat::map_finish_reason;
use super::openai_types::{
    ChatCompletionChunk, ChatErrorResponse, ChatUsage, ChunkChoice, ChunkDelta, ChunkToolCall,
    ChunkToolCallFunction, PromptTokensDetails,
};
use super::response::map_stop_reason_to_openai;
use super::tools::denormalize_function_call;
use super::usage::UsageRecord;
use super::{InboundKind, RelayInfo, RequestMeta};
use crate::error::{GatewayError, Result};
use crate::registry::Mode;

const DONE: &str = "[DONE]";

/// One outgoing server-sent event. OpenAI-style streams leave `event` unset.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn named(event: &str, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.to_string()),
            data: data.into(),
        }
    }

    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn done() -> Self {
        Self::data(DONE)
    }

    pub fn is_done(&self) -> bool {
        self.event.is_none() && self.data == DONE
    }
}

pub trait StreamTranslate: Send {
    /// Handle one upstream `data:` payload.
    fn on_data(&mut self, data: &str) -> Vec<SseEvent>;

    /// Close the stream. Calling it twice yields nothing the second time.
    fn finish(&mut self) -> Vec<SseEvent>;

    /// Usage observed so far.
    fn usage(&self) -> UsageRecord;
}

/// Pick the translator for an upstream mode and the caller's endpoint.
pub fn stream_translator(
    info: &RelayInfo,
    kind: InboundKind,
    meta: &RequestMeta,
) -> Result<Box<dyn StreamTranslate>> {
    let model = info.origin_model.as_str();
    let declared = meta.declared_tools.clone();
    let translator: Box<dyn StreamTranslate> = match (info.mode, kind) {
        (Mode::Claude, InboundKind::Messages) => Box::new(ClaudePassthrough::default()),
        (Mode::Claude, InboundKind::Chat) => Box::new(ClaudeToOpenAi::new(model)),
        (Mode::Gemini, InboundKind::Chat) => Box::new(GeminiToOpenAi::new(model)),
        (Mode::Gemini, InboundKind::Messages) => Box::new(GeminiToClaude::new(model, declared)),
        (Mode::Llama | Mode::ReasoningChat, InboundKind::Chat) => {
            Box::new(OpenAiPassthrough::default())
        }
        (Mode::Llama | Mode::ReasoningChat, InboundKind::Messages) => {
            Box::new(OpenAiToClaude::new(model, declared))
        }
        (mode, kind) => {
            return Err(GatewayError::unsupported(format!(
                "streaming is not available for {mode} models on the {kind:?} endpoint"
            )));
        }
    };
    Ok(translator)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct TokenTally {
    input: u64,
    output: u64,
    cache_read: Option<u64>,
    cache_creation: Option<u64>,
}

impl TokenTally {
    fn record(&self) -> UsageRecord {
        UsageRecord::tokens(self.input, self.output).with_cache(self.cache_read, self.cache_creation)
    }

    fn absorb_chat(&mut self, usage: &ChatUsage) {
        self.input = usage.prompt_tokens;
        self.output = usage.completion_tokens;
        self.cache_read = usage.prompt_tokens_details.as_ref().map(|d| d.cached_tokens);
    }

    fn absorb_gemini(&mut self, meta: &UsageMetadata) {
        let record = gemini::usage_from_metadata(Some(meta));
        self.input = record.prompt_units();
        self.output = record.completion_units();
        self.cache_read = record.cache_read_tokens();
    }

    fn chat_usage(&self) -> ChatUsage {
        ChatUsage {
            prompt_tokens: self.input,
            completion_tokens: self.output,
            total_tokens: self.input.saturating_add(self.output),
            prompt_tokens_details: self.cache_read.map(|cached_tokens| PromptTokensDetails { cached_tokens }),
            completion_tokens_details: None,
        }
    }
}

fn claude_sse(events: Vec<StreamEvent>) -> Vec<SseEvent> {
    events
        .into_iter()
        .filter_map(|event| {
            serde_json::to_string(&event)
                .ok()
                .map(|json| SseEvent::named(event.event_name(), json))
        })
        .collect()
}

fn chat_sse(chunks: Vec<ChatCompletionChunk>) -> Vec<SseEvent> {
    chunks
        .into_iter()
        .filter_map(|chunk| serde_json::to_string(&chunk).ok().map(SseEvent::data))
        .collect()
}

fn chat_error_sse(error_type: &str, message: &str) -> SseEvent {
    let body = ChatErrorResponse::new(error_type, message);
    SseEvent::data(serde_json::to_string(&body).unwrap_or_default())
}

fn claude_error_sse(message: &str) -> SseEvent {
    let body = ErrorResponse::api_error(message);
    SseEvent::named("error", serde_json::to_string(&body).unwrap_or_default())
}

/// Builds OpenAI chunks that share one id, timestamp and model.
#[derive(Debug)]
struct ChunkWriter {
    id: String,
    created: i64,
    model: String,
    sent_role: bool,
}

impl ChunkWriter {
    fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            sent_role: false,
        }
    }

    fn chunk(&mut self, index: u64, mut delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        if !self.sent_role {
            delta.role = Some("assistant".to_string());
            self.sent_role = true;
        }
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }

    fn usage_chunk(&self, usage: ChatUsage) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: Vec::new(),
            usage: Some(usage),
        }
    }
}

fn text_delta(text: &str) -> ChunkDelta {
    ChunkDelta {
        content: Some(text.to_string()),
        ..ChunkDelta::default()
    }
}

fn reasoning_delta(text: &str) -> ChunkDelta {
    ChunkDelta {
        reasoning_content: Some(text.to_string()),
        ..ChunkDelta::default()
    }
}

fn tool_call_delta(index: u64, id: Option<String>, name: Option<String>, arguments: String) -> ChunkDelta {
    ChunkDelta {
        tool_calls: Some(vec![ChunkToolCall {
            index,
            call_type: id.as_ref().map(|_| "function".to_string()),
            id,
            function: Some(ChunkToolCallFunction {
                name,
                arguments: Some(arguments),
            }),
        }]),
        ..ChunkDelta::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

/// Emits a well-formed Claude event sequence: `message_start`, then content
/// blocks one at a time, then `message_delta` and `message_stop`.
#[derive(Debug)]
struct ClaudeEventWriter {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    next_index: usize,
    open: Option<(usize, BlockKind)>,
}

impl ClaudeEventWriter {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            started: false,
            finished: false,
            next_index: 0,
            open: None,
        }
    }

    fn start(&mut self, input_tokens: u64, out: &mut Vec<StreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        out.push(StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens,
                    ..Usage::default()
                },
            },
        });
        out.push(StreamEvent::Ping);
    }

    fn open_block(&mut self, kind: BlockKind, content_block: ResponseContentBlock, out: &mut Vec<StreamEvent>) -> usize {
        self.close_block(out);
        let index = self.next_index;
        self.next_index += 1;
        out.push(StreamEvent::ContentBlockStart { index, content_block });
        self.open = Some((index, kind));
        index
    }

    fn close_block(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some((index, _)) = self.open.take() {
            out.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn text(&mut self, text: &str, out: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        let index = match self.open {
            Some((index, BlockKind::Text)) => index,
            _ => self.open_block(
                BlockKind::Text,
                ResponseContentBlock::Text { text: String::new() },
                out,
            ),
        };
        out.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta { text: text.to_string() },
        });
    }

    fn thinking(&mut self, text: &str, out: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        let index = match self.open {
            Some((index, BlockKind::Thinking)) => index,
            _ => self.open_block(
                BlockKind::Thinking,
                ResponseContentBlock::Thinking {
                    thinking: String::new(),
                    signature: None,
                },
                out,
            ),
        };
        out.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::ThinkingDelta { thinking: text.to_string() },
        });
    }

    fn tool_use(&mut self, id: String, name: String, out: &mut Vec<StreamEvent>) -> usize {
        self.open_block(
            BlockKind::ToolUse,
            ResponseContentBlock::ToolUse {
                id,
                name,
                input: json!({}),
            },
            out,
        )
    }

    /// Argument fragments only land on the tool block that is still open.
    fn tool_args(&mut self, index: usize, partial_json: &str, out: &mut Vec<StreamEvent>) {
        if partial_json.is_empty() {
            return;
        }
        match self.open {
            Some((open, BlockKind::ToolUse)) if open == index => {
                out.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta {
                        partial_json: partial_json.to_string(),
                    },
                });
            }
            _ => tracing::debug!(block = index, "ignoring arguments for a closed tool block"),
        }
    }

    fn finish(&mut self, stop_reason: &str, tally: &TokenTally, out: &mut Vec<StreamEvent>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.start(tally.input, out);
        self.close_block(out);
        out.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: tally.output,
                input_tokens: Some(tally.input),
                cache_creation_input_tokens: tally.cache_creation,
                cache_read_input_tokens: tally.cache_read,
            },
        });
        out.push(StreamEvent::MessageStop);
    }
}

// ---------------------------------------------------------------------------
// Claude upstream
// ---------------------------------------------------------------------------

/// Forwards Claude events untouched, reading usage on the way.
#[derive(Debug, Default)]
pub struct ClaudePassthrough {
    tally: TokenTally,
}

impl StreamTranslate for ClaudePassthrough {
    fn on_data(&mut self, data: &str) -> Vec<SseEvent> {
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            tracing::debug!("skipping unparseable Claude event");
            return Vec::new();
        };
        let event_type = value.get("type").and_then(Value::as_str).unwrap_or("message").to_string();
        let usage = match event_type.as_str() {
            "message_start" => value.get("message").and_then(|m| m.get("usage")),
            "message_delta" => value.get("usage"),
            _ => None,
        };
        if let Some(usage) = usage {
            let read = |key: &str| usage.get(key).and_then(Value::as_u64);
            if let Some(n) = read("input_tokens") {
                self.tally.input = n;
            }
            if let Some(n) = read("output_tokens") {
                self.tally.output = n;
            }
            if let Some(n) = read("cache_read_input_tokens") {
                self.tally.cache_read = Some(n);
            }
            if let Some(n) = read("cache_creation_input_tokens") {
                self.tally.cache_creation = Some(n);
            }
        }
        vec![SseEvent::named(&event_type, data)]
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        Vec::new()
    }

    fn usage(&self) -> UsageRecord {
        self.tally.record()
    }
}

/// Claude events to OpenAI chat chunks.
#[derive(Debug)]
pub struct ClaudeToOpenAi {
    chunks: ChunkWriter,
    tally: TokenTally,
    /// Claude block index to OpenAI tool-call index.
    tool_indices: HashMap<usize, u64>,
    next_tool: u64,
    sent_finish: bool,
    done: bool,
}

impl ClaudeToOpenAi {
    pub fn new(model: &str) -> Self {
        Self {
            chunks: ChunkWriter::new(model),
            tally: TokenTally::default(),
            tool_indices: HashMap::new(),
            next_tool: 0,
            sent_finish: false,
            done: false,
        }
    }
}

impl StreamTranslate for ClaudeToOpenAi {
    fn on_data(&mut self, data: &str) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable Claude event");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        match event {
            StreamEvent::MessageStart { message } => {
                self.tally.input = message.usage.input_tokens;
                self.tally.cache_read = message.usage.cache_read_input_tokens;
                self.tally.cache_creation = message.usage.cache_creation_input_tokens;
                out.push(self.chunks.chunk(0, text_delta(""), None));
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse { id, name, .. },
            } => {
                let tool_index = self.next_tool;
                self.next_tool += 1;
                self.tool_indices.insert(index, tool_index);
                let delta = tool_call_delta(tool_index, Some(id), Some(name), String::new());
                out.push(self.chunks.chunk(0, delta, None));
            }
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } => out.push(self.chunks.chunk(0, text_delta(&text), None)),
                Delta::ThinkingDelta { thinking } => {
                    out.push(self.chunks.chunk(0, reasoning_delta(&thinking), None));
                }
                Delta::InputJsonDelta { partial_json } => {
                    if let Some(&tool_index) = self.tool_indices.get(&index) {
                        let delta = tool_call_delta(tool_index, None, None, partial_json);
                        out.push(self.chunks.chunk(0, delta, None));
                    }
                }
                Delta::SignatureDelta { .. } | Delta::Unsupported => {}
            },
            StreamEvent::MessageDelta { delta, usage } => {
                self.tally.output = usage.output_tokens;
                if let Some(input) = usage.input_tokens {
                    self.tally.input = input;
                }
                if let Some(read) = usage.cache_read_input_tokens {
                    self.tally.cache_read = Some(read);
                }
                if let Some(reason) = delta.stop_reason {
                    let mapped = map_stop_reason_to_openai(&reason).to_string();
                    out.push(self.chunks.chunk(0, ChunkDelta::default(), Some(mapped)));
                    self.sent_finish = true;
                }
            }
            StreamEvent::MessageStop => return self.finish(),
            StreamEvent::Error { error } => {
                tracing::warn!(message = %error.message, "upstream stream error");
                return vec![chat_error_sse(&error.error_type, &error.message)];
            }
            StreamEvent::ContentBlockStart { .. } | StreamEvent::ContentBlockStop { .. } | StreamEvent::Ping => {}
        }
        chat_sse(out)
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        let mut out = Vec::new();
        if !self.sent_finish {
            out.push(self.chunks.chunk(0, ChunkDelta::default(), Some("stop".to_string())));
        }
        out.push(self.chunks.usage_chunk(self.tally.chat_usage()));
        let mut events = chat_sse(out);
        events.push(SseEvent::done());
        events
    }

    fn usage(&self) -> UsageRecord {
        self.tally.record()
    }
}

// ---------------------------------------------------------------------------
// Gemini upstream
// ---------------------------------------------------------------------------

fn parse_gemini(data: &str) -> std::result::Result<GenerateContentResponse, String> {
    let value: Value = serde_json::from_str(data).map_err(|e| e.to_string())?;
    if let Some(message) = gemini::error_message(&value) {
        return Err(message);
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Gemini `streamGenerateContent` chunks to OpenAI chat chunks.
#[derive(Debug)]
pub struct GeminiToOpenAi {
    chunks: ChunkWriter,
    usage_metadata: Option<UsageMetadata>,
    next_tool: u64,
    has_tool_calls: bool,
    done: bool,
}

impl GeminiToOpenAi {
    pub fn new(model: &str) -> Self {
        Self {
            chunks: ChunkWriter::new(model),
            usage_metadata: None,
            next_tool: 0,
            has_tool_calls: false,
            done: false,
        }
    }
}

impl StreamTranslate for GeminiToOpenAi {
    fn on_data(&mut self, data: &str) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        let resp = match parse_gemini(data) {
            Ok(r) => r,
            Err(message) => {
                tracing::warn!(%message, "Gemini stream chunk rejected");
                return vec![chat_error_sse("api_error", &message)];
            }
        };
        if resp.usage_metadata.is_some() {
            self.usage_metadata = resp.usage_metadata.clone();
        }

        let mut out = Vec::new();
        for (i, candidate) in resp.candidates.iter().enumerate() {
            let index = candidate.index.map_or(i as u64, u64::from);
            for part in candidate.content.iter().flat_map(|c| c.parts.iter()) {
                if let Some(call) = &part.function_call {
                    let tool_index = self.next_tool;
                    self.next_tool += 1;
                    self.has_tool_calls = true;
                    let delta = tool_call_delta(
                        tool_index,
                        Some(format!("call_{}", uuid::Uuid::new_v4().simple())),
                        Some(call.name.clone()),
                        call.args.to_string(),
                    );
                    out.push(self.chunks.chunk(index, delta, None));
                } else if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
                    let delta = if part.is_thought() {
                        reasoning_delta(text)
                    } else {
                        text_delta(text)
                    };
                    out.push(self.chunks.chunk(index, delta, None));
                }
            }
            if let Some(reason) = map_finish_to_openai(candidate.finish_reason.as_deref(), self.has_tool_calls) {
                out.push(self.chunks.chunk(index, ChunkDelta::default(), Some(reason)));
            }
        }
        chat_sse(out)
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        let usage = gemini::chat_usage(self.usage_metadata.as_ref());
        let mut events = chat_sse(vec![self.chunks.usage_chunk(usage)]);
        events.push(SseEvent::done());
        events
    }

    fn usage(&self) -> UsageRecord {
        gemini::usage_from_metadata(self.usage_metadata.as_ref())
    }
}

/// Gemini chunks to Claude events, for Claude callers on a Gemini model.
///
/// Function calls arrive whole, so each one becomes a complete tool-use
/// block. Calls that map to no declared tool are dropped.
#[derive(Debug)]
pub struct GeminiToClaude {
    writer: ClaudeEventWriter,
    declared: HashSet<String>,
    tally: TokenTally,
    finish_reason: Option<String>,
    saw_tool_use: bool,
}

impl GeminiToClaude {
    pub fn new(model: &str, declared: HashSet<String>) -> Self {
        Self {
            writer: ClaudeEventWriter::new(model),
            declared,
            tally: TokenTally::default(),
            finish_reason: None,
            saw_tool_use: false,
        }
    }
}

impl StreamTranslate for GeminiToClaude {
    fn on_data(&mut self, data: &str) -> Vec<SseEvent> {
        if self.writer.finished {
            return Vec::new();
        }
        let resp = match parse_gemini(data) {
            Ok(r) => r,
            Err(message) => {
                tracing::warn!(%message, "Gemini stream chunk rejected");
                return vec![claude_error_sse(&message)];
            }
        };
        if let Some(meta) = &resp.usage_metadata {
            self.tally.absorb_gemini(meta);
        }

        let mut out = Vec::new();
        self.writer.start(self.tally.input, &mut out);
        if let Some(candidate) = resp.candidates.first() {
            for part in candidate.content.iter().flat_map(|c| c.parts.iter()) {
                if let Some(call) = &part.function_call {
                    match denormalize_function_call(&call.name, call.args.clone(), &self.declared) {
                        Some(event) => {
                            let index = self.writer.tool_use(event.id, event.name, &mut out);
                            self.writer.tool_args(index, &event.input.to_string(), &mut out);
                            self.saw_tool_use = true;
                        }
                        None => tracing::warn!(function = %call.name, "dropping call to undeclared function"),
                    }
                } else if let Some(text) = &part.text {
                    if part.is_thought() {
                        self.writer.thinking(text, &mut out);
                    } else {
                        self.writer.text(text, &mut out);
                    }
                }
            }
            if candidate.finish_reason.is_some() {
                self.finish_reason = candidate.finish_reason.clone();
            }
        }
        claude_sse(out)
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let stop_reason = if self.saw_tool_use {
            "tool_use"
        } else {
            map_finish_to_claude(self.finish_reason.as_deref())
        };
        let mut out = Vec::new();
        self.writer.finish(stop_reason, &self.tally, &mut out);
        claude_sse(out)
    }

    fn usage(&self) -> UsageRecord {
        self.tally.record()
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible upstream (Llama, DeepSeek)
// ---------------------------------------------------------------------------

/// Forwards OpenAI chunks untouched, reading usage on the way.
#[derive(Debug, Default)]
pub struct OpenAiPassthrough {
    tally: TokenTally,
    done: bool,
}

impl StreamTranslate for OpenAiPassthrough {
    fn on_data(&mut self, data: &str) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        if data.trim() == DONE {
            self.done = true;
            return vec![SseEvent::done()];
        }
        if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(data) {
            if let Some(usage) = &chunk.usage {
                self.tally.absorb_chat(usage);
            }
        }
        vec![SseEvent::data(data)]
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        vec![SseEvent::done()]
    }

    fn usage(&self) -> UsageRecord {
        self.tally.record()
    }
}

/// OpenAI chunks to Claude events, for Claude callers on a MaaS model.
///
/// The closing events wait for `[DONE]` (or the end of the stream) so the
/// usage chunk that follows `finish_reason` is included.
#[derive(Debug)]
pub struct OpenAiToClaude {
    writer: ClaudeEventWriter,
    declared: HashSet<String>,
    tally: TokenTally,
    /// OpenAI tool-call index to Claude block index; `None` when dropped.
    tool_blocks: HashMap<u64, Option<usize>>,
    finish_reason: Option<String>,
}

impl OpenAiToClaude {
    pub fn new(model: &str, declared: HashSet<String>) -> Self {
        Self {
            writer: ClaudeEventWriter::new(model),
            declared,
            tally: TokenTally::default(),
            tool_blocks: HashMap::new(),
            finish_reason: None,
        }
    }
}

impl StreamTranslate for OpenAiToClaude {
    fn on_data(&mut self, data: &str) -> Vec<SseEvent> {
        if self.writer.finished {
            return Vec::new();
        }
        if data.trim() == DONE {
            return self.finish();
        }
        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                let value: Value = serde_json::from_str(data).unwrap_or(Value::Null);
                if let Some(message) = gemini::error_message(&value) {
                    return vec![claude_error_sse(&message)];
                }
                tracing::debug!(error = %e, "skipping unparseable chunk");
                return Vec::new();
            }
        };
        if let Some(usage) = &chunk.usage {
            self.tally.absorb_chat(usage);
        }

        let mut out = Vec::new();
        self.writer.start(self.tally.input, &mut out);
        let Some(choice) = chunk.choices.first() else {
            return claude_sse(out);
        };

        if let Some(reasoning) = choice.delta.reasoning_content.as_deref() {
            self.writer.thinking(reasoning, &mut out);
        }
        if let Some(content) = choice.delta.content.as_deref() {
            self.writer.text(content, &mut out);
        }

        for tc in choice.delta.tool_calls.iter().flatten() {
            if let Some(id) = &tc.id {
                let name = tc.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default();
                let block = match denormalize_function_call(&name, Value::Null, &self.declared) {
                    Some(event) => Some(self.writer.tool_use(id.clone(), event.name, &mut out)),
                    None => {
                        tracing::warn!(function = %name, "dropping call to undeclared function");
                        None
                    }
                };
                self.tool_blocks.insert(tc.index, block);
            }
            let arguments = tc.function.as_ref().and_then(|f| f.arguments.as_deref());
            if let (Some(args), Some(Some(block))) = (arguments, self.tool_blocks.get(&tc.index)) {
                self.writer.tool_args(*block, args, &mut out);
            }
        }

        if let Some(reason) = &choice.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        claude_sse(out)
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let stop_reason = map_finish_reason(self.finish_reason.as_deref().unwrap_or("stop"));
        let mut out = Vec::new();
        self.writer.finish(stop_reason, &self.tally, &mut out);
        claude_sse(out)
    }

    fn usage(&self) -> UsageRecord {
        self.tally.record()
    }
}
