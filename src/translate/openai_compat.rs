//! OpenAI-compatible MaaS endpoints on Vertex (Llama, DeepSeek).
//!
//! OpenAI callers mostly pass through. Claude callers are translated to chat
//! completions: a single Claude message can expand into several OpenAI
//! messages (a user turn with `tool_result` blocks becomes `tool`-role
//! messages), and the response is folded back into one Claude message.

use std::collections::HashSet;

use super::anthropic_types::{
    ContentBlock, ContentItem, Message, MessagesRequest, MessagesResponse, ResponseContentBlock,
    Role, ToolChoice, ToolChoiceAuto, ToolChoiceSpecific, ToolResultContent, Usage,
};
use super::openai_types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatMessage, ChatRole,
    ChatToolCall, ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction,
    ChatToolChoiceSpecific, ChatUsage, ContentPart, ImageUrlDetail, StopSequences, StreamOptions,
};
use super::request::parse_arguments;
use super::tools::{denormalize_function_call, normalize_tools, NativeTool, NormalizedTools, ToolSpec, ToolTarget};
use super::usage::UsageRecord;
use super::{Compat, RelayInfo, RequestMeta};

/// Forward an OpenAI request with the vendor model name and a tool list the
/// endpoint accepts.
pub fn prepare_openai(
    mut req: ChatCompletionRequest,
    info: &RelayInfo,
    compat: &Compat,
) -> (ChatCompletionRequest, RequestMeta) {
    let mut meta = RequestMeta::default();
    req.model = info.upstream_model.clone();

    let mut caller_tools = req.tools.take().unwrap_or_default();
    if req.web_search_options.take().is_some() {
        caller_tools.push(ToolSpec::WebSearch(NativeTool {
            tool_type: "web_search_20250305".to_string(),
            name: Some("web_search".to_string()),
            extra: serde_json::Map::new(),
        }));
        meta.adjustments.push("web_search_options replaced by tools".to_string());
    }

    let normalized = normalize_tools(
        &caller_tools,
        ToolTarget::OpenAiCompatible,
        &compat.supported_tool_types,
    );
    meta.declared_tools = normalized.declared_names(&caller_tools);
    let functions = function_tools(&normalized);
    req.tool_choice = reconcile_tool_choice(req.tool_choice.take(), &functions, &mut meta);
    req.tools = (!functions.is_empty()).then_some(functions);
    meta.tool_actions = normalized.actions;

    if info.is_stream {
        req.stream = Some(true);
        req.stream_options = Some(StreamOptions {
            include_usage: true,
        });
    }

    (req, meta)
}

/// Keep only tools with a function form; the MaaS endpoints take nothing else.
fn function_tools(normalized: &NormalizedTools) -> Vec<ToolSpec> {
    normalized
        .tools
        .iter()
        .filter_map(|tool| match tool.as_function() {
            Some(f) => Some(ToolSpec::Function(f)),
            None => {
                tracing::warn!(tool = ?tool.name(), "tool has no function form; dropped for OpenAI-compatible endpoint");
                None
            }
        })
        .collect()
}

/// Drop a `tool_choice` that no longer matches the offered functions.
fn reconcile_tool_choice(
    choice: Option<ChatToolChoice>,
    functions: &[ToolSpec],
    meta: &mut RequestMeta,
) -> Option<ChatToolChoice> {
    match choice {
        Some(_) if functions.is_empty() => None,
        Some(ChatToolChoice::Specific(s))
            if !functions.iter().any(|f| f.name() == Some(s.function.name.as_str())) =>
        {
            meta.adjustments
                .push(format!("tool_choice dropped: {} not offered", s.function.name));
            None
        }
        other => other,
    }
}

/// Translate a Claude Messages request into an OpenAI chat completion request.
pub fn claude_to_openai(
    req: MessagesRequest,
    info: &RelayInfo,
    compat: &Compat,
) -> (ChatCompletionRequest, RequestMeta) {
    let mut meta = RequestMeta::default();
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(ChatMessage::text(ChatRole::System, system.as_text()));
    }

    for msg in &req.messages {
        messages.append(&mut translate_message(msg));
    }

    let caller_tools = req.tools.clone().unwrap_or_default();
    let normalized = normalize_tools(
        &caller_tools,
        ToolTarget::OpenAiCompatible,
        &compat.supported_tool_types,
    );
    meta.declared_tools = normalized.declared_names(&caller_tools);
    let functions = function_tools(&normalized);

    let tool_choice = reconcile_tool_choice(
        req.tool_choice.as_ref().map(translate_tool_choice),
        &functions,
        &mut meta,
    );
    meta.tool_actions = normalized.actions;

    let stream_options = info.is_stream.then_some(StreamOptions {
        include_usage: true,
    });

    let body = ChatCompletionRequest {
        model: info.upstream_model.clone(),
        messages,
        max_tokens: Some(req.max_tokens),
        max_completion_tokens: None,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        n: None,
        stream: info.is_stream.then_some(true),
        stream_options,
        tools: (!functions.is_empty()).then_some(functions),
        tool_choice,
        stop: req.stop_sequences.clone().map(StopSequences::Many),
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
        web_search_options: None,
        extra: Default::default(),
    };
    (body, meta)
}

fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    let items = msg.content.items();
    match msg.role {
        Role::User => translate_user_message(&items),
        Role::Assistant => translate_assistant_message(&items),
    }
}

fn translate_user_message(items: &[ContentItem]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for item in items {
        let ContentItem::Block(block) = item else {
            tracing::debug!("skipping unrecognized content block for OpenAI-compatible endpoint");
            continue;
        };
        match block {
            ContentBlock::Text { text, .. } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source, .. } => {
                let url = match (&source.media_type, &source.data, &source.url) {
                    (Some(mime), Some(data), _) => format!("data:{mime};base64,{data}"),
                    (_, _, Some(url)) => url.clone(),
                    _ => continue,
                };
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail { url, detail: None },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                ..
            } => {
                // flush accumulated parts so ordering survives
                if !content_parts.is_empty() {
                    messages.push(user_message(std::mem::take(&mut content_parts)));
                }
                messages.push(ChatMessage {
                    role: ChatRole::Tool,
                    content: Some(ChatContent::Text(tool_result_to_string(content.as_ref(), *is_error))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                    name: None,
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::RedactedThinking { .. }
            | ContentBlock::ToolUse { .. } => {}
        }
    }

    if !content_parts.is_empty() {
        messages.push(user_message(content_parts));
    }
    if messages.is_empty() {
        messages.push(ChatMessage::text(ChatRole::User, String::new()));
    }
    messages
}

fn user_message(parts: Vec<ContentPart>) -> ChatMessage {
    let content = match parts.as_slice() {
        [ContentPart::Text { text }] => ChatContent::Text(text.clone()),
        _ => ChatContent::Parts(parts),
    };
    ChatMessage {
        role: ChatRole::User,
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
        name: None,
    }
}

fn translate_assistant_message(items: &[ContentItem]) -> Vec<ChatMessage> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for item in items {
        match item {
            ContentItem::Block(ContentBlock::Text { text, .. }) => text_parts.push(text),
            ContentItem::Block(ContentBlock::ToolUse { id, name, input, .. }) => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                });
            }
            _ => {}
        }
    }

    vec![ChatMessage {
        role: ChatRole::Assistant,
        content: (!text_parts.is_empty()).then(|| ChatContent::Text(text_parts.concat())),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
        name: None,
    }]
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };
    match content {
        Some(ToolResultContent::Text(t)) => format!("{prefix}{t}"),
        Some(ToolResultContent::Blocks(items)) => {
            let text = items
                .iter()
                .filter_map(ContentItem::text)
                .collect::<Vec<_>>()
                .join("\n");
            format!("{prefix}{text}")
        }
        None => format!("{prefix}(no content)"),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => ChatToolChoice::String("required".to_string()),
            "none" => ChatToolChoice::String("none".to_string()),
            _ => ChatToolChoice::String("auto".to_string()),
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Fold an OpenAI chat completion into a Claude message.
///
/// Reasoning text (DeepSeek R1) becomes a thinking block. Tool calls are
/// mapped back to the caller's tool names; calls to unknown functions are
/// dropped.
pub fn openai_to_claude_response(
    resp: &ChatCompletionResponse,
    info: &RelayInfo,
    declared: &HashSet<String>,
) -> MessagesResponse {
    let choice = resp.choices.first();
    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        if let Some(reasoning) = c.message.reasoning_content.as_deref().filter(|r| !r.is_empty()) {
            content.push(ResponseContentBlock::Thinking {
                thinking: reasoning.to_string(),
                signature: None,
            });
        }
        if let Some(text) = c.message.content.as_deref().filter(|t| !t.is_empty()) {
            content.push(ResponseContentBlock::Text {
                text: text.to_string(),
            });
        }
        for tc in c.message.tool_calls.iter().flatten() {
            let args = parse_arguments(&tc.function.arguments);
            match denormalize_function_call(&tc.function.name, args, declared) {
                Some(event) => content.push(ResponseContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: event.name,
                    input: event.input,
                }),
                None => tracing::warn!(function = %tc.function.name, "dropping call to undeclared function"),
            }
        }
    }

    // Claude clients expect non-empty content
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map_or("end_turn", map_finish_reason);

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: u.prompt_tokens_details.as_ref().map(|d| d.cached_tokens),
    });

    MessagesResponse {
        id: format!("msg_{}", resp.id.trim_start_matches("chatcmpl-")),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: info.origin_model.clone(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    }
}

/// OpenAI `finish_reason` to Claude `stop_reason`.
pub fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        _ => "end_turn",
    }
}

pub fn usage_record(usage: Option<&ChatUsage>) -> UsageRecord {
    match usage {
        Some(u) => UsageRecord::tokens(u.prompt_tokens, u.completion_tokens)
            .with_cache(u.prompt_tokens_details.as_ref().map(|d| d.cached_tokens), None),
        None => UsageRecord::tokens(0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Mode;
    use crate::translate::openai_types::{Choice, ChoiceMessage};
    use serde_json::json;

    fn info(model: &str, stream: bool) -> RelayInfo {
        RelayInfo::resolve(model, stream, Mode::Gemini, true, "")
    }

    #[test]
    fn test_simple_text_request() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "meta/llama3-405b-instruct-maas",
            "max_tokens": 1024,
            "system": "You are helpful",
            "messages": [{"role": "user", "content": "Hello"}],
            "stop_sequences": ["END"]
        }))
        .unwrap();

        let (out, _) = claude_to_openai(req, &info("meta/llama3-405b-instruct-maas", false), &Compat::default());
        assert_eq!(out.model, "meta/llama3-405b-instruct-maas");
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, ChatRole::System);
        assert_eq!(out.max_tokens, Some(1024));
        assert_eq!(out.stop.unwrap().to_vec(), vec!["END".to_string()]);
        assert!(out.stream_options.is_none());
    }

    #[test]
    fn test_tool_results_become_tool_messages() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "meta/llama3-405b-instruct-maas",
            "max_tokens": 100,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Checking."},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Oslo"}}
                ]},
                {"role": "user", "content": [
                    {"type": "text", "text": "here you go"},
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "rain", "is_error": true}
                ]}
            ]
        }))
        .unwrap();

        let (out, _) = claude_to_openai(req, &info("meta/llama3-405b-instruct-maas", true), &Compat::default());
        assert_eq!(out.messages.len(), 3);
        let call = &out.messages[0].tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.name, "get_weather");
        assert_eq!(call.function.arguments, r#"{"city":"Oslo"}"#);
        assert_eq!(out.messages[1].role, ChatRole::User);
        assert_eq!(out.messages[2].role, ChatRole::Tool);
        assert_eq!(out.messages[2].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(out.messages[2].content.as_ref().unwrap().joined_text(), "ERROR: rain");
        assert!(out.stream_options.unwrap().include_usage);
    }

    #[test]
    fn test_native_bash_offered_as_function() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "deepseek-ai/deepseek-r1-0528-maas",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "ls"}],
            "tools": [{"type": "bash_20250124", "name": "bash"}],
            "tool_choice": {"type": "tool", "name": "bash"}
        }))
        .unwrap();

        let (out, meta) = claude_to_openai(req, &info("deepseek-ai/deepseek-r1-0528-maas", false), &Compat::default());
        let tools = serde_json::to_value(out.tools.unwrap()).unwrap();
        assert_eq!(tools[0]["function"]["name"], "bash_command");
        // the caller named its own tool, which is not what the endpoint sees
        assert!(out.tool_choice.is_none());
        assert!(meta.declared_tools.contains("bash"));
    }

    #[test]
    fn test_prepare_openai_passthrough() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "deepseek-ai/deepseek-r1-0528-maas",
            "messages": [{"role": "user", "content": "hi"}],
            "web_search_options": {},
            "tool_choice": "auto",
            "repetition_penalty": 1.1
        }))
        .unwrap();

        let (out, meta) = prepare_openai(req, &info("deepseek-ai/deepseek-r1-0528-maas", true), &Compat::default());
        let body = serde_json::to_value(&out).unwrap();
        assert_eq!(body["model"], "deepseek-ai/deepseek-r1-0528-maas");
        assert!(body.get("web_search_options").is_none());
        assert_eq!(body["tools"][0]["function"]["name"], "bash");
        assert_eq!(body["tools"][1]["function"]["name"], "web_search");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["repetition_penalty"], 1.1);
        assert!(!meta.adjustments.is_empty());
    }

    fn make_response(message: ChoiceMessage, finish_reason: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-abc123".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "deepseek-ai/deepseek-r1-0528-maas".to_string(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some(finish_reason.to_string()),
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_response_with_reasoning_and_tools() {
        let resp = make_response(
            ChoiceMessage {
                role: "assistant".to_string(),
                content: Some("Let me check.".to_string()),
                reasoning_content: Some("the user wants files".to_string()),
                tool_calls: Some(vec![
                    ChatToolCall {
                        id: "call_abc".to_string(),
                        call_type: "function".to_string(),
                        function: ChatToolCallFunction {
                            name: "bash_command".to_string(),
                            arguments: "{\"command\":\"ls\"}".to_string(),
                        },
                    },
                    ChatToolCall {
                        id: "call_def".to_string(),
                        call_type: "function".to_string(),
                        function: ChatToolCallFunction {
                            name: "made_up".to_string(),
                            arguments: "{}".to_string(),
                        },
                    },
                ]),
            },
            "tool_calls",
        );

        let result = openai_to_claude_response(&resp, &info("deepseek-ai/deepseek-r1-0528-maas", false), &HashSet::new());
        assert_eq!(result.id, "msg_abc123");
        assert_eq!(result.model, "deepseek-ai/deepseek-r1-0528-maas");
        assert_eq!(result.content.len(), 3);
        assert!(matches!(result.content[0], ResponseContentBlock::Thinking { .. }));
        match &result.content[2] {
            ResponseContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "call_abc");
                assert_eq!(name, "bash");
                assert_eq!(input["command"], "ls");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
        assert_eq!(result.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 20);
    }

    #[test]
    fn test_empty_response_gets_text_block() {
        let resp = make_response(
            ChoiceMessage {
                role: "assistant".to_string(),
                content: None,
                reasoning_content: None,
                tool_calls: None,
            },
            "length",
        );
        let result = openai_to_claude_response(&resp, &info("meta/llama3-405b-instruct-maas", false), &HashSet::new());
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.stop_reason.as_deref(), Some("max_tokens"));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason("stop"), "end_turn");
        assert_eq!(map_finish_reason("length"), "max_tokens");
        assert_eq!(map_finish_reason("tool_calls"), "tool_use");
        assert_eq!(map_finish_reason("content_filter"), "end_turn");
    }
}
