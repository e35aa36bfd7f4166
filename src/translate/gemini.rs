//! Gemini `generateContent` conversions, in both directions.
//!
//! OpenAI callers get a full mapping. Claude callers take a reduced path:
//! the system prompt and a guidance string ride in a leading user turn,
//! and agent tools are swapped for their table equivalents.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};

use super::anthropic_types::{
    ContentBlock, ContentItem, MessageContent, MessagesRequest, MessagesResponse,
    ResponseContentBlock, Role, ToolChoice, ToolResultContent, Usage,
};
use super::gemini_types::{
    Blob, Content, FileData, FunctionCall, FunctionCallingConfig, FunctionDeclaration,
    FunctionResponse, GeminiTool, GenerateContentRequest, GenerateContentResponse,
    GenerationConfig, Part, ThinkingConfig, ToolConfig, UsageMetadata,
};
use super::openai_types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatRole, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatUsage, Choice, ChoiceMessage,
    CompletionTokensDetails, ContentPart, PromptTokensDetails,
};
use super::request::parse_arguments;
use super::tools::{
    clean_schema_for_gemini, denormalize_function_call, normalize_tools, NativeTool,
    NormalizedTools, ToolActionKind, ToolSpec, ToolTarget, AGENT_TOOLS,
};
use super::usage::UsageRecord;
use super::{Compat, RelayInfo, RequestMeta};
use crate::registry::ThinkingDirective;

// ---------------------------------------------------------------------------
// OpenAI chat -> Gemini
// ---------------------------------------------------------------------------

pub fn openai_to_gemini(
    req: ChatCompletionRequest,
    info: &RelayInfo,
    compat: &Compat,
) -> (GenerateContentRequest, RequestMeta) {
    let mut meta = RequestMeta::default();
    let mut system_parts: Vec<Part> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();
    let mut call_names: HashMap<String, String> = HashMap::new();

    for msg in &req.messages {
        match msg.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = &msg.content {
                    system_parts.push(Part::text(content.joined_text()));
                }
            }
            ChatRole::User => {
                let parts = user_parts(msg.content.as_ref());
                push_content(&mut contents, "user", parts);
            }
            ChatRole::Assistant => {
                let mut parts = Vec::new();
                if let Some(content) = &msg.content {
                    let text = content.joined_text();
                    if !text.is_empty() {
                        parts.push(Part::text(text));
                    }
                }
                for call in msg.tool_calls.iter().flatten() {
                    call_names.insert(call.id.clone(), call.function.name.clone());
                    parts.push(Part {
                        function_call: Some(FunctionCall {
                            name: call.function.name.clone(),
                            args: parse_arguments(&call.function.arguments),
                        }),
                        ..Default::default()
                    });
                }
                push_content(&mut contents, "model", parts);
            }
            ChatRole::Tool => {
                let name = msg
                    .name
                    .clone()
                    .or_else(|| msg.tool_call_id.as_ref().and_then(|id| call_names.get(id).cloned()))
                    .unwrap_or_default();
                let text = msg.content.as_ref().map(ChatContent::joined_text).unwrap_or_default();
                let part = Part {
                    function_response: Some(FunctionResponse {
                        name,
                        response: json!({"content": text}),
                    }),
                    ..Default::default()
                };
                push_content(&mut contents, "user", vec![part]);
            }
        }
    }

    let mut caller_tools = req.tools.clone().unwrap_or_default();
    if req.web_search_options.is_some() {
        caller_tools.push(web_search_tool());
    }
    let normalized = normalize_tools(
        &caller_tools,
        ToolTarget::GeminiDeclarations,
        &compat.supported_tool_types,
    );
    meta.declared_tools = normalized.declared_names(&caller_tools);

    let tools = declarations(&normalized);
    let tool_config = match (&tools, &req.tool_choice) {
        (Some(_), Some(choice)) => Some(openai_tool_config(choice)),
        _ => None,
    };
    meta.tool_actions = normalized.actions;

    let generation_config = GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        max_output_tokens: req.max_tokens.or(req.max_completion_tokens),
        candidate_count: req.n,
        stop_sequences: req.stop.as_ref().map(|s| s.to_vec()),
        thinking_config: thinking_config(info.thinking),
    };

    let body = GenerateContentRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: system_parts,
            })
        },
        tools,
        tool_config,
        generation_config: Some(generation_config),
    };
    (body, meta)
}

fn user_parts(content: Option<&ChatContent>) -> Vec<Part> {
    match content {
        None => Vec::new(),
        Some(ChatContent::Text(t)) => vec![Part::text(t.clone())],
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(Part::text(text.clone())),
                ContentPart::ImageUrl { image_url } => Some(match image_url.as_inline_data() {
                    Some((mime, data)) => Part {
                        inline_data: Some(Blob {
                            mime_type: mime.to_string(),
                            data: data.to_string(),
                        }),
                        ..Default::default()
                    },
                    None => Part {
                        file_data: Some(FileData {
                            mime_type: Some(guess_image_mime(&image_url.url).to_string()),
                            file_uri: image_url.url.clone(),
                        }),
                        ..Default::default()
                    },
                }),
                ContentPart::Unsupported => {
                    tracing::warn!("dropping unsupported content part");
                    None
                }
            })
            .collect(),
    }
}

fn guess_image_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else {
        "image/jpeg"
    }
}

/// Append parts to the conversation, merging into the previous turn when the
/// role repeats.
fn push_content(contents: &mut Vec<Content>, role: &str, parts: Vec<Part>) {
    if parts.is_empty() {
        return;
    }
    match contents.last_mut() {
        Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
        _ => contents.push(Content::new(role, parts)),
    }
}

fn web_search_tool() -> ToolSpec {
    ToolSpec::WebSearch(NativeTool {
        tool_type: "web_search_20250305".to_string(),
        name: Some("web_search".to_string()),
        extra: serde_json::Map::new(),
    })
}

/// Collect function declarations from a normalized tool list. Tools with no
/// function form cannot be declared to Gemini and are skipped with a warning.
fn declarations(normalized: &NormalizedTools) -> Option<Vec<GeminiTool>> {
    let function_declarations: Vec<FunctionDeclaration> = normalized
        .tools
        .iter()
        .filter_map(|tool| match tool.as_function() {
            Some(f) => Some(FunctionDeclaration {
                name: f.name,
                description: f.description,
                parameters: if f.parameters.is_null() {
                    None
                } else {
                    Some(clean_schema_for_gemini(&f.parameters))
                },
            }),
            None => {
                tracing::warn!(tool = ?tool.name(), "tool has no function form; not declared to Gemini");
                None
            }
        })
        .collect();

    if function_declarations.is_empty() {
        None
    } else {
        Some(vec![GeminiTool {
            function_declarations,
        }])
    }
}

fn openai_tool_config(choice: &ChatToolChoice) -> ToolConfig {
    let (mode, allowed) = match choice {
        ChatToolChoice::String(s) => match s.as_str() {
            "none" => ("NONE", None),
            "required" => ("ANY", None),
            _ => ("AUTO", None),
        },
        ChatToolChoice::Specific(s) => ("ANY", Some(vec![s.function.name.clone()])),
    };
    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: mode.to_string(),
            allowed_function_names: allowed,
        },
    }
}

pub fn thinking_config(directive: Option<ThinkingDirective>) -> Option<ThinkingConfig> {
    directive.map(|d| match d {
        ThinkingDirective::Budget(n) => ThinkingConfig {
            thinking_budget: Some(n),
            include_thoughts: Some(true),
        },
        ThinkingDirective::Enabled => ThinkingConfig {
            thinking_budget: None,
            include_thoughts: Some(true),
        },
        ThinkingDirective::Disabled => ThinkingConfig {
            thinking_budget: Some(0),
            include_thoughts: None,
        },
    })
}

// ---------------------------------------------------------------------------
// Claude messages -> Gemini (degraded path)
// ---------------------------------------------------------------------------

pub fn claude_to_gemini(
    req: MessagesRequest,
    info: &RelayInfo,
    compat: &Compat,
) -> (GenerateContentRequest, RequestMeta) {
    let mut meta = RequestMeta::default();

    let caller_tools = req.tools.clone().unwrap_or_default();
    let normalized = normalize_tools(
        &caller_tools,
        ToolTarget::GeminiDeclarations,
        &compat.supported_tool_types,
    );
    meta.declared_tools = normalized.declared_names(&caller_tools);

    // history must use the same names as the declarations
    let renames: HashMap<&str, &str> = normalized
        .actions
        .iter()
        .filter(|a| a.action == ToolActionKind::Translated)
        .filter_map(|a| a.into.as_deref())
        .filter_map(|into| AGENT_TOOLS.iter().find(|t| t.function_name == into))
        .map(|t| (t.caller_name, t.function_name))
        .collect();

    let mut contents: Vec<Content> = Vec::new();

    let system = req.system.as_ref().map(|s| s.as_text()).unwrap_or_default();
    let lead = match (system.is_empty(), compat.gemini_guidance.is_empty()) {
        (true, true) => String::new(),
        (false, true) => system,
        (true, false) => compat.gemini_guidance.clone(),
        (false, false) => format!("{system}\n\n{}", compat.gemini_guidance),
    };
    if !lead.is_empty() {
        contents.push(Content::new("user", vec![Part::text(lead)]));
        meta.adjustments.push("system prompt and guidance sent as leading user turn".to_string());
    }

    // the lead turn stays its own message; merging starts with the history
    let mut history: Vec<Content> = Vec::new();
    let mut call_names: HashMap<String, String> = HashMap::new();
    for msg in &req.messages {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        let parts = claude_parts(&msg.content, &renames, &mut call_names);
        push_content(&mut history, role, parts);
    }
    contents.extend(history);

    let tools = declarations(&normalized);
    let tool_config = match (&tools, &req.tool_choice) {
        (Some(_), Some(choice)) => Some(claude_tool_config(choice, &renames)),
        _ => None,
    };
    meta.tool_actions = normalized.actions;

    let generation_config = GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        max_output_tokens: Some(req.max_tokens),
        candidate_count: None,
        stop_sequences: req.stop_sequences.clone(),
        thinking_config: thinking_config(info.thinking),
    };

    let body = GenerateContentRequest {
        contents,
        system_instruction: None,
        tools,
        tool_config,
        generation_config: Some(generation_config),
    };
    (body, meta)
}

fn claude_parts(
    content: &MessageContent,
    renames: &HashMap<&str, &str>,
    call_names: &mut HashMap<String, String>,
) -> Vec<Part> {
    let mut parts = Vec::new();
    for item in content.items() {
        match item {
            ContentItem::Block(ContentBlock::Text { text, .. }) => parts.push(Part::text(text)),
            ContentItem::Block(ContentBlock::Image { source, .. }) => {
                if let (Some(mime), Some(data)) = (source.media_type, source.data) {
                    parts.push(Part {
                        inline_data: Some(Blob {
                            mime_type: mime,
                            data,
                        }),
                        ..Default::default()
                    });
                } else if let Some(url) = source.url {
                    parts.push(Part {
                        file_data: Some(FileData {
                            mime_type: Some(guess_image_mime(&url).to_string()),
                            file_uri: url,
                        }),
                        ..Default::default()
                    });
                }
            }
            ContentItem::Block(ContentBlock::ToolUse { id, name, input, .. }) => {
                let name = renames.get(name.as_str()).map_or(name.clone(), |n| (*n).to_string());
                call_names.insert(id, name.clone());
                parts.push(Part {
                    function_call: Some(FunctionCall { name, args: input }),
                    ..Default::default()
                });
            }
            ContentItem::Block(ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                ..
            }) => {
                let text = match content {
                    Some(ToolResultContent::Text(t)) => t,
                    Some(ToolResultContent::Blocks(items)) => items
                        .iter()
                        .filter_map(ContentItem::text)
                        .collect::<Vec<_>>()
                        .join("\n"),
                    None => String::new(),
                };
                let key = if is_error == Some(true) { "error" } else { "content" };
                parts.push(Part {
                    function_response: Some(FunctionResponse {
                        name: call_names.get(&tool_use_id).cloned().unwrap_or(tool_use_id),
                        response: json!({ key: text }),
                    }),
                    ..Default::default()
                });
            }
            ContentItem::Block(ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. }) => {}
            ContentItem::Unrecognized(v) => {
                tracing::debug!(block_type = ?v.get("type"), "skipping content block Gemini cannot take");
            }
        }
    }
    parts
}

fn claude_tool_config(choice: &ToolChoice, renames: &HashMap<&str, &str>) -> ToolConfig {
    let (mode, allowed) = match choice {
        ToolChoice::Auto(a) => match a.choice_type.as_str() {
            "none" => ("NONE", None),
            "any" => ("ANY", None),
            _ => ("AUTO", None),
        },
        ToolChoice::Specific(s) => {
            let name = renames.get(s.name.as_str()).map_or(s.name.clone(), |n| (*n).to_string());
            ("ANY", Some(vec![name]))
        }
    };
    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: mode.to_string(),
            allowed_function_names: allowed,
        },
    }
}

// ---------------------------------------------------------------------------
// Gemini -> callers
// ---------------------------------------------------------------------------

/// Usage from `usageMetadata`; thought tokens count as completion.
pub fn usage_from_metadata(meta: Option<&UsageMetadata>) -> UsageRecord {
    let Some(m) = meta else {
        return UsageRecord::tokens(0, 0);
    };
    let cached = (m.cached_content_token_count > 0).then_some(m.cached_content_token_count);
    UsageRecord::tokens(m.prompt_token_count, m.candidates_token_count + m.thoughts_token_count)
        .with_cache(cached, None)
}

pub fn map_finish_to_claude(reason: Option<&str>) -> &'static str {
    match reason {
        Some("MAX_TOKENS") => "max_tokens",
        Some("SAFETY" | "RECITATION") => "stop_sequence",
        _ => "end_turn",
    }
}

pub fn map_finish_to_openai(reason: Option<&str>, has_tool_calls: bool) -> Option<String> {
    let mapped = match reason? {
        "STOP" if has_tool_calls => "tool_calls",
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => "content_filter",
        _ => "stop",
    };
    Some(mapped.to_string())
}

pub fn gemini_to_openai(resp: &GenerateContentResponse, info: &RelayInfo) -> ChatCompletionResponse {
    let choices = resp
        .candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            let mut text = String::new();
            let mut reasoning = String::new();
            let mut tool_calls = Vec::new();
            for part in candidate.content.iter().flat_map(|c| c.parts.iter()) {
                if let Some(call) = &part.function_call {
                    tool_calls.push(ChatToolCall {
                        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                        call_type: "function".to_string(),
                        function: ChatToolCallFunction {
                            name: call.name.clone(),
                            arguments: call.args.to_string(),
                        },
                    });
                } else if let Some(t) = &part.text {
                    if part.is_thought() {
                        reasoning.push_str(t);
                    } else {
                        text.push_str(t);
                    }
                }
            }
            let has_calls = !tool_calls.is_empty();
            Choice {
                index: candidate.index.map_or(i as u64, u64::from),
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() && has_calls { None } else { Some(text) },
                    reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                    tool_calls: has_calls.then_some(tool_calls),
                },
                finish_reason: map_finish_to_openai(candidate.finish_reason.as_deref(), has_calls)
                    .or_else(|| Some("stop".to_string())),
            }
        })
        .collect();

    ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: info.origin_model.clone(),
        choices,
        usage: Some(chat_usage(resp.usage_metadata.as_ref())),
    }
}

pub fn chat_usage(meta: Option<&UsageMetadata>) -> ChatUsage {
    let m = meta.cloned().unwrap_or_default();
    let completion = m.candidates_token_count + m.thoughts_token_count;
    ChatUsage {
        prompt_tokens: m.prompt_token_count,
        completion_tokens: completion,
        total_tokens: m.prompt_token_count + completion,
        prompt_tokens_details: (m.cached_content_token_count > 0).then(|| PromptTokensDetails {
            cached_tokens: m.cached_content_token_count,
        }),
        completion_tokens_details: (m.thoughts_token_count > 0).then(|| CompletionTokensDetails {
            reasoning_tokens: m.thoughts_token_count,
        }),
    }
}

/// Degraded-path response: first candidate only, function calls mapped back
/// to the caller's tool names. Calls that map to nothing are dropped.
pub fn gemini_to_claude(
    resp: &GenerateContentResponse,
    info: &RelayInfo,
    declared: &HashSet<String>,
) -> MessagesResponse {
    let candidate = resp.candidates.first();
    let mut content = Vec::new();
    for part in candidate.and_then(|c| c.content.as_ref()).iter().flat_map(|c| c.parts.iter()) {
        if let Some(call) = &part.function_call {
            match denormalize_function_call(&call.name, call.args.clone(), declared) {
                Some(event) => content.push(ResponseContentBlock::ToolUse {
                    id: event.id,
                    name: event.name,
                    input: event.input,
                }),
                None => tracing::warn!(function = %call.name, "dropping call to undeclared function"),
            }
        } else if let Some(t) = &part.text {
            if part.is_thought() {
                content.push(ResponseContentBlock::Thinking {
                    thinking: t.clone(),
                    signature: None,
                });
            } else {
                content.push(ResponseContentBlock::Text { text: t.clone() });
            }
        }
    }

    let has_tool_use = content
        .iter()
        .any(|b| matches!(b, ResponseContentBlock::ToolUse { .. }));
    let stop_reason = if has_tool_use {
        "tool_use"
    } else {
        map_finish_to_claude(candidate.and_then(|c| c.finish_reason.as_deref()))
    };

    let usage = resp.usage_metadata.clone().unwrap_or_default();
    MessagesResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: info.origin_model.clone(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage: Usage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count + usage.thoughts_token_count,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: (usage.cached_content_token_count > 0)
                .then_some(usage.cached_content_token_count),
        },
    }
}

/// Parse a Gemini error body, if that is what it is.
pub fn error_message(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Mode;

    fn info(model: &str) -> RelayInfo {
        RelayInfo::resolve(model, false, Mode::Gemini, true, "")
    }

    #[test]
    fn test_openai_request_mapping() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gemini-2.5-flash-thinking-1024",
            "messages": [
                {"role": "system", "content": "terse"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
                ]},
                {"role": "assistant", "tool_calls": [
                    {"id": "c1", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":1}"}}
                ]},
                {"role": "tool", "tool_call_id": "c1", "content": "found"}
            ],
            "max_tokens": 256,
            "temperature": 0.2,
            "tools": [{"type": "function", "function": {
                "name": "lookup",
                "parameters": {"type": "object", "additionalProperties": false, "properties": {"q": {"type": "integer"}}}
            }}],
            "tool_choice": "required"
        }))
        .unwrap();

        let (body, _) = openai_to_gemini(req, &info("gemini-2.5-flash-thinking-1024"), &Compat::default());
        let out = serde_json::to_value(&body).unwrap();

        assert_eq!(out["systemInstruction"]["parts"][0]["text"], "terse");
        assert_eq!(out["contents"][0]["role"], "user");
        assert_eq!(out["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(out["contents"][1]["role"], "model");
        assert_eq!(out["contents"][1]["parts"][0]["functionCall"]["args"]["q"], 1);
        assert_eq!(out["contents"][2]["parts"][0]["functionResponse"]["name"], "lookup");
        assert_eq!(out["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(out["generationConfig"]["thinkingConfig"]["thinkingBudget"], 1024);
        assert_eq!(out["generationConfig"]["thinkingConfig"]["includeThoughts"], true);
        let decl = &out["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["name"], "lookup");
        assert!(decl["parameters"].get("additionalProperties").is_none());
        assert_eq!(out["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
    }

    #[test]
    fn test_nothinking_sets_zero_budget() {
        let cfg = thinking_config(Some(ThinkingDirective::Disabled)).unwrap();
        assert_eq!(cfg.thinking_budget, Some(0));
        assert_eq!(thinking_config(None), None);
    }

    #[test]
    fn test_claude_degraded_path() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "gemini-2.5-pro",
            "max_tokens": 512,
            "system": "You are an agent.",
            "messages": [
                {"role": "user", "content": "list files"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "LS", "input": {"path": "/"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "a b"}
                ]}
            ],
            "tools": [
                {"name": "LS", "input_schema": {"type": "object"}},
                {"name": "WebSearch", "input_schema": {"type": "object"}}
            ]
        }))
        .unwrap();

        let (body, meta) = claude_to_gemini(req, &info("gemini-2.5-pro"), &Compat::default());
        let out = serde_json::to_value(&body).unwrap();

        let lead = out["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(lead.starts_with("You are an agent.\n\nWhen using tools, always:"));
        assert_eq!(out["contents"][0]["parts"].as_array().unwrap().len(), 1);
        assert_eq!(out["contents"][1]["role"], "user");
        assert_eq!(out["contents"][1]["parts"][0]["text"], "list files");
        assert_eq!(out["contents"][2]["parts"][0]["functionCall"]["name"], "directory_lister");
        assert_eq!(out["contents"][3]["parts"][0]["functionResponse"]["name"], "directory_lister");

        let names: Vec<&str> = out["tools"][0]["functionDeclarations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["directory_lister", "bash_command"]);
        assert!(meta.declared_tools.contains("LS"));
    }

    #[test]
    fn test_guidance_is_a_separate_user_turn() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "gemini-2.5-flash",
            "max_tokens": 64,
            "system": "SYS",
            "messages": [{"role": "user", "content": "hello"}]
        }))
        .unwrap();

        let (body, _) = claude_to_gemini(req, &info("gemini-2.5-flash"), &Compat::default());
        let out = serde_json::to_value(&body).unwrap();
        let contents = out["contents"].as_array().unwrap();

        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert!(contents[0]["parts"][0]["text"].as_str().unwrap().starts_with("SYS\n\n"));
        assert_eq!(contents[1]["parts"], json!([{"text": "hello"}]));
    }

    #[test]
    fn test_gemini_response_to_claude() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "Let me look."},
                    {"functionCall": {"name": "bash_command", "args": {"command": "ls"}}},
                    {"functionCall": {"name": "not_declared", "args": {}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "thoughtsTokenCount": 2}
        }))
        .unwrap();

        let out = gemini_to_claude(&resp, &info("gemini-2.5-pro"), &HashSet::new());
        assert_eq!(out.content.len(), 2);
        match &out.content[1] {
            ResponseContentBlock::ToolUse { name, input, .. } => {
                assert_eq!(name, "bash");
                assert_eq!(input["command"], "ls");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
        assert_eq!(out.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(out.usage.output_tokens, 7);
    }

    #[test]
    fn test_gemini_response_to_openai() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "pondering", "thought": true},
                    {"text": "42"}
                ]},
                "finishReason": "MAX_TOKENS"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1, "thoughtsTokenCount": 4}
        }))
        .unwrap();

        let out = gemini_to_openai(&resp, &info("gemini-2.5-pro"));
        let choice = &out.choices[0];
        assert_eq!(choice.message.content.as_deref(), Some("42"));
        assert_eq!(choice.message.reasoning_content.as_deref(), Some("pondering"));
        assert_eq!(choice.finish_reason.as_deref(), Some("length"));
        let usage = out.usage.unwrap();
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 8);
        assert_eq!(out.model, "gemini-2.5-pro");
    }

    #[test]
    fn test_finish_mapping() {
        assert_eq!(map_finish_to_claude(Some("STOP")), "end_turn");
        assert_eq!(map_finish_to_claude(Some("MAX_TOKENS")), "max_tokens");
        assert_eq!(map_finish_to_claude(Some("SAFETY")), "stop_sequence");
        assert_eq!(map_finish_to_claude(Some("RECITATION")), "stop_sequence");
        assert_eq!(map_finish_to_claude(Some("OTHER")), "end_turn");
        assert_eq!(map_finish_to_openai(Some("STOP"), true).as_deref(), Some("tool_calls"));
        assert_eq!(map_finish_to_openai(Some("SAFETY"), false).as_deref(), Some("content_filter"));
        assert_eq!(map_finish_to_openai(None, false), None);
    }
}
