//! Tool declarations: a typed view over the tool JSON callers send, and the
//! normalizer that makes a tool list acceptable to each upstream schema.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::openai_types::ChatFunction;

// ---------------------------------------------------------------------------
// ToolSpec
// ---------------------------------------------------------------------------

/// One entry of a `tools` array.
///
/// Serializes back to exactly the JSON it was read from, so tools the gateway
/// does not touch pass through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ToolSpec {
    /// OpenAI shape: `{"type": "function", "function": {...}}`.
    Function(ChatFunction),
    /// Claude shape: `{"name", "description", "input_schema"}`.
    Custom(CustomTool),
    /// Vendor-typed tool such as `bash_20250124` or `text_editor_20250124`.
    Native(NativeTool),
    /// Managed web search or fetch (`web_search_*`, `web_fetch_*`).
    WebSearch(NativeTool),
    Unrecognized(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeTool {
    pub tool_type: String,
    pub name: Option<String>,
    pub extra: Map<String, Value>,
}

impl From<Value> for ToolSpec {
    fn from(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return ToolSpec::Unrecognized(value);
        };

        let tool_type = map.get("type").and_then(Value::as_str).map(str::to_string);
        match tool_type.as_deref() {
            Some("function") => {
                let parsed = map
                    .get("function")
                    .cloned()
                    .and_then(|f| serde_json::from_value::<ChatFunction>(f).ok());
                match parsed {
                    Some(function) => ToolSpec::Function(function),
                    None => ToolSpec::Unrecognized(Value::Object(map)),
                }
            }
            Some(t) if t.starts_with("web_search_") || t.starts_with("web_fetch_") => {
                map.remove("type");
                let name = take_string(&mut map, "name");
                ToolSpec::WebSearch(NativeTool {
                    tool_type: t.to_string(),
                    name,
                    extra: map,
                })
            }
            Some("custom") | None if map.contains_key("input_schema") => {
                match take_string(&mut map, "name") {
                    Some(name) => {
                        let description = take_string(&mut map, "description");
                        let input_schema = map.remove("input_schema").unwrap_or(Value::Null);
                        ToolSpec::Custom(CustomTool {
                            name,
                            description,
                            input_schema,
                            extra: map,
                        })
                    }
                    None => ToolSpec::Unrecognized(Value::Object(map)),
                }
            }
            Some(t) => {
                let tool_type = t.to_string();
                map.remove("type");
                let name = take_string(&mut map, "name");
                ToolSpec::Native(NativeTool {
                    tool_type,
                    name,
                    extra: map,
                })
            }
            None => ToolSpec::Unrecognized(Value::Object(map)),
        }
    }
}

impl From<ToolSpec> for Value {
    fn from(spec: ToolSpec) -> Self {
        match spec {
            ToolSpec::Function(function) => json!({
                "type": "function",
                "function": function,
            }),
            ToolSpec::Custom(tool) => {
                let mut map = tool.extra;
                map.insert("name".into(), Value::String(tool.name));
                if let Some(d) = tool.description {
                    map.insert("description".into(), Value::String(d));
                }
                map.insert("input_schema".into(), tool.input_schema);
                Value::Object(map)
            }
            ToolSpec::Native(tool) | ToolSpec::WebSearch(tool) => {
                let mut map = tool.extra;
                map.insert("type".into(), Value::String(tool.tool_type));
                if let Some(n) = tool.name {
                    map.insert("name".into(), Value::String(n));
                }
                Value::Object(map)
            }
            ToolSpec::Unrecognized(v) => v,
        }
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            map.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

impl ToolSpec {
    /// The name a model would call this tool by, when it has one.
    pub fn name(&self) -> Option<&str> {
        match self {
            ToolSpec::Function(f) => Some(&f.name),
            ToolSpec::Custom(c) => Some(&c.name),
            ToolSpec::Native(n) | ToolSpec::WebSearch(n) => n.name.as_deref(),
            ToolSpec::Unrecognized(v) => v.get("name").and_then(Value::as_str),
        }
    }

    fn label(&self) -> String {
        match self {
            ToolSpec::Native(n) | ToolSpec::WebSearch(n) => n.tool_type.clone(),
            other => other.name().unwrap_or("<unnamed>").to_string(),
        }
    }

    /// The tool in function form, for targets that only accept function
    /// declarations. Typed vendor tools have no schema of their own and
    /// return `None` here.
    pub fn as_function(&self) -> Option<ChatFunction> {
        match self {
            ToolSpec::Function(f) => Some(f.clone()),
            ToolSpec::Custom(c) => Some(ChatFunction {
                name: c.name.clone(),
                description: c.description.clone(),
                parameters: c.input_schema.clone(),
            }),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Agent tool table
// ---------------------------------------------------------------------------

/// A coding-agent tool with a fixed Gemini function equivalent.
#[derive(Debug, Clone, Copy)]
pub struct AgentTool {
    /// Native tool type or agent tool name.
    pub key: &'static str,
    /// Name the caller sees in tool-use blocks.
    pub caller_name: &'static str,
    pub function_name: &'static str,
    pub description: &'static str,
}

pub static AGENT_TOOLS: &[AgentTool] = &[
    AgentTool { key: "bash_20250124", caller_name: "bash", function_name: "bash_command", description: "Execute bash commands in the system shell" },
    AgentTool { key: "str_replace_based_edit_tool", caller_name: "str_replace_based_edit_tool", function_name: "file_editor", description: "Read and edit files with string replacement" },
    AgentTool { key: "web_search_20250305", caller_name: "web_search", function_name: "web_search", description: "Search the web for information using various search engines" },
    AgentTool { key: "Task", caller_name: "Task", function_name: "sub_agent_task", description: "Launch a specialized sub-agent for complex multi-step tasks" },
    AgentTool { key: "Grep", caller_name: "Grep", function_name: "text_search", description: "Search for patterns in files using ripgrep" },
    AgentTool { key: "Glob", caller_name: "Glob", function_name: "file_pattern_search", description: "Find files by name patterns using glob syntax" },
    AgentTool { key: "Read", caller_name: "Read", function_name: "file_reader", description: "Read file contents from the filesystem" },
    AgentTool { key: "Write", caller_name: "Write", function_name: "file_writer", description: "Write content to files on the filesystem" },
    AgentTool { key: "Edit", caller_name: "Edit", function_name: "file_editor_exact", description: "Perform exact string replacements in files" },
    AgentTool { key: "MultiEdit", caller_name: "MultiEdit", function_name: "multi_file_editor", description: "Perform multiple edits to a single file in one operation" },
    AgentTool { key: "LS", caller_name: "LS", function_name: "directory_lister", description: "List files and directories in a given path" },
    AgentTool { key: "WebFetch", caller_name: "WebFetch", function_name: "web_fetcher", description: "Fetch and analyze content from web URLs" },
    AgentTool { key: "TodoWrite", caller_name: "TodoWrite", function_name: "task_manager", description: "Create and manage structured task lists" },
    AgentTool { key: "NotebookRead", caller_name: "NotebookRead", function_name: "jupyter_notebook_reader", description: "Read Jupyter notebook (.ipynb file) and return all cells with their outputs" },
    AgentTool { key: "NotebookEdit", caller_name: "NotebookEdit", function_name: "jupyter_notebook_editor", description: "Completely replace the contents of a specific cell in a Jupyter notebook" },
];

/// Look up an agent tool by native type first, then by name.
pub fn agent_tool(tool_type: Option<&str>, name: Option<&str>) -> Option<&'static AgentTool> {
    tool_type
        .and_then(|t| AGENT_TOOLS.iter().find(|a| a.key == t))
        .or_else(|| name.and_then(|n| AGENT_TOOLS.iter().find(|a| a.key == n)))
}

fn prop(kind: &str, description: &str) -> Value {
    json!({"type": kind, "description": description})
}

impl AgentTool {
    pub fn parameters(&self) -> Value {
        let (properties, required): (Value, &[&str]) = match self.function_name {
            "bash_command" => (
                json!({
                    "command": prop("string", "The bash command to execute"),
                    "timeout": prop("number", "Optional timeout in milliseconds (max 600000)"),
                    "description": prop("string", "Clear description of what this command does in 5-10 words"),
                }),
                &["command"],
            ),
            "file_editor" => (
                json!({
                    "command": prop("string", "The operation: 'view', 'str_replace', 'create'"),
                    "path": prop("string", "Absolute path to the file"),
                    "old_str": prop("string", "String to replace (for str_replace command)"),
                    "new_str": prop("string", "Replacement string (for str_replace command)"),
                    "file_text": prop("string", "File content (for create command)"),
                }),
                &["command", "path"],
            ),
            "web_search" => (
                json!({
                    "query": prop("string", "The search query"),
                    "max_results": prop("number", "Maximum number of results to return (default: 5)"),
                }),
                &["query"],
            ),
            "sub_agent_task" => (
                json!({
                    "description": prop("string", "Short description of the task (3-5 words)"),
                    "prompt": prop("string", "Detailed task description for the agent"),
                    "subagent_type": prop("string", "Type of specialized agent to use"),
                }),
                &["description", "prompt", "subagent_type"],
            ),
            "text_search" => (
                json!({
                    "pattern": prop("string", "Regular expression pattern to search for"),
                    "path": prop("string", "File or directory to search in"),
                    "glob": prop("string", "Glob pattern to filter files"),
                    "output_mode": prop("string", "Output mode: content, files_with_matches, count"),
                }),
                &["pattern"],
            ),
            "file_pattern_search" => (
                json!({
                    "pattern": prop("string", "Glob pattern to match files against"),
                    "path": prop("string", "Directory to search in (optional)"),
                }),
                &["pattern"],
            ),
            "file_reader" => (
                json!({
                    "file_path": prop("string", "Absolute path to the file to read"),
                    "limit": prop("number", "Number of lines to read (optional)"),
                    "offset": prop("number", "Line number to start reading from (optional)"),
                }),
                &["file_path"],
            ),
            "file_writer" => (
                json!({
                    "file_path": prop("string", "Absolute path to the file to write"),
                    "content": prop("string", "Content to write to the file"),
                }),
                &["file_path", "content"],
            ),
            "file_editor_exact" => (
                json!({
                    "file_path": prop("string", "Absolute path to the file to modify"),
                    "old_string": prop("string", "Text to replace"),
                    "new_string": prop("string", "Replacement text"),
                    "replace_all": prop("boolean", "Replace all occurrences (default: false)"),
                }),
                &["file_path", "old_string", "new_string"],
            ),
            "multi_file_editor" => (
                json!({
                    "file_path": prop("string", "Absolute path to the file to modify"),
                    "edits": {
                        "type": "array",
                        "description": "Array of edit operations",
                        "items": {
                            "type": "object",
                            "properties": {
                                "old_string": prop("string", "Text to replace"),
                                "new_string": prop("string", "Replacement text"),
                                "replace_all": prop("boolean", "Replace all occurrences (default: false)"),
                            },
                            "required": ["old_string", "new_string"],
                        },
                    },
                }),
                &["file_path", "edits"],
            ),
            "directory_lister" => (
                json!({
                    "path": prop("string", "Absolute path to the directory to list"),
                    "ignore": {
                        "type": "array",
                        "description": "List of glob patterns to ignore",
                        "items": {"type": "string"},
                    },
                }),
                &["path"],
            ),
            "web_fetcher" => (
                json!({
                    "url": prop("string", "URL to fetch content from"),
                    "prompt": prop("string", "Prompt to analyze the fetched content"),
                }),
                &["url", "prompt"],
            ),
            "task_manager" => (
                json!({
                    "todos": {
                        "type": "array",
                        "description": "Array of todo items",
                        "items": {
                            "type": "object",
                            "properties": {
                                "content": prop("string", "Task content description"),
                                "status": prop("string", "Task status: pending, in_progress, completed"),
                                "priority": prop("string", "Task priority: high, medium, low"),
                                "id": prop("string", "Unique task identifier"),
                            },
                            "required": ["content", "status", "priority", "id"],
                        },
                    },
                }),
                &["todos"],
            ),
            "jupyter_notebook_reader" => (
                json!({
                    "notebook_path": prop("string", "Absolute path to the Jupyter notebook file to read"),
                    "cell_id": prop("string", "ID of a specific cell to read (optional)"),
                }),
                &["notebook_path"],
            ),
            "jupyter_notebook_editor" => (
                json!({
                    "notebook_path": prop("string", "Absolute path to the Jupyter notebook file to edit"),
                    "new_source": prop("string", "The new source for the cell"),
                    "cell_id": prop("string", "ID of the cell to edit (optional)"),
                    "cell_type": {
                        "type": "string",
                        "description": "Type of the cell: code or markdown (optional)",
                        "enum": ["code", "markdown"],
                    },
                    "edit_mode": {
                        "type": "string",
                        "description": "Type of edit: replace, insert, delete (default: replace)",
                        "enum": ["replace", "insert", "delete"],
                    },
                }),
                &["notebook_path", "new_source"],
            ),
            _ => (json!({}), &[]),
        };
        json!({"type": "object", "properties": properties, "required": required})
    }

    pub fn function(&self) -> ChatFunction {
        ChatFunction {
            name: self.function_name.to_string(),
            description: Some(self.description.to_string()),
            parameters: self.parameters(),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTarget {
    ClaudeMessages,
    GeminiDeclarations,
    OpenAiCompatible,
}

/// Managed tool types a target is known to accept. Anything not listed is
/// treated as unsupported and replaced by the shell fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPolicy {
    pub claude_messages: Vec<String>,
    pub gemini_declarations: Vec<String>,
    pub openai_compatible: Vec<String>,
}

impl ToolPolicy {
    pub fn supports(&self, target: ToolTarget, tool_type: &str) -> bool {
        let list = match target {
            ToolTarget::ClaudeMessages => &self.claude_messages,
            ToolTarget::GeminiDeclarations => &self.gemini_declarations,
            ToolTarget::OpenAiCompatible => &self.openai_compatible,
        };
        list.iter().any(|t| t == tool_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolActionKind {
    Kept,
    Dropped,
    Translated,
    PassedThrough,
    Synthesized,
}

/// One normalization decision, kept for the relay log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolAction {
    pub tool: String,
    pub action: ToolActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub into: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedTools {
    pub tools: Vec<ToolSpec>,
    pub has_web_intent: bool,
    pub has_native_shell: bool,
    pub actions: Vec<ToolAction>,
}

impl NormalizedTools {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().filter_map(ToolSpec::name)
    }

    /// Names of tools the caller listed that did not survive normalization.
    pub fn removed(&self) -> HashSet<&str> {
        self.actions
            .iter()
            .filter(|a| a.action == ToolActionKind::Dropped)
            .map(|a| a.tool.as_str())
            .collect()
    }

    /// Names a response may call back by unchanged: the caller's own tool
    /// names plus surviving tools outside the agent table. Table function
    /// names are left out so they map back to the caller's vocabulary.
    pub fn declared_names(&self, caller_tools: &[ToolSpec]) -> HashSet<String> {
        let outside_table = self
            .names()
            .filter(|n| !AGENT_TOOLS.iter().any(|a| a.function_name == *n));
        caller_tools
            .iter()
            .filter_map(ToolSpec::name)
            .chain(outside_table)
            .map(str::to_string)
            .collect()
    }

    fn record(&mut self, tool: String, action: ToolActionKind, into: Option<String>) {
        tracing::debug!(tool = %tool, action = ?action, into = ?into, "tool normalization");
        self.actions.push(ToolAction { tool, action, into });
    }
}

const WEB_AGENT_TOOLS: &[&str] = &["WebSearch", "WebFetch", "web_search", "web_fetch"];

/// Function names that already give the model a shell.
const SHELL_FUNCTIONS: &[&str] = &["bash", "bash_command"];

/// Rewrite a caller's tool list so `target` accepts it.
///
/// Each tool is judged once, first matching rule wins: native shell, managed
/// web search, function tools, agent-tool table, pass-through. If web
/// intent was seen and no shell tool survived, one synthetic shell tool is
/// appended.
pub fn normalize_tools(tools: &[ToolSpec], target: ToolTarget, policy: &ToolPolicy) -> NormalizedTools {
    let mut out = NormalizedTools::default();

    for tool in tools {
        let label = tool.label();
        match tool {
            ToolSpec::Native(native) if native.tool_type.starts_with("bash_") => {
                out.has_native_shell = true;
                if target == ToolTarget::ClaudeMessages {
                    out.tools.push(tool.clone());
                    out.record(label, ToolActionKind::Kept, None);
                } else {
                    let entry = agent_tool(Some(&native.tool_type), native.name.as_deref())
                        .or_else(|| agent_tool(Some("bash_20250124"), None));
                    if let Some(entry) = entry {
                        out.tools.push(ToolSpec::Function(entry.function()));
                        out.record(label, ToolActionKind::Translated, Some(entry.function_name.to_string()));
                    }
                }
            }
            ToolSpec::WebSearch(native) => {
                if policy.supports(target, &native.tool_type) {
                    out.tools.push(tool.clone());
                    out.record(label, ToolActionKind::Kept, None);
                } else {
                    out.has_web_intent = true;
                    out.record(label, ToolActionKind::Dropped, None);
                }
            }
            ToolSpec::Custom(custom) if WEB_AGENT_TOOLS.contains(&custom.name.as_str()) => {
                if policy.supports(target, &custom.name) {
                    out.tools.push(tool.clone());
                    out.record(label, ToolActionKind::Kept, None);
                } else {
                    out.has_web_intent = true;
                    out.record(label, ToolActionKind::Dropped, None);
                }
            }
            ToolSpec::Function(function) => {
                if function.name == "web_search" || function.name == "web_fetch" {
                    out.has_web_intent = true;
                }
                out.tools.push(tool.clone());
                out.record(label, ToolActionKind::Kept, None);
            }
            ToolSpec::Custom(custom) => match agent_tool(None, Some(&custom.name)) {
                Some(entry) if target == ToolTarget::GeminiDeclarations => {
                    out.tools.push(ToolSpec::Function(entry.function()));
                    out.record(label, ToolActionKind::Translated, Some(entry.function_name.to_string()));
                }
                _ => {
                    out.tools.push(tool.clone());
                    out.record(label, ToolActionKind::PassedThrough, None);
                }
            },
            ToolSpec::Native(native) => {
                let entry = agent_tool(Some(&native.tool_type), native.name.as_deref());
                match entry {
                    Some(entry) if target != ToolTarget::ClaudeMessages => {
                        out.tools.push(ToolSpec::Function(entry.function()));
                        out.record(label, ToolActionKind::Translated, Some(entry.function_name.to_string()));
                    }
                    _ => {
                        out.tools.push(tool.clone());
                        out.record(label, ToolActionKind::PassedThrough, None);
                    }
                }
            }
            ToolSpec::Unrecognized(_) => {
                out.tools.push(tool.clone());
                out.record(label, ToolActionKind::PassedThrough, None);
            }
        }
    }

    if out.tools.iter().filter_map(ToolSpec::name).any(|n| SHELL_FUNCTIONS.contains(&n)) {
        out.has_native_shell = true;
    }

    if out.has_web_intent && !out.has_native_shell {
        for synthetic in synthetic_shell_tools(target) {
            let taken = synthetic
                .name()
                .is_some_and(|name| out.tools.iter().any(|t| t.name() == Some(name)));
            if taken {
                continue;
            }
            let label = synthetic.label();
            out.tools.push(synthetic);
            out.record(label, ToolActionKind::Synthesized, None);
        }
    }

    out
}

fn synthetic_shell_tools(target: ToolTarget) -> Vec<ToolSpec> {
    match target {
        ToolTarget::ClaudeMessages => vec![ToolSpec::Native(NativeTool {
            tool_type: "bash_20250124".to_string(),
            name: Some("bash".to_string()),
            extra: Map::new(),
        })],
        ToolTarget::GeminiDeclarations => agent_tool(Some("bash_20250124"), None)
            .map(|entry| vec![ToolSpec::Function(entry.function())])
            .unwrap_or_default(),
        ToolTarget::OpenAiCompatible => vec![
            ToolSpec::Function(ChatFunction {
                name: "bash".to_string(),
                description: Some("Execute bash commands in the system shell".to_string()),
                parameters: json!({
                    "type": "object",
                    "properties": {"command": prop("string", "The bash command to execute")},
                    "required": ["command"],
                }),
            }),
            ToolSpec::Function(ChatFunction {
                name: "web_search".to_string(),
                description: Some(
                    "Search the web. Use the bash tool with curl to fetch search results or pages."
                        .to_string(),
                ),
                parameters: json!({
                    "type": "object",
                    "properties": {"query": prop("string", "The search query")},
                    "required": ["query"],
                }),
            }),
        ],
    }
}

// ---------------------------------------------------------------------------
// Reverse mapping
// ---------------------------------------------------------------------------

/// A function call mapped back to the caller's tool vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseEvent {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Map a function name emitted upstream back to the tool the caller knows.
///
/// `declared` holds every name the caller (or the normalizer) put in the
/// request. Returns `None` when the name is neither in the agent table nor
/// declared.
pub fn denormalize_function_call(name: &str, args: Value, declared: &HashSet<String>) -> Option<ToolUseEvent> {
    let caller_name = if declared.contains(name) {
        name.to_string()
    } else {
        AGENT_TOOLS
            .iter()
            .find(|a| a.function_name == name)
            .map(|a| a.caller_name.to_string())?
    };
    let input = match args {
        Value::Null => json!({}),
        other => other,
    };
    Some(ToolUseEvent {
        id: format!("toolu_{}", uuid::Uuid::new_v4().simple()),
        name: caller_name,
        input,
    })
}

// ---------------------------------------------------------------------------
// Schema cleanup
// ---------------------------------------------------------------------------

const GEMINI_UNSUPPORTED_KEYWORDS: &[&str] = &[
    "$schema",
    "$defs",
    "definitions",
    "$ref",
    "$id",
    "const",
    "additionalProperties",
    "propertyNames",
    "patternProperties",
    "strict",
    "examples",
];

/// Remove JSON-schema keywords Gemini function declarations reject.
/// Property names that happen to match a keyword are left alone.
pub fn clean_schema_for_gemini(schema: &Value) -> Value {
    let mut out = schema.clone();
    remove_unsupported_keywords(&mut out, false);
    out
}

fn remove_unsupported_keywords(value: &mut Value, in_properties_map: bool) {
    match value {
        Value::Object(map) => {
            if !in_properties_map {
                map.retain(|k, _| !GEMINI_UNSUPPORTED_KEYWORDS.contains(&k.as_str()) && !k.starts_with("x-"));
            }
            for (key, child) in map.iter_mut() {
                remove_unsupported_keywords(child, !in_properties_map && key == "properties");
            }
        }
        Value::Array(items) => {
            for item in items {
                remove_unsupported_keywords(item, false);
            }
        }
        _ => {}
    }
}
