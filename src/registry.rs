//! Model registry: mode classification, per-mode model tables and region resolution.
//!
//! Every lookup is table driven. Names missing from a table pass through
//! unchanged so that new vendor models work without a release.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upstream endpoint family a request is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Claude,
    Gemini,
    Llama,
    VideoGen,
    ImageGen,
    ReasoningChat,
    AudioGen,
    Embedding,
    TextToSpeech,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Claude => "claude",
            Mode::Gemini => "gemini",
            Mode::Llama => "llama",
            Mode::VideoGen => "video_gen",
            Mode::ImageGen => "image_gen",
            Mode::ReasoningChat => "reasoning_chat",
            Mode::AudioGen => "audio_gen",
            Mode::Embedding => "embedding",
            Mode::TextToSpeech => "text_to_speech",
        }
    }

    /// Whether the upstream offers a streaming endpoint for this mode.
    pub fn supports_streaming(self) -> bool {
        matches!(
            self,
            Mode::Claude | Mode::Gemini | Mode::Llama | Mode::ReasoningChat
        )
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Matcher {
    Prefix(&'static [&'static str]),
    Contains(&'static str),
}

struct ClassifyRule {
    matcher: Matcher,
    mode: Mode,
}

// Order matters: first match wins.
const CLASSIFY_RULES: &[ClassifyRule] = &[
    ClassifyRule {
        matcher: Matcher::Prefix(&["claude"]),
        mode: Mode::Claude,
    },
    ClassifyRule {
        matcher: Matcher::Prefix(&["gemini"]),
        mode: Mode::Gemini,
    },
    ClassifyRule {
        matcher: Matcher::Prefix(&["veo"]),
        mode: Mode::VideoGen,
    },
    ClassifyRule {
        matcher: Matcher::Prefix(&["imagen"]),
        mode: Mode::ImageGen,
    },
    ClassifyRule {
        matcher: Matcher::Prefix(&["deepseek-ai/"]),
        mode: Mode::ReasoningChat,
    },
    ClassifyRule {
        matcher: Matcher::Prefix(&["lyria"]),
        mode: Mode::AudioGen,
    },
    ClassifyRule {
        matcher: Matcher::Prefix(&["text-embedding", "textembedding"]),
        mode: Mode::Embedding,
    },
    ClassifyRule {
        matcher: Matcher::Prefix(&["text-to-speech", "tts-"]),
        mode: Mode::TextToSpeech,
    },
    ClassifyRule {
        matcher: Matcher::Contains("llama"),
        mode: Mode::Llama,
    },
];

/// Classify an upstream model name, falling back to Gemini.
#[must_use]
pub fn classify(model: &str) -> Mode {
    classify_or(model, Mode::Gemini)
}

/// Classify an upstream model name with an explicit fallback mode.
#[must_use]
pub fn classify_or(model: &str, fallback: Mode) -> Mode {
    CLASSIFY_RULES
        .iter()
        .find(|rule| match rule.matcher {
            Matcher::Prefix(prefixes) => prefixes.iter().any(|p| model.starts_with(p)),
            Matcher::Contains(needle) => model.contains(needle),
        })
        .map_or(fallback, |rule| rule.mode)
}

const CLAUDE_MODELS: &[(&str, &str)] = &[
    ("claude-3-sonnet-20240229", "claude-3-sonnet@20240229"),
    ("claude-3-opus-20240229", "claude-3-opus@20240229"),
    ("claude-3-haiku-20240307", "claude-3-haiku@20240307"),
    ("claude-3-5-sonnet-20240620", "claude-3-5-sonnet@20240620"),
    ("claude-3-5-sonnet-20241022", "claude-3-5-sonnet-v2@20241022"),
    ("claude-3-5-haiku-20241022", "claude-3-5-haiku@20241022"),
    ("claude-3-7-sonnet-20250219", "claude-3-7-sonnet@20250219"),
    ("claude-sonnet-4-20250514", "claude-sonnet-4@20250514"),
    ("claude-opus-4-20250514", "claude-opus-4@20250514"),
    // short names produced by the session router
    ("claude-3-7-sonnet", "claude-3-7-sonnet@20250219"),
    ("claude-sonnet-4", "claude-sonnet-4@20250514"),
    ("claude-opus-4", "claude-opus-4@20250514"),
];

const VEO_MODELS: &[(&str, &str)] = &[
    ("veo-2-generate-001", "veo-2-generate-001"),
    ("veo-3-generate-001", "veo-3-generate-001"),
    ("veo-3-fast-generate-001", "veo-3-fast-generate-001"),
];

const IMAGEN_MODELS: &[(&str, &str)] = &[
    (
        "imagen-4.0-generate-preview-06-06",
        "imagen-4.0-generate-preview-06-06",
    ),
    (
        "imagen-4.0-fast-generate-preview-06-06",
        "imagen-4.0-fast-generate-preview-06-06",
    ),
    (
        "imagen-4.0-ultra-generate-preview-06-06",
        "imagen-4.0-ultra-generate-preview-06-06",
    ),
    ("imagen-3.0-generate-002", "imagen-3.0-generate-002"),
    ("imagen-3.0-generate-001", "imagen-3.0-generate-001"),
    ("imagen-3.0-fast-generate-001", "imagen-3.0-fast-generate-001"),
    ("imagen-3.0-capability-001", "imagen-3.0-capability-001"),
];

const DEEPSEEK_MODELS: &[(&str, &str)] = &[(
    "deepseek-ai/deepseek-r1-0528-maas",
    "deepseek-ai/deepseek-r1-0528-maas",
)];

const LYRIA_MODELS: &[(&str, &str)] = &[
    ("lyria-music-generate-001", "lyria-music-generate-001"),
    ("lyria-audio-generate-001", "lyria-audio-generate-001"),
    ("lyria-voice-clone-001", "lyria-voice-clone-001"),
    ("lyria-sound-effects-001", "lyria-sound-effects-001"),
];

const EMBEDDING_MODELS: &[(&str, &str)] = &[
    ("text-embedding-004", "text-embedding-004"),
    (
        "text-multilingual-embedding-002",
        "text-multilingual-embedding-002",
    ),
    ("textembedding-gecko", "textembedding-gecko@001"),
    (
        "textembedding-gecko-multilingual",
        "textembedding-gecko-multilingual@001",
    ),
    ("text-embedding-preview-0815", "text-embedding-preview-0815"),
];

const TTS_MODELS: &[(&str, &str)] = &[
    ("text-to-speech-001", "text-to-speech-001"),
    ("text-to-speech-multilingual", "text-to-speech-multilingual"),
    ("text-to-speech-neural", "text-to-speech-neural"),
    ("text-to-speech-standard", "text-to-speech-standard"),
];

const LLAMA_MODELS: &[&str] = &["meta/llama3-405b-instruct-maas"];

const EMBEDDING_TASKS: &[(&str, &str)] = &[
    ("text-embedding-004", "RETRIEVAL_DOCUMENT"),
    ("textembedding-gecko", "RETRIEVAL_DOCUMENT"),
    ("text-multilingual-embedding-002", "SEMANTIC_SIMILARITY"),
    ("textembedding-gecko-multilingual", "SEMANTIC_SIMILARITY"),
];

const DEFAULT_EMBEDDING_TASK: &str = "RETRIEVAL_DOCUMENT";

fn table_for(mode: Mode) -> &'static [(&'static str, &'static str)] {
    match mode {
        Mode::Claude => CLAUDE_MODELS,
        Mode::VideoGen => VEO_MODELS,
        Mode::ImageGen => IMAGEN_MODELS,
        Mode::ReasoningChat => DEEPSEEK_MODELS,
        Mode::AudioGen => LYRIA_MODELS,
        Mode::Embedding => EMBEDDING_MODELS,
        Mode::TextToSpeech => TTS_MODELS,
        Mode::Gemini | Mode::Llama => &[],
    }
}

/// Map a public model name to the vendor wire name for `mode`.
/// Unknown names come back unchanged.
#[must_use]
pub fn translate_model_name(mode: Mode, name: &str) -> &str {
    table_for(mode)
        .iter()
        .find(|(public, _)| *public == name)
        .map_or(name, |(_, vendor)| *vendor)
}

/// Vertex embedding task type for a model.
#[must_use]
pub fn embedding_task(model: &str) -> &'static str {
    EMBEDDING_TASKS
        .iter()
        .find(|(name, _)| *name == model)
        .map_or(DEFAULT_EMBEDDING_TASK, |(_, task)| *task)
}

/// Public model ids served by this gateway, for `GET /v1/models`.
#[must_use]
pub fn model_list() -> Vec<&'static str> {
    let mut models: Vec<&'static str> = CLAUDE_MODELS
        .iter()
        .chain(VEO_MODELS)
        .chain(IMAGEN_MODELS)
        .chain(DEEPSEEK_MODELS)
        .chain(LYRIA_MODELS)
        .chain(EMBEDDING_MODELS)
        .chain(TTS_MODELS)
        .map(|(public, _)| *public)
        .collect();
    models.extend_from_slice(LLAMA_MODELS);
    models
}

/// Reasoning-budget directive carried as a model-name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingDirective {
    /// `-thinking-<N>`: think with a budget of N tokens.
    Budget(u32),
    /// `-thinking`: think with the vendor default budget.
    Enabled,
    /// `-nothinking`: budget zero.
    Disabled,
}

/// Split a reasoning suffix off a model name.
///
/// `-thinking-<N>` with a non-numeric N still strips the suffix and is
/// treated as [`ThinkingDirective::Enabled`].
#[must_use]
pub fn parse_thinking_suffix(name: &str) -> (&str, Option<ThinkingDirective>) {
    if let Some(idx) = name.find("-thinking-") {
        let budget = &name[idx + "-thinking-".len()..];
        let directive = budget
            .parse::<u32>()
            .map_or(ThinkingDirective::Enabled, ThinkingDirective::Budget);
        return (&name[..idx], Some(directive));
    }
    if let Some(base) = name.strip_suffix("-nothinking") {
        return (base, Some(ThinkingDirective::Disabled));
    }
    if let Some(base) = name.strip_suffix("-thinking") {
        return (base, Some(ThinkingDirective::Enabled));
    }
    (name, None)
}

pub const GLOBAL_REGION: &str = "global";

/// Resolve the Vertex region for a request.
///
/// `api_version` is the channel's region setting: empty or `global` means the
/// global endpoint, a JSON object maps origin model names (with a `default`
/// key) to regions, anything else is taken as the region itself.
#[must_use]
pub fn resolve_region(api_version: &str, origin_model: &str) -> String {
    let setting = api_version.trim();
    if setting.is_empty() || setting.eq_ignore_ascii_case(GLOBAL_REGION) {
        return GLOBAL_REGION.to_string();
    }

    if setting.starts_with('{') {
        let Ok(map) = serde_json::from_str::<HashMap<String, String>>(setting) else {
            tracing::warn!(setting, "Region setting is not a valid JSON map, using global");
            return GLOBAL_REGION.to_string();
        };
        return map
            .get(origin_model)
            .or_else(|| map.get("default"))
            .filter(|r| !r.trim().is_empty())
            .map_or_else(|| GLOBAL_REGION.to_string(), |r| r.trim().to_string());
    }

    setting.to_string()
}
