//! Request and response bodies of the Vertex endpoints that are not plain
//! Gemini: Claude `rawPredict`, Veo, Imagen, Lyria, text embeddings and
//! Cloud Text-to-Speech.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::anthropic_types::{Message, SystemContent, ToolChoice};
use super::tools::ToolSpec;

/// `anthropic_version` accepted by Claude on Vertex.
pub const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

// ---------------------------------------------------------------------------
// Claude on Vertex
// ---------------------------------------------------------------------------

/// Claude Messages body as `rawPredict` wants it: no `model` (it is in the
/// URL) and a mandatory `anthropic_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexClaudeRequest {
    pub anthropic_version: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemContent>,
    pub max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Value>,
}

// ---------------------------------------------------------------------------
// Veo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VeoRequest {
    pub contents: Vec<VeoContent>,
    pub generation_config: VeoGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VeoContent {
    pub parts: Vec<VeoPart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VeoPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<VeoInlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VeoInlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VeoGenerationConfig {
    pub temperature: f64,
    pub max_output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl Default for VeoGenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            max_output_tokens: 1024,
            top_p: None,
            top_k: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VeoResponse {
    #[serde(default)]
    pub candidates: Vec<VeoCandidate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VeoCandidate {
    #[serde(default)]
    pub content: VeoContentResponse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VeoContentResponse {
    #[serde(default)]
    pub parts: Vec<VeoPartResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VeoPartResponse {
    #[serde(default)]
    pub video_metadata: Option<VeoVideoMetadata>,
    #[serde(default)]
    pub inline_data: Option<VeoInlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VeoVideoMetadata {
    #[serde(default)]
    pub generated_video_uri: String,
    #[serde(default)]
    pub duration_ms: i64,
}

// ---------------------------------------------------------------------------
// Imagen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagenRequest {
    pub instances: Vec<ImagenInstance>,
    pub parameters: ImagenParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagenInstance {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagenParameters {
    pub sample_count: u32,
    pub aspect_ratio: String,
    pub safety_filter_level: String,
    pub person_generation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    pub guidance_scale: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagenResponse {
    #[serde(default)]
    pub predictions: Vec<ImagenPrediction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagenPrediction {
    #[serde(default)]
    pub bytes_base64_encoded: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub safety_attributes: Option<ImagenSafetyAttributes>,
}

impl ImagenPrediction {
    pub fn is_blocked(&self) -> bool {
        self.safety_attributes.as_ref().is_some_and(|s| s.blocked)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagenSafetyAttributes {
    #[serde(default)]
    pub blocked: bool,
}

// ---------------------------------------------------------------------------
// Lyria
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyriaRequest {
    pub instances: Vec<LyriaInstance>,
    pub parameters: LyriaParameters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyriaInstance {
    pub prompt: String,
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_clone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyriaParameters {
    pub temperature: f64,
    pub max_duration_sec: u32,
    pub audio_format: String,
    pub sample_rate: u32,
    pub return_audio_data: bool,
}

impl Default for LyriaParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_duration_sec: 60,
            audio_format: "mp3".to_string(),
            sample_rate: 44100,
            return_audio_data: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LyriaResponse {
    #[serde(default)]
    pub predictions: Vec<LyriaPrediction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyriaPrediction {
    #[serde(default)]
    pub audio_content: String,
    #[serde(default)]
    pub mime_type: String,
    /// Clip length in seconds.
    #[serde(default)]
    pub duration: u64,
}

// ---------------------------------------------------------------------------
// Text embeddings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexEmbeddingRequest {
    pub instances: Vec<EmbeddingInstance>,
    pub parameters: EmbeddingParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingInstance {
    pub content: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingParameters {
    pub auto_truncate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dimensionality: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VertexEmbeddingResponse {
    #[serde(default)]
    pub predictions: Vec<EmbeddingPrediction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingPrediction {
    #[serde(default)]
    pub embeddings: EmbeddingValues,
    #[serde(default)]
    pub truncated_text: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingValues {
    #[serde(default)]
    pub values: Vec<f64>,
    #[serde(default)]
    pub statistics: Option<EmbeddingStatistics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingStatistics {
    #[serde(default, alias = "token_count")]
    pub token_count: u64,
}

// ---------------------------------------------------------------------------
// Cloud Text-to-Speech
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsRequest {
    pub input: TtsInput,
    pub voice: TtsVoice,
    pub audio_config: TtsAudioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsInput {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsVoice {
    pub language_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub ssml_gender: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsAudioConfig {
    pub audio_encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate_hertz: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaking_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_gain_db: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects_profile_id: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsResponse {
    #[serde(default)]
    pub audio_content: String,
    #[serde(default)]
    pub audio_config: Option<TtsAudioConfig>,
}
