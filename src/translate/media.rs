//! Fixed-shape media endpoints: Veo video, Imagen images, Lyria audio,
//! Cloud Text-to-Speech and text embeddings.
//!
//! None of these stream, and each bills in its own unit (see [`UsageUnit`]).

use super::openai_types::{
    AudioData, AudioEnvelope, ChatCompletionRequest, ChatCompletionResponse, ChatContent,
    Choice, ChoiceMessage, ContentPart, EmbeddingData, EmbeddingRequest, EmbeddingResponse,
    EmbeddingUsage, ImageData, ImageGenerationRequest, ImageResponse, SpeechRequest,
};
use super::usage::{UsageRecord, UsageUnit};
use super::vertex_types::{
    EmbeddingInstance, EmbeddingParameters, ImagenInstance, ImagenParameters, ImagenRequest,
    ImagenResponse, LyriaInstance, LyriaParameters, LyriaRequest, LyriaResponse, TtsAudioConfig,
    TtsInput, TtsRequest, TtsResponse, TtsVoice, VeoContent, VeoGenerationConfig, VeoInlineData,
    VeoPart, VeoRequest, VeoResponse, VertexEmbeddingRequest, VertexEmbeddingResponse,
};
use super::RelayInfo;
use crate::registry;

const DEFAULT_LYRIA_SECONDS: u64 = 30;
const DEFAULT_TTS_CHARS: u64 = 100;
const DEFAULT_TTS_SAMPLE_RATE: u32 = 24_000;

// ---------------------------------------------------------------------------
// Veo
// ---------------------------------------------------------------------------

/// Only the last message is used: its text is the prompt and a `data:` image,
/// if present, seeds image-to-video.
pub fn veo_request(req: &ChatCompletionRequest) -> VeoRequest {
    let mut contents = Vec::new();

    if let Some(last) = req.messages.last() {
        let mut parts = Vec::new();
        let text = last.content.as_ref().map(ChatContent::joined_text).unwrap_or_default();
        if !text.is_empty() {
            parts.push(VeoPart {
                text: Some(text),
                ..Default::default()
            });
        }
        if let Some(ChatContent::Parts(content_parts)) = &last.content {
            let image = content_parts.iter().find_map(|p| match p {
                ContentPart::ImageUrl { image_url } => image_url.as_inline_data(),
                _ => None,
            });
            if let Some((mime, data)) = image {
                parts.push(VeoPart {
                    text: None,
                    inline_data: Some(VeoInlineData {
                        mime_type: mime.to_string(),
                        data: data.to_string(),
                    }),
                });
            }
        }
        contents.push(VeoContent { parts });
    }

    VeoRequest {
        contents,
        generation_config: VeoGenerationConfig::default(),
    }
}

pub fn veo_response(resp: &VeoResponse, info: &RelayInfo) -> (ChatCompletionResponse, UsageRecord) {
    let uris: Vec<&str> = resp
        .candidates
        .iter()
        .flat_map(|c| c.content.parts.iter())
        .filter_map(|p| p.video_metadata.as_ref())
        .map(|m| m.generated_video_uri.as_str())
        .filter(|u| !u.is_empty())
        .collect();

    let mut text = "Video generation completed".to_string();
    for uri in &uris {
        text.push('\n');
        text.push_str(uri);
    }

    let body = ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: info.origin_model.clone(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some(text),
                reasoning_content: None,
                tool_calls: None,
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: None,
    };

    let videos = resp.candidates.len().max(1) as u64;
    (body, UsageRecord::new(UsageUnit::Videos, videos, 0))
}

// ---------------------------------------------------------------------------
// Imagen
// ---------------------------------------------------------------------------

const SIZE_ASPECT_RATIOS: &[(&str, &str)] = &[
    ("256x256", "1:1"),
    ("512x512", "1:1"),
    ("1024x1024", "1:1"),
    ("1024x768", "4:3"),
    ("768x1024", "3:4"),
    ("1536x1024", "3:2"),
    ("1024x1536", "2:3"),
    ("1792x1024", "16:9"),
    ("1024x1792", "9:16"),
];

/// OpenAI `size` to Imagen `aspectRatio`; unknown sizes are square.
pub fn aspect_ratio_for_size(size: &str) -> &'static str {
    SIZE_ASPECT_RATIOS
        .iter()
        .find(|(s, _)| *s == size)
        .map_or("1:1", |(_, ratio)| *ratio)
}

pub fn imagen_request(req: &ImageGenerationRequest) -> ImagenRequest {
    ImagenRequest {
        instances: vec![ImagenInstance {
            prompt: req.prompt.clone(),
        }],
        parameters: ImagenParameters {
            sample_count: req.n.filter(|n| *n > 0).unwrap_or(1),
            aspect_ratio: req.size.as_deref().map_or("1:1", aspect_ratio_for_size).to_string(),
            safety_filter_level: "block_some".to_string(),
            person_generation: "allow_adult".to_string(),
            negative_prompt: req.negative_prompt.clone().filter(|p| !p.is_empty()),
            seed: req.seed,
            guidance_scale: 7.5,
        },
    }
}

/// Blocked predictions are dropped and not billed.
pub fn imagen_response(resp: &ImagenResponse) -> (ImageResponse, UsageRecord) {
    let data: Vec<ImageData> = resp
        .predictions
        .iter()
        .filter(|p| !p.is_blocked())
        .map(|p| ImageData {
            b64_json: Some(p.bytes_base64_encoded.clone()),
            url: None,
            revised_prompt: None,
        })
        .collect();

    let usage = UsageRecord::new(UsageUnit::Images, data.len() as u64, 0);
    let body = ImageResponse {
        created: chrono::Utc::now().timestamp(),
        data,
    };
    (body, usage)
}

// ---------------------------------------------------------------------------
// Lyria
// ---------------------------------------------------------------------------

pub fn lyria_request(req: &SpeechRequest, upstream_model: &str) -> LyriaRequest {
    let mut instance = LyriaInstance {
        prompt: req.input.clone(),
        duration: DEFAULT_LYRIA_SECONDS as u32,
        ..Default::default()
    };

    if upstream_model.contains("music") {
        instance.style = Some("pop".to_string());
        instance.tempo = Some("medium".to_string());
    } else if upstream_model.contains("voice") {
        instance.voice_clone = Some(req.voice.clone()).filter(|v| !v.is_empty());
    } else if upstream_model.contains("sound") {
        instance.duration = 10;
    }

    LyriaRequest {
        instances: vec![instance],
        parameters: LyriaParameters::default(),
    }
}

pub fn lyria_response(resp: &LyriaResponse) -> (AudioEnvelope, UsageRecord) {
    let data: Vec<AudioData> = resp
        .predictions
        .iter()
        .map(|p| AudioData {
            audio_base64: p.audio_content.clone(),
            format: p.mime_type.clone(),
            duration: Some(p.duration as f64),
            sample_rate: None,
        })
        .collect();

    let seconds = match resp.predictions.iter().map(|p| p.duration).sum::<u64>() {
        0 => DEFAULT_LYRIA_SECONDS,
        n => n,
    };
    let body = AudioEnvelope {
        created: chrono::Utc::now().timestamp(),
        data,
    };
    (body, UsageRecord::new(UsageUnit::AudioSeconds, seconds, 0))
}

// ---------------------------------------------------------------------------
// Text-to-Speech
// ---------------------------------------------------------------------------

const OPENAI_VOICES: &[(&str, &str)] = &[
    ("alloy", "en-US-Neural2-A"),
    ("echo", "en-US-Neural2-B"),
    ("fable", "en-US-Neural2-C"),
    ("onyx", "en-US-Neural2-D"),
    ("nova", "en-US-Neural2-E"),
    ("shimmer", "en-US-Neural2-F"),
];

/// OpenAI voice names map to Neural2 voices; anything else is taken as a
/// Cloud TTS voice name already.
pub fn map_voice(voice: &str) -> &str {
    OPENAI_VOICES
        .iter()
        .find(|(openai, _)| *openai == voice)
        .map_or(voice, |(_, vertex)| *vertex)
}

/// `en-GB-Wavenet-A` gives `en-GB`. OpenAI voices and unparseable names give `en-US`.
pub fn infer_language(voice: &str) -> &str {
    if OPENAI_VOICES.iter().any(|(openai, _)| *openai == voice) {
        return "en-US";
    }
    match voice.get(..5) {
        Some(prefix) if prefix.as_bytes()[2] == b'-' => prefix,
        _ => "en-US",
    }
}

pub fn tts_request(req: &SpeechRequest) -> TtsRequest {
    let (name, language_code) = if req.voice.is_empty() {
        (None, "en-US".to_string())
    } else {
        (
            Some(map_voice(&req.voice).to_string()),
            infer_language(&req.voice).to_string(),
        )
    };

    let audio_encoding = req
        .response_format
        .as_deref()
        .filter(|f| !f.is_empty())
        .map_or_else(|| "MP3".to_string(), str::to_uppercase);

    TtsRequest {
        input: TtsInput {
            text: req.input.clone(),
        },
        voice: TtsVoice {
            language_code,
            name,
            ssml_gender: "NEUTRAL".to_string(),
        },
        audio_config: TtsAudioConfig {
            audio_encoding,
            sample_rate_hertz: Some(DEFAULT_TTS_SAMPLE_RATE),
            speaking_rate: Some(req.speed.filter(|s| *s > 0.0).unwrap_or(1.0)),
            pitch: Some(0.0),
            volume_gain_db: Some(0.0),
            effects_profile_id: None,
        },
    }
}

/// `input_chars` is the character count of the request text, recorded when
/// the request was built.
pub fn tts_response(resp: &TtsResponse, input_chars: Option<u64>) -> (AudioEnvelope, UsageRecord) {
    let (format, sample_rate) = match &resp.audio_config {
        Some(cfg) => {
            let format = match cfg.audio_encoding.as_str() {
                "WAV" => "wav",
                "OGG" => "ogg",
                _ => "mp3",
            };
            (format, cfg.sample_rate_hertz.unwrap_or(DEFAULT_TTS_SAMPLE_RATE))
        }
        None => ("mp3", DEFAULT_TTS_SAMPLE_RATE),
    };

    let body = AudioEnvelope {
        created: chrono::Utc::now().timestamp(),
        data: vec![AudioData {
            audio_base64: resp.audio_content.clone(),
            format: format.to_string(),
            duration: None,
            sample_rate: Some(sample_rate),
        }],
    };
    let chars = input_chars.filter(|c| *c > 0).unwrap_or(DEFAULT_TTS_CHARS);
    (body, UsageRecord::new(UsageUnit::Characters, chars, 0))
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

pub fn embedding_request(req: &EmbeddingRequest, upstream_model: &str) -> VertexEmbeddingRequest {
    let task = registry::embedding_task(upstream_model);
    VertexEmbeddingRequest {
        instances: req
            .input
            .texts()
            .into_iter()
            .map(|content| EmbeddingInstance {
                content,
                task: task.to_string(),
                title: None,
            })
            .collect(),
        parameters: EmbeddingParameters {
            auto_truncate: true,
            output_dimensionality: req.dimensions.filter(|d| *d > 0),
        },
    }
}

pub fn embedding_response(
    resp: &VertexEmbeddingResponse,
    info: &RelayInfo,
) -> (EmbeddingResponse, UsageRecord) {
    let tokens: u64 = resp
        .predictions
        .iter()
        .filter_map(|p| p.embeddings.statistics.as_ref())
        .map(|s| s.token_count)
        .sum();

    let body = EmbeddingResponse {
        object: "list".to_string(),
        data: resp
            .predictions
            .iter()
            .enumerate()
            .map(|(index, p)| EmbeddingData {
                object: "embedding".to_string(),
                index,
                embedding: p.embeddings.values.clone(),
            })
            .collect(),
        model: info.origin_model.clone(),
        usage: EmbeddingUsage {
            prompt_tokens: tokens,
            total_tokens: tokens,
        },
    };
    (body, UsageRecord::tokens(tokens, 0))
}
