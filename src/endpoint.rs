//! Vertex AI endpoint URLs and service-account credentials.

use serde::Deserialize;

use crate::error::{GatewayError, Result};
use crate::registry::{Mode, GLOBAL_REGION};
use crate::translate::RelayInfo;

/// The parts of a service-account JSON key the gateway reads.
/// The private key itself is left to the token provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VertexCredentials {
    pub project_id: String,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
}

impl VertexCredentials {
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: Self = serde_json::from_str(json)
            .map_err(|e| GatewayError::config(format!("Invalid Vertex credentials JSON: {}", e)))?;
        if creds.project_id.trim().is_empty() {
            return Err(GatewayError::config("Vertex credentials have an empty project_id"));
        }
        Ok(creds)
    }

    /// Read the credentials blob from the environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self> {
        let json = std::env::var(var).map_err(|_| {
            GatewayError::config(format!(
                "Environment variable '{}' not set. Set it to the service-account JSON key.",
                var
            ))
        })?;
        Self::from_json(&json)
    }
}

/// Full upstream URL for a request.
///
/// The `global` region uses the region-less host. Any other region appears
/// both as the host prefix and in the `locations/` segment. `endpoint_override`
/// replaces scheme and host.
pub fn request_url(info: &RelayInfo, project_id: &str, endpoint_override: Option<&str>) -> String {
    let region = info.region.as_str();
    let global = region == GLOBAL_REGION;

    if info.mode == Mode::TextToSpeech {
        let host = if global {
            "https://texttospeech.googleapis.com".to_string()
        } else {
            format!("https://{}-texttospeech.googleapis.com", region)
        };
        return format!("{}/v1/text:synthesize", base(endpoint_override, host));
    }

    let host = if global {
        "https://aiplatform.googleapis.com".to_string()
    } else {
        format!("https://{}-aiplatform.googleapis.com", region)
    };
    let version = if info.mode == Mode::Llama { "v1beta1" } else { "v1" };
    let location = format!("projects/{}/locations/{}", project_id, region);
    let model = &info.upstream_model;

    let path = match info.mode {
        Mode::Llama | Mode::ReasoningChat => format!("{}/endpoints/openapi/chat/completions", location),
        Mode::Claude => {
            let action = if info.is_stream { "streamRawPredict?alt=sse" } else { "rawPredict" };
            format!("{}/publishers/anthropic/models/{}:{}", location, model, action)
        }
        Mode::Gemini => {
            let action = if info.is_stream {
                "streamGenerateContent?alt=sse"
            } else {
                "generateContent"
            };
            format!("{}/publishers/google/models/{}:{}", location, model, action)
        }
        Mode::VideoGen => format!("{}/publishers/google/models/{}:generateContent", location, model),
        Mode::ImageGen | Mode::AudioGen | Mode::Embedding | Mode::TextToSpeech => {
            format!("{}/publishers/google/models/{}:predict", location, model)
        }
    };

    format!("{}/{}/{}", base(endpoint_override, host), version, path)
}

fn base(endpoint_override: Option<&str>, host: String) -> String {
    match endpoint_override {
        Some(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(model: &str, stream: bool, region: &str) -> RelayInfo {
        RelayInfo::resolve(model, stream, Mode::Gemini, true, region)
    }

    #[test]
    fn test_global_gemini_url() {
        let url = request_url(&info("gemini-2.5-pro", false, ""), "proj", None);
        assert_eq!(
            url,
            "https://aiplatform.googleapis.com/v1/projects/proj/locations/global/publishers/google/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn test_regional_claude_stream_url() {
        let url = request_url(&info("claude-sonnet-4", true, "us-east5"), "proj", None);
        assert!(url.starts_with("https://us-east5-aiplatform.googleapis.com/v1/projects/proj/locations/us-east5/"));
        assert!(url.contains("/publishers/anthropic/models/claude-sonnet-4@"));
        assert!(url.ends_with(":streamRawPredict?alt=sse"));
    }

    #[test]
    fn test_gemini_stream_strips_thinking_suffix() {
        let url = request_url(&info("gemini-2.5-flash-thinking-256", true, ""), "p", None);
        assert!(url.ends_with("/models/gemini-2.5-flash:streamGenerateContent?alt=sse"));
    }

    #[test]
    fn test_maas_and_media_urls() {
        let llama = request_url(&info("meta/llama3-405b-instruct-maas", false, "us-central1"), "p", None);
        assert_eq!(
            llama,
            "https://us-central1-aiplatform.googleapis.com/v1beta1/projects/p/locations/us-central1/endpoints/openapi/chat/completions"
        );

        let deepseek = request_url(&info("deepseek-ai/deepseek-r1-0528-maas", false, ""), "p", None);
        assert_eq!(
            deepseek,
            "https://aiplatform.googleapis.com/v1/projects/p/locations/global/endpoints/openapi/chat/completions"
        );

        let imagen = request_url(&info("imagen-3.0-generate-002", false, ""), "p", None);
        assert!(imagen.ends_with("/models/imagen-3.0-generate-002:predict"));

        let veo = request_url(&info("veo-3-generate-001", false, ""), "p", None);
        assert!(veo.ends_with(":generateContent"));
    }

    #[test]
    fn test_tts_url() {
        assert_eq!(
            request_url(&info("text-to-speech-neural", false, ""), "p", None),
            "https://texttospeech.googleapis.com/v1/text:synthesize"
        );
        assert_eq!(
            request_url(&info("text-to-speech-neural", false, "europe-west1"), "p", None),
            "https://europe-west1-texttospeech.googleapis.com/v1/text:synthesize"
        );
    }

    #[test]
    fn test_endpoint_override_replaces_host() {
        let url = request_url(&info("gemini-2.5-pro", false, "us-central1"), "p", Some("http://127.0.0.1:9000/"));
        assert_eq!(
            url,
            "http://127.0.0.1:9000/v1/projects/p/locations/us-central1/publishers/google/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn test_credentials_require_project() {
        let creds = VertexCredentials::from_json(r#"{"type":"service_account","project_id":"my-proj","private_key":"-----"}"#).unwrap();
        assert_eq!(creds.project_id, "my-proj");
        assert!(VertexCredentials::from_json(r#"{"project_id":"  "}"#).is_err());
        assert!(VertexCredentials::from_json(r#"{"client_email":"a@b"}"#).is_err());
    }
}
