//! Error types for the gateway.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    /// The vendor body did not match the shape expected for its mode.
    /// The message never carries the vendor body itself.
    #[error("Upstream decode error: {message}")]
    UpstreamDecode { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Webhook error: {message}")]
    Webhook { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: msg.into(),
        }
    }

    pub fn upstream_decode(msg: impl Into<String>) -> Self {
        Self::UpstreamDecode {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn webhook(msg: impl Into<String>) -> Self {
        Self::Webhook {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// HTTP status returned to the caller for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::UnsupportedOperation { .. } | Self::Translation { .. } | Self::Webhook { .. } => {
                400
            }
            Self::UpstreamDecode { .. } | Self::Provider { .. } | Self::Http(_) => 502,
            _ => 500,
        }
    }

    /// Error `type` string used in both the OpenAI and Claude error envelopes.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::UnsupportedOperation { .. } | Self::Translation { .. } | Self::Webhook { .. } => {
                "invalid_request_error"
            }
            _ => "api_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::unsupported("stream").status(), 400);
        assert_eq!(GatewayError::upstream_decode("bad").status(), 502);
        assert_eq!(GatewayError::config("missing").status(), 500);
        assert_eq!(
            GatewayError::unsupported("x").error_type(),
            "invalid_request_error"
        );
        assert_eq!(GatewayError::upstream_decode("x").error_type(), "api_error");
    }

    #[test]
    fn test_display_is_labeled() {
        let err = GatewayError::unsupported("streaming is not available for imagen");
        assert_eq!(
            err.to_string(),
            "Unsupported operation: streaming is not available for imagen"
        );
    }
}
