//! Access tokens for Vertex AI.
//!
//! Minting a token from a service-account key and refreshing it happen
//! outside the gateway. A provider only hands out the current token.

use async_trait::async_trait;

use crate::endpoint::VertexCredentials;
use crate::error::{GatewayError, Result};

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Bearer token for calls made on behalf of `credentials`.
    async fn access_token(&self, credentials: &VertexCredentials) -> Result<String>;
}

/// Reads the token from an environment variable on every call, so an
/// external refresher can rotate it in place.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl AccessTokenProvider for EnvTokenProvider {
    async fn access_token(&self, credentials: &VertexCredentials) -> Result<String> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(GatewayError::config(format!(
                "Environment variable '{}' holds no access token for project {}",
                self.var, credentials.project_id
            ))),
        }
    }
}

/// A fixed token. Useful behind a sidecar that injects auth, and in tests.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider(pub String);

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self, _credentials: &VertexCredentials) -> Result<String> {
        Ok(self.0.clone())
    }
}
