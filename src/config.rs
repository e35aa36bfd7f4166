use crate::endpoint::VertexCredentials;
use crate::error::{GatewayError, Result};
use crate::registry::Mode;
use crate::router::{DEFAULT_MODEL, DEFAULT_RETENTION_HOURS};
use crate::translate::Compat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub vertex: VertexConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub compat: Compat,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexConfig {
    /// Env var holding the service-account JSON key.
    pub credentials_env: String,
    /// Env var holding a current OAuth access token.
    pub access_token_env: String,
    /// Empty, `global`, a region name, or a JSON object keyed by model.
    pub region: String,
    /// Mode for model names no rule recognises.
    pub default_mode: Mode,
    /// Strip `-thinking-*` / `-nothinking` suffixes for Gemini and turn them into thinkingConfig.
    pub thinking_adapter: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_override: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub default_model: String,
    pub retention_hours: i64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub webhook_secret_env: String,
    pub signature_tolerance_secs: i64,
    /// Env var holding the Stripe API secret key. Unset disables top-up requests.
    pub stripe_secret_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_price_id: Option<String>,
    pub min_topup: i64,
    /// Public base URL the checkout page returns to.
    pub server_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ratio_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Env var holding the bearer token for `/admin/*`. Unset means open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

fn default_port() -> u16 {
    4222
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            vertex: VertexConfig::default(),
            router: RouterConfig::default(),
            compat: Compat::default(),
            billing: BillingConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl Default for VertexConfig {
    fn default() -> Self {
        Self {
            credentials_env: "VERTEX_CREDENTIALS".to_string(),
            access_token_env: "VERTEX_ACCESS_TOKEN".to_string(),
            region: String::new(),
            default_mode: Mode::Gemini,
            thinking_adapter: true,
            endpoint_override: None,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            retention_hours: DEFAULT_RETENTION_HOURS,
            sweep_interval_secs: 3600,
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            webhook_secret_env: "STRIPE_WEBHOOK_SECRET".to_string(),
            signature_tolerance_secs: crate::billing::DEFAULT_SIGNATURE_TOLERANCE_SECS,
            stripe_secret_key_env: "STRIPE_SECRET_KEY".to_string(),
            stripe_price_id: None,
            min_topup: 1,
            server_address: "http://localhost:4222".to_string(),
            cache_ratio_file: None,
        }
    }
}

impl GatewayConfig {
    /// Load config from a TOML file. Missing sections take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir. With no file found the
    /// built-in defaults are used.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::warn!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read the Vertex service-account credentials from the configured env var.
    pub fn resolve_credentials(&self) -> Result<VertexCredentials> {
        VertexCredentials::from_env(&self.vertex.credentials_env)
    }

    pub fn resolve_webhook_secret(&self) -> Option<String> {
        std::env::var(&self.billing.webhook_secret_env)
            .ok()
            .filter(|s| !s.trim().is_empty())
    }

    pub fn resolve_stripe_secret_key(&self) -> Option<String> {
        std::env::var(&self.billing.stripe_secret_key_env)
            .ok()
            .filter(|s| !s.trim().is_empty())
    }

    pub fn resolve_admin_token(&self) -> Option<String> {
        self.admin
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|s| !s.trim().is_empty())
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("vertex-gateway.toml"));

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("vertex-gateway")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("vertex-gateway").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join("vertex-gateway").join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".vertex-gateway.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
