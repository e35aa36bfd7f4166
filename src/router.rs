//! Sticky per-session model selection.
//!
//! A session picks a model with an inline `/model <name>` command or with an
//! environment/header override. The choice is remembered until the session
//! is swept out after the retention window.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4";
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

const MODEL_COMMAND_PATTERN: &str = r"(?i)^/model\s+([a-zA-Z0-9\-\.]+)(?:\s|$)";

/// Alias to model id. Full ids map to themselves.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("gemini-2.0-flash", "gemini-2.0-flash"),
    ("gemini-2.5-pro", "gemini-2.5-pro"),
    ("gemini-2.5-flash", "gemini-2.5-flash"),
    ("gemini-2.0-flash-lite", "gemini-2.0-flash-lite"),
    ("claude-3-7-sonnet", "claude-3-7-sonnet"),
    ("claude-opus-4", "claude-opus-4"),
    ("claude-sonnet-4", "claude-sonnet-4"),
    ("gemini", "gemini-2.5-pro"),
    ("claude", "claude-sonnet-4"),
    ("sonnet", "claude-sonnet-4"),
    ("opus", "claude-opus-4"),
    ("flash", "gemini-2.5-flash"),
    ("pro", "gemini-2.5-pro"),
    ("lite", "gemini-2.0-flash-lite"),
];

/// Checked in order; the first one that resolves wins.
pub const OVERRIDE_ENV_VARS: &[&str] = &["CLAUDE_CUSTOM_MODEL", "CLAUDE_MODEL", "ANTHROPIC_MODEL", "AI_MODEL"];

/// Checked in order after the environment, case-insensitively.
pub const OVERRIDE_HEADERS: &[&str] = &[
    "X-Claude-Custom-Model",
    "X-Claude-Model",
    "X-Model",
    "Claude-Custom-Model",
    "Claude-Model",
    "Model",
    "X-Anthropic-Model",
];

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSession {
    pub session_id: String,
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

/// What the router looks at for one request.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest<'a> {
    pub session_id: Option<&'a str>,
    /// Text of the newest user message.
    pub latest_user_message: Option<&'a str>,
    pub headers: &'a [(String, String)],
    pub requested_model: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Command,
    Environment,
    Header,
    Session,
    Request,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub model: String,
    pub source: RouteSource,
    /// The user message with the `/model` command removed, when one matched.
    pub stripped_message: Option<String>,
}

pub struct ModelRouter {
    sessions: RwLock<HashMap<String, ModelSession>>,
    default_model: String,
    retention: Duration,
    env_lookup: EnvLookup,
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("sessions", &self.sessions.read().len())
            .field("default_model", &self.default_model)
            .field("retention", &self.retention)
            .finish()
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL, Duration::hours(DEFAULT_RETENTION_HOURS))
    }
}

impl ModelRouter {
    pub fn new(default_model: impl Into<String>, retention: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            default_model: default_model.into(),
            retention,
            env_lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the process-environment lookup, e.g. with a fixed map in tests.
    pub fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env_lookup = Box::new(lookup);
        self
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Resolve a user-typed name: exact alias first, then the longest alias
    /// contained in the name.
    pub fn resolve_alias(name: &str) -> Option<&'static str> {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return None;
        }
        if let Some((_, model)) = MODEL_ALIASES.iter().find(|(alias, _)| *alias == name) {
            return Some(model);
        }
        let mut by_length: Vec<&(&str, &str)> = MODEL_ALIASES.iter().collect();
        by_length.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        by_length
            .into_iter()
            .find(|(alias, _)| name.contains(alias))
            .map(|(_, model)| *model)
    }

    /// Parse a leading `/model <name>` command.
    /// Returns the resolved model and the rest of the message.
    pub fn parse_model_command(message: &str) -> Option<(&'static str, String)> {
        let re = command_regex()?;
        let trimmed = message.trim();
        let token = re.captures(trimmed)?.get(1)?.as_str();
        let model = Self::resolve_alias(token)?;
        let remaining = re.replace(trimmed, "").trim().to_string();
        Some((model, remaining))
    }

    pub fn route(&self, req: &RouteRequest<'_>) -> RouteDecision {
        self.route_at(req, Utc::now())
    }

    pub fn route_at(&self, req: &RouteRequest<'_>, now: DateTime<Utc>) -> RouteDecision {
        if let Some((model, remaining)) = req.latest_user_message.and_then(Self::parse_model_command) {
            tracing::info!(model, session = ?req.session_id, "model switched by command");
            self.persist(req.session_id, model, now);
            return RouteDecision {
                model: model.to_string(),
                source: RouteSource::Command,
                stripped_message: Some(remaining),
            };
        }

        if let Some((model, source)) = self.environment_override(req.headers) {
            self.persist(req.session_id, model, now);
            return RouteDecision {
                model: model.to_string(),
                source,
                stripped_message: None,
            };
        }

        if let Some(model) = req.session_id.and_then(|id| self.session_model(id)) {
            return RouteDecision {
                model,
                source: RouteSource::Session,
                stripped_message: None,
            };
        }

        match req.requested_model.filter(|m| !m.trim().is_empty()) {
            Some(model) => RouteDecision {
                model: model.to_string(),
                source: RouteSource::Request,
                stripped_message: None,
            },
            None => RouteDecision {
                model: self.default_model.clone(),
                source: RouteSource::Default,
                stripped_message: None,
            },
        }
    }

    fn environment_override(&self, headers: &[(String, String)]) -> Option<(&'static str, RouteSource)> {
        for var in OVERRIDE_ENV_VARS {
            if let Some(model) = (self.env_lookup)(var).as_deref().and_then(Self::resolve_alias) {
                tracing::debug!(var, model, "model override from environment");
                return Some((model, RouteSource::Environment));
            }
        }
        for name in OVERRIDE_HEADERS {
            let value = headers
                .iter()
                .find(|(k, v)| k.eq_ignore_ascii_case(name) && !v.is_empty())
                .map(|(_, v)| v.as_str());
            if let Some(model) = value.and_then(Self::resolve_alias) {
                tracing::debug!(header = name, model, "model override from header");
                return Some((model, RouteSource::Header));
            }
        }
        None
    }

    fn persist(&self, session_id: Option<&str>, model: &str, now: DateTime<Utc>) {
        if let Some(id) = session_id {
            self.set_session_model(id, model, now);
        }
    }

    pub fn set_session_model(&self, session_id: &str, model: &str, now: DateTime<Utc>) {
        self.sessions.write().insert(
            session_id.to_string(),
            ModelSession {
                session_id: session_id.to_string(),
                model: model.to_string(),
                updated_at: now,
            },
        );
    }

    pub fn session_model(&self, session_id: &str) -> Option<String> {
        self.sessions.read().get(session_id).map(|s| s.model.clone())
    }

    /// Remove sessions last updated before `now - retention`.
    /// Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.updated_at >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, remaining = sessions.len(), "expired model sessions swept");
        }
        removed
    }

    /// Number of live sessions per model.
    pub fn usage_stats(&self) -> BTreeMap<String, usize> {
        let mut stats = BTreeMap::new();
        for session in self.sessions.read().values() {
            *stats.entry(session.model.clone()).or_insert(0) += 1;
        }
        stats
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn supported_aliases() -> Vec<&'static str> {
        MODEL_ALIASES.iter().map(|(alias, _)| *alias).collect()
    }

    pub fn help_message() -> String {
        let mut out = String::from("Available models:\n");
        for (alias, model) in MODEL_ALIASES {
            if alias == model {
                out.push_str(&format!("- {}\n", alias));
            }
        }
        out.push_str("\nShort aliases:\n");
        for (alias, model) in MODEL_ALIASES {
            if alias != model {
                out.push_str(&format!("- {} -> {}\n", alias, model));
            }
        }
        out.push_str("\nUsage:\n- /model gemini-2.0-flash\n- /model flash\n");
        out.push_str(&format!(
            "\nOr set one of {} (or the {} header).\n",
            OVERRIDE_ENV_VARS.join(", "),
            OVERRIDE_HEADERS[0]
        ));
        out
    }
}

fn command_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(MODEL_COMMAND_PATTERN).ok()).as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn router() -> ModelRouter {
        ModelRouter::default().with_env_lookup(|_| None)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_alias_resolution() {
        assert_eq!(ModelRouter::resolve_alias("flash"), Some("gemini-2.5-flash"));
        assert_eq!(ModelRouter::resolve_alias("Claude-Opus-4"), Some("claude-opus-4"));
        // Longest contained alias wins: "gemini-2.0-flash-lite" beats "flash".
        assert_eq!(ModelRouter::resolve_alias("my-gemini-2.0-flash-lite-x"), Some("gemini-2.0-flash-lite"));
        assert_eq!(ModelRouter::resolve_alias("gpt-4o"), None);
        assert_eq!(ModelRouter::resolve_alias(""), None);
    }

    #[test]
    fn test_parse_model_command() {
        let (model, rest) = ModelRouter::parse_model_command("/model flash  explain this").unwrap();
        assert_eq!(model, "gemini-2.5-flash");
        assert_eq!(rest, "explain this");

        let (model, rest) = ModelRouter::parse_model_command("/MODEL opus").unwrap();
        assert_eq!(model, "claude-opus-4");
        assert_eq!(rest, "");

        assert!(ModelRouter::parse_model_command("please /model flash").is_none());
        assert!(ModelRouter::parse_model_command("/model gpt-4o hi").is_none());
    }

    #[test]
    fn test_command_beats_header_and_persists() {
        let r = router();
        let headers = vec![("x-claude-model".to_string(), "opus".to_string())];
        let decision = r.route_at(
            &RouteRequest {
                session_id: Some("s1"),
                latest_user_message: Some("/model flash"),
                headers: &headers,
                requested_model: Some("claude-sonnet-4"),
            },
            t0(),
        );
        assert_eq!(decision.model, "gemini-2.5-flash");
        assert_eq!(decision.source, RouteSource::Command);
        assert_eq!(r.session_model("s1").as_deref(), Some("gemini-2.5-flash"));
    }

    #[test]
    fn test_header_override_is_case_insensitive() {
        let r = router();
        let headers = vec![("x-model".to_string(), "pro".to_string())];
        let decision = r.route_at(
            &RouteRequest {
                session_id: Some("s2"),
                latest_user_message: Some("hello"),
                headers: &headers,
                requested_model: Some("claude-sonnet-4"),
            },
            t0(),
        );
        assert_eq!(decision.model, "gemini-2.5-pro");
        assert_eq!(decision.source, RouteSource::Header);
        assert_eq!(r.session_model("s2").as_deref(), Some("gemini-2.5-pro"));
    }

    #[test]
    fn test_env_beats_header() {
        let r = ModelRouter::default().with_env_lookup(|name| (name == "AI_MODEL").then(|| "lite".to_string()));
        let headers = vec![("Model".to_string(), "opus".to_string())];
        let decision = r.route_at(
            &RouteRequest {
                headers: &headers,
                ..RouteRequest::default()
            },
            t0(),
        );
        assert_eq!(decision.model, "gemini-2.0-flash-lite");
        assert_eq!(decision.source, RouteSource::Environment);
    }

    #[test]
    fn test_session_then_request_then_default() {
        let r = router();
        r.set_session_model("s3", "claude-opus-4", t0());

        let from_session = r.route_at(
            &RouteRequest {
                session_id: Some("s3"),
                requested_model: Some("gemini-2.5-pro"),
                ..RouteRequest::default()
            },
            t0(),
        );
        assert_eq!(from_session.model, "claude-opus-4");
        assert_eq!(from_session.source, RouteSource::Session);

        let from_request = r.route_at(
            &RouteRequest {
                session_id: Some("other"),
                requested_model: Some("gemini-2.5-pro"),
                ..RouteRequest::default()
            },
            t0(),
        );
        assert_eq!(from_request.source, RouteSource::Request);

        let fallback = r.route_at(&RouteRequest::default(), t0());
        assert_eq!(fallback.model, DEFAULT_MODEL);
        assert_eq!(fallback.source, RouteSource::Default);
    }

    #[test]
    fn test_unresolvable_command_falls_through() {
        let r = router();
        let decision = r.route_at(
            &RouteRequest {
                session_id: Some("s4"),
                latest_user_message: Some("/model gpt-4o"),
                requested_model: Some("claude-sonnet-4"),
                ..RouteRequest::default()
            },
            t0(),
        );
        assert_eq!(decision.source, RouteSource::Request);
        assert_eq!(r.session_model("s4"), None);
    }

    #[test]
    fn test_sweep_respects_retention() {
        let r = router();
        r.set_session_model("old", "gemini-2.5-pro", t0());

        assert_eq!(r.sweep_expired(t0() + Duration::hours(23)), 0);
        assert_eq!(r.session_model("old").as_deref(), Some("gemini-2.5-pro"));

        assert_eq!(r.sweep_expired(t0() + Duration::hours(25)), 1);
        assert_eq!(r.session_model("old"), None);
    }

    #[test]
    fn test_usage_stats_and_help() {
        let r = router();
        r.set_session_model("a", "gemini-2.5-pro", t0());
        r.set_session_model("b", "gemini-2.5-pro", t0());
        r.set_session_model("c", "claude-opus-4", t0());
        let stats = r.usage_stats();
        assert_eq!(stats.get("gemini-2.5-pro"), Some(&2));
        assert_eq!(stats.get("claude-opus-4"), Some(&1));

        let help = ModelRouter::help_message();
        assert!(help.contains("flash -> gemini-2.5-flash"));
        assert!(ModelRouter::supported_aliases().contains(&"sonnet"));
    }
}
