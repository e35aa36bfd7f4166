//! Per-model prompt-cache price multipliers.
//!
//! Three maps: cache reads, cache creation and hourly cache storage. The whole
//! table sits behind one `Arc` so readers never observe a half-applied update.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

pub const DEFAULT_CACHE_RATIO: f64 = 1.0;
pub const DEFAULT_CREATE_CACHE_RATIO: f64 = 1.25;
pub const DEFAULT_STORAGE_RATIO: f64 = 0.0;

/// Quota units per dollar-equivalent used by storage pricing.
const QUOTA_PER_UNIT: f64 = 500.0;

const CLAUDE_MODELS: &[&str] = &[
    "claude-3-5-haiku-20241022",
    "claude-3-5-sonnet-20240620",
    "claude-3-5-sonnet-20241022",
    "claude-3-7-sonnet-20250219",
    "claude-3-7-sonnet-20250219-thinking",
    "claude-3-haiku-20240307",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-opus-4-20250514",
    "claude-opus-4-20250514-thinking",
    "claude-sonnet-4-20250514",
    "claude-sonnet-4-20250514-thinking",
];

/// (model, hourly storage ratio). Read ratio is 0.125 and creation 1.0 for all.
const GOOGLE_CACHED_MODELS: &[(&str, f64)] = &[
    ("gemini-1.5-pro", 0.5),
    ("gemini-1.5-pro-latest", 0.5),
    ("gemini-1.5-flash", 0.05),
    ("gemini-1.5-flash-latest", 0.05),
    ("gemini-2.0-flash", 0.05),
    ("gemini-2.0-flash-exp", 0.05),
    ("gemini-2.5-pro", 0.25),
    ("gemini-2.5-flash", 0.05),
    ("gemini-2.5-flash-lite-preview-06-17", 0.025),
    ("text-embedding-004", 0.025),
    ("text-multilingual-embedding-002", 0.025),
    ("textembedding-gecko", 0.025),
    ("textembedding-gecko-multilingual", 0.025),
];

const DEEPSEEK_MODELS: &[&str] = &["deepseek-chat", "deepseek-coder", "deepseek-reasoner"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheRatioSnapshot {
    #[serde(default)]
    pub cache_ratio: HashMap<String, f64>,
    #[serde(default)]
    pub create_cache_ratio: HashMap<String, f64>,
    #[serde(default)]
    pub cache_storage_ratio: HashMap<String, f64>,
}

impl CacheRatioSnapshot {
    /// The built-in table.
    pub fn builtin() -> Self {
        let mut snapshot = Self::default();
        for model in CLAUDE_MODELS {
            snapshot.cache_ratio.insert(model.to_string(), 0.1);
            snapshot.create_cache_ratio.insert(model.to_string(), 1.25);
        }
        for (model, storage) in GOOGLE_CACHED_MODELS {
            snapshot.cache_ratio.insert(model.to_string(), 0.125);
            snapshot.create_cache_ratio.insert(model.to_string(), 1.0);
            snapshot.cache_storage_ratio.insert(model.to_string(), *storage);
        }
        for model in DEEPSEEK_MODELS {
            snapshot.cache_ratio.insert(model.to_string(), 0.25);
        }
        snapshot
    }
}

#[derive(Debug)]
pub struct CacheRatioTable {
    inner: RwLock<Arc<CacheRatioSnapshot>>,
}

impl Default for CacheRatioTable {
    fn default() -> Self {
        Self::new(CacheRatioSnapshot::builtin())
    }
}

impl CacheRatioTable {
    pub fn new(snapshot: CacheRatioSnapshot) -> Self {
        Self {
            inner: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Load a full table document from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: CacheRatioSnapshot = serde_json::from_str(&content).map_err(|e| {
            GatewayError::config(format!("Invalid cache ratio file {}: {}", path.display(), e))
        })?;
        tracing::info!(
            path = %path.display(),
            models = snapshot.cache_ratio.len(),
            "loaded cache ratio table"
        );
        Ok(Self::new(snapshot))
    }

    pub fn snapshot(&self) -> Arc<CacheRatioSnapshot> {
        self.inner.read().clone()
    }

    /// Read-ratio for `model`, and whether it was configured.
    pub fn cache_ratio(&self, model: &str) -> (f64, bool) {
        lookup(&self.snapshot().cache_ratio, model, DEFAULT_CACHE_RATIO)
    }

    pub fn create_cache_ratio(&self, model: &str) -> (f64, bool) {
        lookup(&self.snapshot().create_cache_ratio, model, DEFAULT_CREATE_CACHE_RATIO)
    }

    pub fn cache_storage_ratio(&self, model: &str) -> (f64, bool) {
        lookup(&self.snapshot().cache_storage_ratio, model, DEFAULT_STORAGE_RATIO)
    }

    /// Quota cost of keeping `cached_units` tokens cached for `hours`.
    pub fn storage_cost(&self, model: &str, cached_units: i64, hours: f64) -> f64 {
        let (ratio, found) = self.cache_storage_ratio(model);
        if !found || cached_units <= 0 || hours <= 0.0 {
            return 0.0;
        }
        cached_units as f64 * ratio * hours / 1_000_000.0 * QUOTA_PER_UNIT
    }

    /// Replace the read-ratio map from a JSON object of model to ratio.
    /// On a parse error the table is left as it was.
    pub fn update_cache_ratio_json(&self, json: &str) -> Result<()> {
        let map: HashMap<String, f64> = serde_json::from_str(json)?;
        let mut guard = self.inner.write();
        let mut next = CacheRatioSnapshot::clone(&guard);
        next.cache_ratio = map;
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn replace(&self, snapshot: CacheRatioSnapshot) {
        *self.inner.write() = Arc::new(snapshot);
    }

    /// The read-ratio map as a JSON object.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot().cache_ratio)?)
    }
}

fn lookup(map: &HashMap<String, f64>, model: &str, default: f64) -> (f64, bool) {
    match map.get(model) {
        Some(ratio) => (*ratio, true),
        None => (default, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_for_unknown_model() {
        let table = CacheRatioTable::default();
        assert_eq!(table.cache_ratio("unknown-model"), (1.0, false));
        assert_eq!(table.create_cache_ratio("unknown-model"), (1.25, false));
        assert_eq!(table.cache_storage_ratio("unknown-model"), (0.0, false));
    }

    #[test]
    fn test_builtin_entries() {
        let table = CacheRatioTable::default();
        assert_eq!(table.cache_ratio("claude-sonnet-4-20250514"), (0.1, true));
        assert_eq!(table.cache_ratio("gemini-2.5-pro"), (0.125, true));
        assert_eq!(table.create_cache_ratio("gemini-2.5-pro"), (1.0, true));
        assert_eq!(table.cache_storage_ratio("gemini-2.5-pro"), (0.25, true));
    }

    #[test]
    fn test_storage_cost() {
        let table = CacheRatioTable::default();
        // 1M tokens * 0.25 * 2h / 1M * 500
        assert!((table.storage_cost("gemini-2.5-pro", 1_000_000, 2.0) - 250.0).abs() < 1e-9);
        assert_eq!(table.storage_cost("gemini-2.5-pro", 0, 2.0), 0.0);
        assert_eq!(table.storage_cost("gemini-2.5-pro", 1000, 0.0), 0.0);
        assert_eq!(table.storage_cost("claude-sonnet-4-20250514", 1000, 1.0), 0.0);
    }

    #[test]
    fn test_update_swaps_read_map_only() {
        let table = CacheRatioTable::default();
        let before = table.snapshot();
        table.update_cache_ratio_json(r#"{"my-model":0.3}"#).unwrap();

        assert_eq!(table.cache_ratio("my-model"), (0.3, true));
        assert_eq!(table.cache_ratio("gemini-2.5-pro"), (1.0, false));
        assert_eq!(table.cache_storage_ratio("gemini-2.5-pro"), (0.25, true));
        // Readers holding the old snapshot keep seeing it.
        assert_eq!(before.cache_ratio.get("gemini-2.5-pro"), Some(&0.125));

        assert!(table.update_cache_ratio_json("not json").is_err());
        assert_eq!(table.cache_ratio("my-model"), (0.3, true));
        assert_eq!(table.to_json().unwrap(), r#"{"my-model":0.3}"#);
    }

    #[test]
    fn test_replace_and_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cache_ratio":{{"a":0.5}},"cache_storage_ratio":{{"a":1.0}}}}"#).unwrap();

        let table = CacheRatioTable::load(file.path()).unwrap();
        assert_eq!(table.cache_ratio("a"), (0.5, true));
        assert_eq!(table.create_cache_ratio("a"), (1.25, false));
        assert!((table.storage_cost("a", 2_000_000, 1.0) - 1000.0).abs() < 1e-9);

        table.replace(CacheRatioSnapshot::default());
        assert_eq!(table.cache_ratio("a"), (1.0, false));
    }
}
