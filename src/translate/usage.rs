//! Billable usage extracted from an upstream response.

use serde::Serialize;

/// What one unit of a [`UsageRecord`] counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageUnit {
    Tokens,
    Videos,
    Images,
    AudioSeconds,
    Characters,
}

/// Fields are private so `total_units` always equals prompt plus completion.
/// A completion count that would overflow the sum is clamped to fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    unit: UsageUnit,
    prompt_units: u64,
    completion_units: u64,
    total_units: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_creation_tokens: Option<u64>,
}

impl UsageRecord {
    pub fn new(unit: UsageUnit, prompt_units: u64, completion_units: u64) -> Self {
        let headroom = u64::MAX - prompt_units;
        if completion_units > headroom {
            tracing::warn!(prompt_units, completion_units, "usage overflows u64, clamping completion units");
        }
        let completion_units = completion_units.min(headroom);
        Self {
            unit,
            prompt_units,
            completion_units,
            total_units: prompt_units + completion_units,
            cache_read_tokens: None,
            cache_creation_tokens: None,
        }
    }

    pub fn tokens(prompt: u64, completion: u64) -> Self {
        Self::new(UsageUnit::Tokens, prompt, completion)
    }

    pub fn with_cache(mut self, read: Option<u64>, creation: Option<u64>) -> Self {
        self.cache_read_tokens = read;
        self.cache_creation_tokens = creation;
        self
    }

    pub fn unit(&self) -> UsageUnit {
        self.unit
    }

    pub fn prompt_units(&self) -> u64 {
        self.prompt_units
    }

    pub fn completion_units(&self) -> u64 {
        self.completion_units
    }

    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    pub fn cache_read_tokens(&self) -> Option<u64> {
        self.cache_read_tokens
    }

    pub fn cache_creation_tokens(&self) -> Option<u64> {
        self.cache_creation_tokens
    }
}
