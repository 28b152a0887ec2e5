//! Estimator and policy settings.
//!
//! Plain data shared by the engine and the configuration loader. Every field
//! has a default so partial configuration tables deserialize.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SettingsError {
    #[error("chars_per_token must be a positive finite number, got {0}")]
    InvalidCharsPerToken(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorStrategy {
    /// `ceil(chars / chars_per_token)`.
    #[default]
    Heuristic,
    /// Delegate to a tokenizer, falling back to the heuristic on failure.
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    pub strategy: EstimatorStrategy,
    /// Divisor for the heuristic. Varies by language and content; tune per corpus.
    pub chars_per_token: f64,
    /// Fixed tokens added per item for role markers and delimiters.
    pub item_overhead_tokens: u32,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            strategy: EstimatorStrategy::Heuristic,
            chars_per_token: Self::DEFAULT_CHARS_PER_TOKEN,
            item_overhead_tokens: 0,
        }
    }
}

impl EstimatorSettings {
    pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.chars_per_token.is_finite() && self.chars_per_token > 0.0 {
            Ok(())
        } else {
            Err(SettingsError::InvalidCharsPerToken(self.chars_per_token))
        }
    }
}

/// Knobs for the individual retention policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Cardinality bound of the sliding window (unpinned items kept).
    pub sliding_window_max_items: usize,
    /// Summarization only runs when the log is longer than this.
    pub summarize_threshold: usize,
    /// Recent items kept verbatim next to a summary.
    pub keep_recent: usize,
    /// Output ceiling handed to the summarizer.
    pub summary_max_tokens: u32,
    /// Most recent items retrieval always keeps.
    pub k_recent: usize,
    /// Highest-scoring older items retrieval adds.
    pub max_candidates: usize,
    /// Hybrid reduces the unpinned middle once it holds more items than this.
    pub max_messages_threshold: usize,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            sliding_window_max_items: 10,
            summarize_threshold: 20,
            keep_recent: 10,
            summary_max_tokens: 500,
            k_recent: 5,
            max_candidates: 5,
            max_messages_threshold: 20,
        }
    }
}
