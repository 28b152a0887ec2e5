//! Token estimation.
//!
//! Two interchangeable strategies:
//!
//! - **Heuristic**: `ceil(chars / chars_per_token)`. The divisor varies by
//!   language and content, so it is configuration rather than a constant.
//! - **Exact**: delegates to an injected [`Tokenizer`]. When the tokenizer
//!   fails the heuristic is used for that item and the estimate is flagged
//!   approximate, so degraded precision always reaches the selection report.
//!
//! Item estimates are memoized on the item itself, tagged with the key of the
//! estimator that produced them. Another estimator never reads that memo.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tiktoken_rs::{CoreBPE, o200k_base};

use ctxbudget_types::{
    ConversationItem, EstimatorSettings, EstimatorStrategy, ItemBody, SettingsError,
    TokenEstimate,
};

use crate::collaborators::{CollaboratorError, CollaboratorKind, Tokenizer};

/// The tiktoken encoder is expensive to initialize (loads vocabulary data),
/// so we create it once and reuse it across all `TiktokenTokenizer` instances.
static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_encoder() -> Option<&'static CoreBPE> {
    ENCODER.get_or_init(|| o200k_base().ok()).as_ref()
}

/// Built-in exact tokenizer using tiktoken's `o200k_base` encoding.
///
/// Accurate for OpenAI models and a reasonable approximation for others;
/// proprietary tokenizers may differ by several percent.
#[derive(Clone, Copy)]
pub struct TiktokenTokenizer {
    encoder: Option<&'static CoreBPE>,
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer")
            .field("encoder", &self.encoder.as_ref().map(|_| "<CoreBPE>"))
            .finish()
    }
}

impl TiktokenTokenizer {
    #[must_use]
    pub fn new() -> Self {
        let encoder = get_encoder();
        if encoder.is_none() {
            tracing::error!(
                "Failed to initialize tiktoken o200k_base encoder. Estimates will use the heuristic."
            );
        }
        Self { encoder }
    }
}

impl Default for TiktokenTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> Result<u32, CollaboratorError> {
        let encoder = self.encoder.ok_or_else(|| {
            CollaboratorError::unavailable(
                CollaboratorKind::Tokenizer,
                "o200k_base encoder failed to load",
            )
        })?;
        Ok(u32::try_from(encoder.encode_ordinary(text).len()).unwrap_or(u32::MAX))
    }
}

static NEXT_ESTIMATOR_KEY: AtomicU64 = AtomicU64::new(1);

fn next_estimator_key() -> u64 {
    NEXT_ESTIMATOR_KEY.fetch_add(1, Ordering::Relaxed)
}

/// Clones share a memo key; any change to how items are counted takes a new one.
#[derive(Clone)]
pub struct TokenEstimator {
    tokenizer: Option<Arc<dyn Tokenizer>>,
    chars_per_token: f64,
    item_overhead: u32,
    key: u64,
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("tokenizer", &self.tokenizer.as_ref().map(|_| "<dyn Tokenizer>"))
            .field("chars_per_token", &self.chars_per_token)
            .field("item_overhead", &self.item_overhead)
            .finish()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            tokenizer: None,
            chars_per_token: EstimatorSettings::DEFAULT_CHARS_PER_TOKEN,
            item_overhead: 0,
            key: next_estimator_key(),
        }
    }
}

impl TokenEstimator {
    pub fn heuristic(chars_per_token: f64) -> Result<Self, SettingsError> {
        Self::validated(None, chars_per_token)
    }

    /// Exact counting through `tokenizer`, with `chars_per_token` as the
    /// fallback divisor.
    pub fn exact(
        tokenizer: Arc<dyn Tokenizer>,
        chars_per_token: f64,
    ) -> Result<Self, SettingsError> {
        Self::validated(Some(tokenizer), chars_per_token)
    }

    /// Build from settings. The exact strategy uses `tokenizer` when given and
    /// the built-in tiktoken tokenizer otherwise.
    pub fn from_settings(
        settings: &EstimatorSettings,
        tokenizer: Option<Arc<dyn Tokenizer>>,
    ) -> Result<Self, SettingsError> {
        let tokenizer = match settings.strategy {
            EstimatorStrategy::Heuristic => None,
            EstimatorStrategy::Exact => Some(
                tokenizer.unwrap_or_else(|| Arc::new(TiktokenTokenizer::new()) as Arc<dyn Tokenizer>),
            ),
        };
        Ok(Self::validated(tokenizer, settings.chars_per_token)?
            .with_item_overhead(settings.item_overhead_tokens))
    }

    fn validated(
        tokenizer: Option<Arc<dyn Tokenizer>>,
        chars_per_token: f64,
    ) -> Result<Self, SettingsError> {
        EstimatorSettings {
            chars_per_token,
            ..EstimatorSettings::default()
        }
        .validate()?;
        Ok(Self {
            tokenizer,
            chars_per_token,
            item_overhead: 0,
            key: next_estimator_key(),
        })
    }

    /// Fixed tokens added to every item for role markers and delimiters.
    #[must_use]
    pub fn with_item_overhead(mut self, tokens: u32) -> Self {
        self.item_overhead = tokens;
        self.key = next_estimator_key();
        self
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.tokenizer.is_some()
    }

    #[must_use]
    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    fn heuristic_count(&self, chars: usize) -> u32 {
        if chars == 0 {
            return 0;
        }
        let tokens = (chars as f64 / self.chars_per_token).ceil();
        if tokens >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            tokens as u32
        }
    }

    /// Estimate a bare string. No per-item overhead is added.
    #[must_use]
    pub fn estimate_text(&self, text: &str) -> TokenEstimate {
        self.estimate_parts(std::iter::once(text))
    }

    /// Estimate an item body, including the per-item overhead.
    #[must_use]
    pub fn estimate_body(&self, body: &ItemBody) -> TokenEstimate {
        let blocks: Vec<_> = body.content().iter().map(|b| b.sizing_text()).collect();
        let content = self.estimate_parts(blocks.iter().map(|block| &**block));
        TokenEstimate {
            tokens: content.tokens.saturating_add(self.item_overhead),
            approximate: content.approximate,
        }
    }

    /// Memoized estimate of a logged item.
    #[must_use]
    pub fn estimate_item(&self, item: &ConversationItem) -> TokenEstimate {
        item.estimated_tokens_with(self.key, |body| self.estimate_body(body))
    }

    fn estimate_parts<'a>(&self, parts: impl Iterator<Item = &'a str> + Clone) -> TokenEstimate {
        let heuristic = || {
            let chars = parts.clone().map(|part| part.chars().count()).sum();
            self.heuristic_count(chars)
        };

        let Some(tokenizer) = &self.tokenizer else {
            return TokenEstimate::exact(heuristic());
        };

        let mut total: u32 = 0;
        for part in parts.clone() {
            match tokenizer.count_tokens(part) {
                Ok(tokens) => total = total.saturating_add(tokens),
                Err(err) => {
                    tracing::warn!(error = %err, "Tokenizer failed; using heuristic estimate");
                    return TokenEstimate::approximate(heuristic());
                }
            }
        }
        TokenEstimate::exact(total)
    }
}
