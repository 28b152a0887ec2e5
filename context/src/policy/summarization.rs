//! Summarization of older items.
//!
//! Once the log is longer than the threshold, the unpinned items before the
//! most recent `keep_recent` are handed to the summarizer and replaced by its
//! output. Summarization is an optimization: when the summarizer fails or the
//! call is canceled, the whole log is truncated instead.

use tokio_util::sync::CancellationToken;

use ctxbudget_types::{Budget, ItemId, PolicySettings};

use crate::collaborators::{CollaboratorKind, Summarizer, call_collaborator};
use crate::error::SelectionError;
use crate::log::{ConversationLog, Pins};
use crate::selection::{Fallback, Selection, Sizer, SyntheticKind};
use crate::token_counter::TokenEstimator;

use super::truncation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizationConfig {
    /// Runs only when the log holds more items than this.
    pub summarize_threshold: usize,
    pub keep_recent: usize,
    pub max_output_tokens: u32,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self::from(&PolicySettings::default())
    }
}

impl From<&PolicySettings> for SummarizationConfig {
    fn from(settings: &PolicySettings) -> Self {
        Self {
            summarize_threshold: settings.summarize_threshold,
            keep_recent: settings.keep_recent,
            max_output_tokens: settings.summary_max_tokens,
        }
    }
}

pub fn select(
    log: &ConversationLog,
    budget: &Budget,
    estimator: &TokenEstimator,
    summarizer: &dyn Summarizer,
    config: &SummarizationConfig,
    cancel: &CancellationToken,
) -> Result<Selection, SelectionError> {
    let items = log.items();
    let mut sizer = Sizer::new(estimator);
    let available = budget.available_tokens();

    if items.len() <= config.summarize_threshold {
        let segments = items.iter().map(|item| sizer.original(item)).collect();
        return Ok(sizer.finish(segments, available));
    }

    let pins = Pins::resolve(budget, items);
    let keep_recent = config.keep_recent.max(budget.pin_last_n);
    let recent_start = items.len().saturating_sub(keep_recent).max(pins.prefix());
    let old = &items[pins.prefix()..recent_start];

    if old.is_empty() {
        let segments = items.iter().map(|item| sizer.original(item)).collect();
        return Ok(sizer.finish(segments, available));
    }

    let result = call_collaborator(CollaboratorKind::Summarizer, cancel, || {
        summarizer.summarize(old, config.max_output_tokens, cancel)
    });

    match result {
        Ok(summary) => {
            let replaces = ItemId::new(pins.prefix() as u64)..ItemId::new(recent_start as u64);
            tracing::debug!(
                summarized = old.len(),
                kept_recent = items.len() - recent_start,
                "Replaced older items with a summary"
            );
            let mut segments: Vec<_> = items[..pins.prefix()]
                .iter()
                .map(|item| sizer.original(item))
                .collect();
            segments.push(sizer.synthetic(SyntheticKind::Summary, summary, replaces));
            segments.extend(items[recent_start..].iter().map(|item| sizer.original(item)));
            Ok(sizer.finish(segments, available))
        }
        Err(err) => {
            tracing::warn!(error = %err, "Summarization failed; falling back to truncation");
            Ok(truncation::select(log, budget, estimator)?
                .with_fallback(Fallback::Truncation { cause: err }))
        }
    }
}
