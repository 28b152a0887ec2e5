//! Selection - the budgeted projection every policy returns.
//!
//! A selection is a plan for what to send: original items referenced by id,
//! mixed with synthetic items (summaries, compactions, omission placeholders)
//! that stand in for ranges of the log. The log itself is never touched.

use std::ops::Range;

use serde::Serialize;

use ctxbudget_types::{ConversationItem, ItemBody, ItemId};

use crate::collaborators::CollaboratorError;
use crate::log::ConversationLog;
use crate::token_counter::TokenEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticKind {
    Summary,
    Compaction,
    Placeholder,
}

/// Represents a segment of a selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "segment", rename_all = "snake_case")]
pub enum ContextSegment {
    /// Use the original item from the log.
    Original { id: ItemId, tokens: u32 },
    /// Use a synthetic item instead of a range of original items.
    Synthetic {
        kind: SyntheticKind,
        body: ItemBody,
        /// Ids of the original items this stands in for.
        replaces: Range<ItemId>,
        tokens: u32,
    },
}

impl ContextSegment {
    #[must_use]
    pub fn original(id: ItemId, tokens: u32) -> Self {
        Self::Original { id, tokens }
    }

    #[must_use]
    pub fn synthetic(
        kind: SyntheticKind,
        body: ItemBody,
        replaces: Range<ItemId>,
        tokens: u32,
    ) -> Self {
        Self::Synthetic {
            kind,
            body,
            replaces,
            tokens,
        }
    }

    #[must_use]
    pub fn is_original(&self) -> bool {
        matches!(self, Self::Original { .. })
    }

    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic { .. })
    }

    #[must_use]
    pub fn original_id(&self) -> Option<ItemId> {
        match self {
            Self::Original { id, .. } => Some(*id),
            Self::Synthetic { .. } => None,
        }
    }

    /// Tokens attributed to this segment.
    #[must_use]
    pub fn tokens(&self) -> u32 {
        match self {
            Self::Original { tokens, .. } | Self::Synthetic { tokens, .. } => *tokens,
        }
    }
}

/// Why a policy degraded to a simpler strategy for this call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Fallback {
    /// The summarizer failed or was canceled; plain truncation was used.
    Truncation { cause: CollaboratorError },
    /// No stored compaction fit the budget; plain truncation was used.
    NoFittingCompaction,
    /// The middle span was replaced by an omission placeholder.
    Placeholder { cause: Option<CollaboratorError> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    segments: Vec<ContextSegment>,
    used_tokens: u32,
    available_tokens: u32,
    approximate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback: Option<Fallback>,
}

impl Selection {
    pub(crate) fn new(
        segments: Vec<ContextSegment>,
        available_tokens: u32,
        approximate: bool,
    ) -> Self {
        let used_tokens = segments
            .iter()
            .map(ContextSegment::tokens)
            .fold(0u32, u32::saturating_add);
        Self {
            segments,
            used_tokens,
            available_tokens,
            approximate,
            fallback: None,
        }
    }

    pub(crate) fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub(crate) fn into_segments(self) -> Vec<ContextSegment> {
        self.segments
    }

    #[must_use]
    pub fn segments(&self) -> &[ContextSegment] {
        &self.segments
    }

    #[must_use]
    pub fn used_tokens(&self) -> u32 {
        self.used_tokens
    }

    /// Budget this selection was built against (`max_tokens - reserve_for_output`).
    #[must_use]
    pub fn available_tokens(&self) -> u32 {
        self.available_tokens
    }

    #[must_use]
    pub fn remaining_tokens(&self) -> u32 {
        self.available_tokens.saturating_sub(self.used_tokens)
    }

    /// Filtering policies have no token awareness and may overshoot.
    #[must_use]
    pub fn fits_budget(&self) -> bool {
        self.used_tokens <= self.available_tokens
    }

    /// True when an exact tokenizer failed and a heuristic estimate was used.
    #[must_use]
    pub fn is_approximate(&self) -> bool {
        self.approximate
    }

    #[must_use]
    pub fn fallback(&self) -> Option<&Fallback> {
        self.fallback.as_ref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Ids of surviving original items, in order.
    #[must_use]
    pub fn original_ids(&self) -> Vec<ItemId> {
        self.segments
            .iter()
            .filter_map(ContextSegment::original_id)
            .collect()
    }

    #[must_use]
    pub fn synthetic_count(&self) -> usize {
        self.segments.iter().filter(|s| s.is_synthetic()).count()
    }

    /// Materialize into the item bodies to send, in order.
    pub fn materialize(&self, log: &ConversationLog) -> Vec<ItemBody> {
        let mut bodies = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                ContextSegment::Original { id, .. } => match log.get(*id) {
                    Some(item) => bodies.push(item.body().clone()),
                    None => tracing::warn!(%id, "Selection references an item missing from the log"),
                },
                ContextSegment::Synthetic { body, .. } => bodies.push(body.clone()),
            }
        }
        bodies
    }

    #[must_use]
    pub fn usage(&self) -> ContextUsage {
        ContextUsage::from_selection(self)
    }
}

/// Sizes segments and remembers whether any estimate was degraded.
pub(crate) struct Sizer<'a> {
    estimator: &'a TokenEstimator,
    approximate: bool,
}

impl<'a> Sizer<'a> {
    pub(crate) fn new(estimator: &'a TokenEstimator) -> Self {
        Self {
            estimator,
            approximate: false,
        }
    }

    pub(crate) fn original(&mut self, item: &ConversationItem) -> ContextSegment {
        let estimate = self.estimator.estimate_item(item);
        self.approximate |= estimate.approximate;
        ContextSegment::original(item.id(), estimate.tokens)
    }

    pub(crate) fn synthetic(
        &mut self,
        kind: SyntheticKind,
        body: ItemBody,
        replaces: Range<ItemId>,
    ) -> ContextSegment {
        let estimate = self.estimator.estimate_body(&body);
        self.approximate |= estimate.approximate;
        ContextSegment::synthetic(kind, body, replaces, estimate.tokens)
    }

    pub(crate) fn finish(&self, segments: Vec<ContextSegment>, available_tokens: u32) -> Selection {
        Selection::new(segments, available_tokens, self.approximate)
    }
}

/// How close a selection is to its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSeverity {
    /// At or below 70%.
    Normal,
    /// Above 70%, at or below 90%.
    Elevated,
    /// Above 90%.
    Critical,
}

/// Token usage of a selection against its budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextUsage {
    pub used_tokens: u32,
    pub budget_tokens: u32,
    pub synthetic_segments: usize,
}

fn compact_count(n: u32) -> String {
    match n {
        1_000_000.. => format!("{:.1}M", f64::from(n) / 1_000_000.0),
        1_000.. => format!("{:.1}k", f64::from(n) / 1_000.0),
        _ => n.to_string(),
    }
}

impl ContextUsage {
    #[must_use]
    pub fn from_selection(selection: &Selection) -> Self {
        Self {
            used_tokens: selection.used_tokens(),
            budget_tokens: selection.available_tokens(),
            synthetic_segments: selection.synthetic_count(),
        }
    }

    /// Percentage of the budget in use; 0.0 for an empty budget.
    #[must_use]
    pub fn percentage(&self) -> f32 {
        match self.budget_tokens {
            0 => 0.0,
            budget => self.used_tokens as f32 * 100.0 / budget as f32,
        }
    }

    /// One-line summary, e.g. `2.1k / 200.0k (1%)` or
    /// `50.0k / 200.0k (25%) +2 synthetic`.
    #[must_use]
    pub fn format_compact(&self) -> String {
        let line = format!(
            "{} / {} ({:.0}%)",
            compact_count(self.used_tokens),
            compact_count(self.budget_tokens),
            self.percentage()
        );
        match self.synthetic_segments {
            0 => line,
            n => format!("{line} +{n} synthetic"),
        }
    }

    #[must_use]
    pub fn severity(&self) -> UsageSeverity {
        match self.percentage() {
            pct if pct > 90.0 => UsageSeverity::Critical,
            pct if pct > 70.0 => UsageSeverity::Elevated,
            _ => UsageSeverity::Normal,
        }
    }

    /// Whether usage is past `threshold` (a fraction, e.g. `0.8`) of the budget.
    #[must_use]
    pub fn needs_cleanup(&self, threshold: f32) -> bool {
        self.budget_tokens > 0 && self.used_tokens as f32 > self.budget_tokens as f32 * threshold
    }
}
