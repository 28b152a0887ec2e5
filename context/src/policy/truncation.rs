//! Token-budget truncation.
//!
//! Pinned items are mandatory. The rest are scanned most-recent first and kept
//! whole while they fit; the scan stops at the first item that would overflow,
//! so recency always wins over fill. Output keeps the original order.

use ctxbudget_types::Budget;

use crate::error::SelectionError;
use crate::log::{ConversationLog, Pins};
use crate::selection::{ContextSegment, Selection, Sizer};
use crate::token_counter::TokenEstimator;

/// A segment offered to truncation, in original order.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub(crate) segment: ContextSegment,
    pub(crate) pinned: bool,
}

impl Candidate {
    pub(crate) fn new(segment: ContextSegment, pinned: bool) -> Self {
        Self { segment, pinned }
    }
}

pub(crate) fn truncate(
    candidates: Vec<Candidate>,
    available: u32,
) -> Result<Vec<ContextSegment>, SelectionError> {
    let (pinned_tokens, pinned_items) = candidates
        .iter()
        .filter(|c| c.pinned)
        .fold((0u64, 0usize), |(tokens, count), c| {
            (tokens + u64::from(c.segment.tokens()), count + 1)
        });

    if pinned_tokens > u64::from(available) {
        return Err(SelectionError::BudgetExceeded {
            required: u32::try_from(pinned_tokens).unwrap_or(u32::MAX),
            available,
            pinned_items,
        });
    }

    let mut remaining = u64::from(available) - pinned_tokens;
    let mut keep: Vec<bool> = candidates.iter().map(|c| c.pinned).collect();
    for (index, candidate) in candidates.iter().enumerate().rev() {
        if candidate.pinned {
            continue;
        }
        let cost = u64::from(candidate.segment.tokens());
        if cost > remaining {
            tracing::debug!(
                dropped_from = index,
                remaining,
                "Truncation stopped at first overflowing item"
            );
            break;
        }
        remaining -= cost;
        keep[index] = true;
    }

    Ok(candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(candidate, keep)| keep.then_some(candidate.segment))
        .collect())
}

/// Truncate the whole log to the budget.
pub fn select(
    log: &ConversationLog,
    budget: &Budget,
    estimator: &TokenEstimator,
) -> Result<Selection, SelectionError> {
    let items = log.items();
    let pins = Pins::resolve(budget, items);
    let mut sizer = Sizer::new(estimator);
    let candidates = items
        .iter()
        .enumerate()
        .map(|(index, item)| Candidate::new(sizer.original(item), pins.is_pinned(index)))
        .collect();

    let available = budget.available_tokens();
    let segments = truncate(candidates, available)?;
    Ok(sizer.finish(segments, available))
}

/// Apply truncation to another policy's output.
///
/// Filtering policies carry no token awareness; this layers a hard budget on
/// top of them. Original items pinned under `budget` stay mandatory, synthetic
/// segments compete like any unpinned item. An existing fallback is kept.
pub fn enforce_budget(
    selection: Selection,
    log: &ConversationLog,
    budget: &Budget,
) -> Result<Selection, SelectionError> {
    let pins = Pins::resolve(budget, log.items());
    let approximate = selection.is_approximate();
    let fallback = selection.fallback().cloned();

    let candidates = selection
        .into_segments()
        .into_iter()
        .map(|segment| {
            let pinned = segment
                .original_id()
                .is_some_and(|id| pins.is_pinned(id.index()));
            Candidate::new(segment, pinned)
        })
        .collect();

    let available = budget.available_tokens();
    let selection = Selection::new(truncate(candidates, available)?, available, approximate);
    Ok(match fallback {
        Some(fallback) => selection.with_fallback(fallback),
        None => selection,
    })
}
