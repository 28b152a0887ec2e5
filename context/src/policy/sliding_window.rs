//! Sliding window: a cardinality bound with no token awareness.

use ctxbudget_types::Budget;

use crate::log::{ConversationLog, Pins};
use crate::selection::{Selection, Sizer};
use crate::token_counter::TokenEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindow {
    max_items: usize,
}

impl SlidingWindow {
    /// `max_items` is clamped to at least one so the most recent unpinned item
    /// always survives.
    #[must_use]
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items: max_items.max(1),
        }
    }

    #[must_use]
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Pinned prefix, the `max_items` most recent unpinned items, pinned suffix.
    ///
    /// Items are never split. Token counts are reported but not enforced; wrap
    /// with [`enforce_budget`](super::truncation::enforce_budget) for a hard cap.
    #[must_use]
    pub fn select(
        &self,
        log: &ConversationLog,
        budget: &Budget,
        estimator: &TokenEstimator,
    ) -> Selection {
        let items = log.items();
        let pins = Pins::resolve(budget, items);
        let unpinned = pins.unpinned();
        let window_start = unpinned.end.saturating_sub(self.max_items).max(unpinned.start);

        let mut sizer = Sizer::new(estimator);
        let segments = items
            .iter()
            .enumerate()
            .filter(|(index, _)| pins.is_pinned(*index) || *index >= window_start)
            .map(|(_, item)| sizer.original(item))
            .collect();

        tracing::debug!(
            kept_unpinned = unpinned.end - window_start,
            pinned = pins.count(),
            "Sliding window selection"
        );
        sizer.finish(segments, budget.available_tokens())
    }
}
