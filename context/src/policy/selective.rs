//! Selective retention: an order-preserving filter.
//!
//! Filtering and budgeting are separate layers. Compose with
//! [`enforce_budget`](super::truncation::enforce_budget) for a hard cap.

use ctxbudget_types::{Budget, ConversationItem, Role};

use crate::log::{ConversationLog, Pins};
use crate::selection::{Selection, Sizer};
use crate::token_counter::TokenEstimator;

/// Decides whether an unpinned item survives.
pub trait RetentionPredicate {
    fn retain(&self, item: &ConversationItem, index: usize, log: &ConversationLog) -> bool;
}

impl<F> RetentionPredicate for F
where
    F: Fn(&ConversationItem, usize, &ConversationLog) -> bool,
{
    fn retain(&self, item: &ConversationItem, index: usize, log: &ConversationLog) -> bool {
        self(item, index, log)
    }
}

/// Keeps the first `pin_first_n` items, user turns, important items and tool results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultRetention {
    pub pin_first_n: usize,
}

impl DefaultRetention {
    #[must_use]
    pub fn for_budget(budget: &Budget) -> Self {
        Self {
            pin_first_n: budget.pin_first_n,
        }
    }
}

impl RetentionPredicate for DefaultRetention {
    fn retain(&self, item: &ConversationItem, index: usize, _log: &ConversationLog) -> bool {
        index < self.pin_first_n
            || item.role() == Role::User
            || item.body().is_important()
            || item.body().has_tool_result_marker()
    }
}

/// Pinned items always survive regardless of the predicate.
pub fn select(
    log: &ConversationLog,
    budget: &Budget,
    estimator: &TokenEstimator,
    predicate: &dyn RetentionPredicate,
) -> Selection {
    let items = log.items();
    let pins = Pins::resolve(budget, items);
    let mut sizer = Sizer::new(estimator);
    let segments: Vec<_> = items
        .iter()
        .enumerate()
        .filter(|(index, item)| pins.is_pinned(*index) || predicate.retain(item, *index, log))
        .map(|(_, item)| sizer.original(item))
        .collect();

    tracing::debug!(
        kept = segments.len(),
        dropped = items.len() - segments.len(),
        "Selective retention"
    );
    sizer.finish(segments, budget.available_tokens())
}
