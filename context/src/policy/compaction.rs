//! Compaction orchestration.
//!
//! [`compact`] produces a record for a range and stores it beside the log;
//! the log is never touched. [`select_with_compaction`] uses the widest stored
//! prefix record that makes the selection fit, otherwise it truncates.

use std::ops::Range;

use tokio_util::sync::CancellationToken;

use ctxbudget_types::{Budget, ItemId};

use crate::collaborators::{CollaboratorKind, Compactor, call_collaborator};
use crate::compaction::{CompactionRecord, CompactionStore};
use crate::error::SelectionError;
use crate::log::{ConversationLog, Pins};
use crate::selection::{Fallback, Selection, Sizer, SyntheticKind};
use crate::token_counter::TokenEstimator;

use super::truncation;

/// Compact `range` and store the resulting record.
///
/// Fails with `InvalidRange` for an empty range or one reaching past the log.
/// Collaborator failures are surfaced unchanged; nothing is stored then.
pub fn compact(
    log: &ConversationLog,
    store: &mut CompactionStore,
    range: Range<ItemId>,
    compactor: &dyn Compactor,
    cancel: &CancellationToken,
) -> Result<CompactionRecord, SelectionError> {
    let items = log
        .range_items(&range)
        .ok_or_else(|| SelectionError::InvalidRange {
            range: range.clone(),
            len: log.len(),
        })?;

    let payload = call_collaborator(CollaboratorKind::Compactor, cancel, || {
        compactor.compact(items, cancel)
    })?;

    let record = CompactionRecord::new(range, log.next_sequence(), payload);
    tracing::debug!(
        start = %record.covers().start,
        end = %record.covers().end,
        items = record.source_item_count(),
        "Stored compaction record"
    );
    if store.insert(record.clone()).is_some() {
        tracing::debug!("Replaced an earlier record for the same range");
    }
    Ok(record)
}

pub fn select_with_compaction(
    log: &ConversationLog,
    store: &CompactionStore,
    budget: &Budget,
    estimator: &TokenEstimator,
) -> Result<Selection, SelectionError> {
    let items = log.items();
    let pins = Pins::resolve(budget, items);
    let available = budget.available_tokens();
    let first_unpinned = ItemId::new(pins.prefix() as u64);
    let suffix_start = ItemId::new(pins.suffix_start() as u64);

    let mut sizer = Sizer::new(estimator);
    for record in store.prefix_candidates(first_unpinned, suffix_start) {
        let mut segments: Vec<_> = items[..pins.prefix()]
            .iter()
            .map(|item| sizer.original(item))
            .collect();
        segments.push(sizer.synthetic(
            SyntheticKind::Compaction,
            record.as_item_body(),
            record.covers().clone(),
        ));
        segments.extend(
            items[record.covers().end.index()..]
                .iter()
                .map(|item| sizer.original(item)),
        );

        let selection = sizer.finish(segments, available);
        if selection.fits_budget() {
            tracing::debug!(
                start = %record.covers().start,
                end = %record.covers().end,
                used = selection.used_tokens(),
                "Selected with compaction record"
            );
            return Ok(selection);
        }
    }

    tracing::debug!("No compaction record fits; truncating");
    Ok(truncation::select(log, budget, estimator)?.with_fallback(Fallback::NoFittingCompaction))
}
