//! Hybrid composition.
//!
//! A fixed pipeline:
//!
//! 1. Resolve the pinned prefix and suffix.
//! 2. If the unpinned middle holds more than `max_messages_threshold` items,
//!    replace it with a stored record covering exactly that span, else a fresh
//!    compaction, else a summary, else an `[N items omitted]` placeholder. The
//!    placeholder is also used when the collaborator fails, so the omission is
//!    always visible in the output.
//! 3. Truncate the reduced sequence to the budget.

use std::ops::Range;

use tokio_util::sync::CancellationToken;

use ctxbudget_types::{Budget, ItemBody, ItemId, PolicySettings, Role};

use crate::collaborators::{
    CollaboratorError, CollaboratorKind, Compactor, Summarizer, call_collaborator,
};
use crate::compaction::{CompactionRecord, CompactionStore};
use crate::error::SelectionError;
use crate::log::{ConversationLog, Pins};
use crate::selection::{Fallback, Selection, Sizer, SyntheticKind};
use crate::token_counter::TokenEstimator;

use super::truncation::{self, Candidate};

/// How the unpinned middle span is reduced when no stored record covers it.
#[derive(Clone, Copy)]
pub enum SpanReducer<'a> {
    Compactor(&'a dyn Compactor),
    Summarizer {
        summarizer: &'a dyn Summarizer,
        max_output_tokens: u32,
    },
    /// Always use the omission placeholder.
    Omit,
}

impl std::fmt::Debug for SpanReducer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compactor(_) => f.write_str("Compactor(<dyn Compactor>)"),
            Self::Summarizer {
                max_output_tokens, ..
            } => f
                .debug_struct("Summarizer")
                .field("max_output_tokens", max_output_tokens)
                .finish_non_exhaustive(),
            Self::Omit => f.write_str("Omit"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HybridConfig<'a> {
    pub max_messages_threshold: usize,
    pub reducer: SpanReducer<'a>,
}

impl<'a> HybridConfig<'a> {
    #[must_use]
    pub fn new(settings: &PolicySettings, reducer: SpanReducer<'a>) -> Self {
        Self {
            max_messages_threshold: settings.max_messages_threshold,
            reducer,
        }
    }
}

/// The text of an omission placeholder.
#[must_use]
pub fn placeholder_text(omitted: usize) -> String {
    format!("[{omitted} items omitted]")
}

enum Reduction {
    Stored(ItemBody),
    Fresh(ItemBody, CompactionRecord),
    Summary(ItemBody),
    Placeholder(Option<CollaboratorError>),
}

fn reduce(
    log: &ConversationLog,
    store: &CompactionStore,
    span: &Range<ItemId>,
    reducer: SpanReducer<'_>,
    cancel: &CancellationToken,
) -> Reduction {
    if let Some(record) = store.get(span) {
        return Reduction::Stored(record.as_item_body());
    }

    let Some(items) = log.range_items(span) else {
        return Reduction::Placeholder(None);
    };

    match reducer {
        SpanReducer::Compactor(compactor) => {
            match call_collaborator(CollaboratorKind::Compactor, cancel, || {
                compactor.compact(items, cancel)
            }) {
                Ok(payload) => {
                    let record = CompactionRecord::new(span.clone(), log.next_sequence(), payload);
                    Reduction::Fresh(record.as_item_body(), record)
                }
                Err(err) => Reduction::Placeholder(Some(err)),
            }
        }
        SpanReducer::Summarizer {
            summarizer,
            max_output_tokens,
        } => match call_collaborator(CollaboratorKind::Summarizer, cancel, || {
            summarizer.summarize(items, max_output_tokens, cancel)
        }) {
            Ok(body) => Reduction::Summary(body),
            Err(err) => Reduction::Placeholder(Some(err)),
        },
        SpanReducer::Omit => Reduction::Placeholder(None),
    }
}

/// Run the hybrid pipeline. Fresh compactions are stored in `store`.
pub fn select(
    log: &ConversationLog,
    store: &mut CompactionStore,
    budget: &Budget,
    estimator: &TokenEstimator,
    config: &HybridConfig<'_>,
    cancel: &CancellationToken,
) -> Result<Selection, SelectionError> {
    let items = log.items();
    let pins = Pins::resolve(budget, items);
    let middle = pins.unpinned();
    let available = budget.available_tokens();

    if middle.len() <= config.max_messages_threshold {
        return truncation::select(log, budget, estimator);
    }

    let span = ItemId::new(middle.start as u64)..ItemId::new(middle.end as u64);
    let mut fallback = None;
    let (kind, body) = match reduce(log, store, &span, config.reducer, cancel) {
        Reduction::Stored(body) => (SyntheticKind::Compaction, body),
        Reduction::Fresh(body, record) => {
            store.insert(record);
            (SyntheticKind::Compaction, body)
        }
        Reduction::Summary(body) => (SyntheticKind::Summary, body),
        Reduction::Placeholder(cause) => {
            if let Some(err) = &cause {
                tracing::warn!(error = %err, "Span reduction failed; omitting middle items");
            }
            fallback = Some(Fallback::Placeholder { cause });
            (
                SyntheticKind::Placeholder,
                ItemBody::text(Role::System, placeholder_text(middle.len())),
            )
        }
    };

    tracing::debug!(
        ?kind,
        reduced = middle.len(),
        pinned = pins.count(),
        "Hybrid reduced the unpinned middle"
    );

    let mut sizer = Sizer::new(estimator);
    let mut candidates: Vec<_> = items[..middle.start]
        .iter()
        .map(|item| Candidate::new(sizer.original(item), true))
        .collect();
    candidates.push(Candidate::new(sizer.synthetic(kind, body, span), false));
    candidates.extend(
        items[middle.end..]
            .iter()
            .map(|item| Candidate::new(sizer.original(item), true)),
    );

    let selection = sizer.finish(truncation::truncate(candidates, available)?, available);
    Ok(match fallback {
        Some(fallback) => selection.with_fallback(fallback),
        None => selection,
    })
}
