use std::ops::Range;

use thiserror::Error;

use ctxbudget_types::ItemId;

use crate::collaborators::{CollaboratorError, CollaboratorKind};

/// Failure of a selection or compaction call.
///
/// The log is never modified when one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectionError {
    /// Pinned items alone do not fit. Never resolved by dropping pinned items.
    #[error(
        "pinned items need {required} tokens but only {available} are available ({pinned_items} pinned)"
    )]
    BudgetExceeded {
        required: u32,
        available: u32,
        pinned_items: usize,
    },
    #[error("{kind} unavailable: {reason}")]
    CollaboratorUnavailable {
        kind: CollaboratorKind,
        reason: String,
    },
    /// The embedder failed and retrieval has no safe fallback.
    #[error("retrieval unavailable")]
    RetrievalUnavailable(#[source] CollaboratorError),
    #[error("{kind} call canceled")]
    Canceled { kind: CollaboratorKind },
    #[error("invalid item range {}..{} for a log of {len} items", .range.start, .range.end)]
    InvalidRange { range: Range<ItemId>, len: usize },
}

impl From<CollaboratorError> for SelectionError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Unavailable { kind, reason } => {
                Self::CollaboratorUnavailable { kind, reason }
            }
            CollaboratorError::Canceled { kind } => Self::Canceled { kind },
        }
    }
}
