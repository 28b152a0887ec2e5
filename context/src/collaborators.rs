//! Injected collaborator interfaces.
//!
//! The engine never tokenizes, summarizes, embeds or compacts on its own. Each
//! capability is a trait object supplied by the caller, and every potentially
//! slow call receives a [`CancellationToken`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use ctxbudget_types::{ConversationItem, ItemBody};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorKind {
    Tokenizer,
    Summarizer,
    Embedder,
    Compactor,
}

impl CollaboratorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CollaboratorKind::Tokenizer => "tokenizer",
            CollaboratorKind::Summarizer => "summarizer",
            CollaboratorKind::Embedder => "embedder",
            CollaboratorKind::Compactor => "compactor",
        }
    }
}

impl fmt::Display for CollaboratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum CollaboratorError {
    #[error("{kind} unavailable: {reason}")]
    Unavailable {
        kind: CollaboratorKind,
        reason: String,
    },
    #[error("{kind} call canceled")]
    Canceled { kind: CollaboratorKind },
}

impl CollaboratorError {
    pub fn unavailable(kind: CollaboratorKind, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            kind,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> CollaboratorKind {
        match self {
            Self::Unavailable { kind, .. } | Self::Canceled { kind } => *kind,
        }
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }
}

/// Exact token counting.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> Result<u32, CollaboratorError>;
}

/// Produces one item standing in for a run of older items.
pub trait Summarizer: Send + Sync {
    fn summarize(
        &self,
        items: &[ConversationItem],
        max_output_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<ItemBody, CollaboratorError>;
}

/// Fixed-length real vectors for relevance scoring.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>, CollaboratorError>;
}

/// Opaque compaction of a contiguous item range. The compression ratio is
/// entirely the compactor's business.
pub trait Compactor: Send + Sync {
    fn compact(
        &self,
        items: &[ConversationItem],
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, CollaboratorError>;
}

/// Run a collaborator call, observing cancellation before and after it.
///
/// A result that arrives after the token was canceled is discarded.
pub(crate) fn call_collaborator<T>(
    kind: CollaboratorKind,
    cancel: &CancellationToken,
    call: impl FnOnce() -> Result<T, CollaboratorError>,
) -> Result<T, CollaboratorError> {
    if cancel.is_cancelled() {
        return Err(CollaboratorError::Canceled { kind });
    }
    let result = call();
    if cancel.is_cancelled() {
        tracing::debug!(%kind, "Collaborator result discarded after cancellation");
        return Err(CollaboratorError::Canceled { kind });
    }
    result
}
