//! Budgeted context selection over an append-only conversation log.
//!
//! This crate provides:
//! - The append-only conversation log and pin resolution
//! - Heuristic and exact (tiktoken or injected) token estimation
//! - Retention policies: sliding window, truncation, summarization, selective
//!   retention, retrieval, compaction and the hybrid composer
//! - Session persistence with validated loading
//!
//! # Architecture
//!
//! ```text
//! ContextEngine
//! ├── log: ConversationLog (append-only, never mutated)
//! ├── compactions: CompactionStore (side records keyed by covered range)
//! ├── estimator: TokenEstimator (heuristic or Tokenizer)
//! └── policy: PolicySettings
//!
//! Selection (per call, derived)
//! └── segments: Original { id } | Synthetic { summary | compaction | placeholder }
//! ```
//!
//! Summarizers, embedders, compactors and tokenizers are injected through the
//! traits in [`collaborators`]; the engine never implements them itself.

mod atomic_write;
pub mod collaborators;
mod compaction;
mod error;
mod log;
mod manager;
pub mod policy;
mod selection;
mod token_counter;

pub use collaborators::{
    CollaboratorError, CollaboratorKind, Compactor, Embedder, Summarizer, Tokenizer,
};
pub use compaction::{CompactionRecord, CompactionStore};
pub use error::SelectionError;
pub use log::{ConversationLog, Pins};
pub use manager::{ContextEngine, ContextUsageStatus};
pub use selection::{
    ContextSegment, ContextUsage, Fallback, Selection, SyntheticKind, UsageSeverity,
};
pub use token_counter::{TiktokenTokenizer, TokenEstimator};

pub use tokio_util::sync::CancellationToken;
