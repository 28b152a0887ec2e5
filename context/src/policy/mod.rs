//! Retention policies.
//!
//! Each policy depends only on the log, the estimator and its collaborators.
//! The hybrid composer layers the others.

pub mod compaction;
pub mod hybrid;
pub mod retrieval;
pub mod selective;
pub mod sliding_window;
pub mod summarization;
pub mod truncation;

pub use hybrid::{HybridConfig, SpanReducer, placeholder_text};
pub use retrieval::{RetrievalAugmented, cosine_similarity, rank_candidates};
pub use selective::{DefaultRetention, RetentionPredicate};
pub use sliding_window::SlidingWindow;
pub use summarization::SummarizationConfig;
pub use truncation::enforce_budget;
