//! Shared test utilities and fixtures
//!
//! Logs sized in heuristic tokens and deterministic fake collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use ctxbudget_context::{
    CancellationToken, CollaboratorError, CollaboratorKind, Compactor, ContextEngine,
    ConversationLog, Embedder, Summarizer, TokenEstimator,
};
use ctxbudget_types::{ConversationItem, ItemBody, PolicySettings, Role};

/// Text estimated at exactly `tokens` under the default 4 chars/token heuristic.
pub fn text_of_tokens(tokens: usize) -> String {
    "a".repeat(tokens * 4)
}

fn alternating_role(index: usize) -> Role {
    if index % 2 == 0 {
        Role::User
    } else {
        Role::Assistant
    }
}

/// Log of `n` user/assistant items, each estimated at `tokens_each`.
pub fn uniform_log(n: usize, tokens_each: usize) -> ConversationLog {
    sized_log(&vec![tokens_each; n])
}

/// Log whose items are estimated at the given token counts.
pub fn sized_log(sizes: &[usize]) -> ConversationLog {
    let mut log = ConversationLog::new();
    for (index, tokens) in sizes.iter().enumerate() {
        log.append(ItemBody::text(alternating_role(index), text_of_tokens(*tokens)));
    }
    log
}

/// Engine with the default heuristic estimator.
pub fn engine_with(sizes: &[usize], policy: PolicySettings) -> ContextEngine {
    let mut engine = ContextEngine::new(TokenEstimator::default(), policy);
    for (index, tokens) in sizes.iter().enumerate() {
        engine.append(ItemBody::text(alternating_role(index), text_of_tokens(*tokens)));
    }
    engine
}

pub fn ids(values: &[u64]) -> Vec<ctxbudget_types::ItemId> {
    values.iter().copied().map(ctxbudget_types::ItemId::new).collect()
}

/// Summarizer that always answers with a short fixed summary.
#[derive(Default)]
pub struct FixedSummarizer {
    pub calls: AtomicUsize,
}

impl FixedSummarizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Summarizer for FixedSummarizer {
    fn summarize(
        &self,
        items: &[ConversationItem],
        _max_output_tokens: u32,
        _cancel: &CancellationToken,
    ) -> Result<ItemBody, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ItemBody::text(
            Role::System,
            format!("summary of {} items", items.len()),
        ))
    }
}

pub struct FailingSummarizer;

impl Summarizer for FailingSummarizer {
    fn summarize(
        &self,
        _items: &[ConversationItem],
        _max_output_tokens: u32,
        _cancel: &CancellationToken,
    ) -> Result<ItemBody, CollaboratorError> {
        Err(CollaboratorError::unavailable(
            CollaboratorKind::Summarizer,
            "summarization failed",
        ))
    }
}

/// Embeds known texts as unit vectors whose cosine with the query is the
/// configured score. Unknown texts are orthogonal to the query.
#[derive(Default)]
pub struct ScoreEmbedder {
    pub query: String,
    pub scores: HashMap<String, f32>,
}

impl ScoreEmbedder {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            scores: HashMap::new(),
        }
    }

    pub fn score(mut self, text: &str, score: f32) -> Self {
        self.scores.insert(text.to_string(), score);
        self
    }
}

impl Embedder for ScoreEmbedder {
    fn embed(&self, text: &str, _cancel: &CancellationToken) -> Result<Vec<f32>, CollaboratorError> {
        if text == self.query {
            return Ok(vec![1.0, 0.0]);
        }
        let score = self.scores.get(text).copied().unwrap_or(0.0);
        Ok(vec![score, (1.0 - score * score).max(0.0).sqrt()])
    }
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _text: &str, _cancel: &CancellationToken) -> Result<Vec<f32>, CollaboratorError> {
        Err(CollaboratorError::unavailable(
            CollaboratorKind::Embedder,
            "embedding service down",
        ))
    }
}

/// Compacts any range into `{"items": n}`.
#[derive(Default)]
pub struct CountingCompactor {
    pub calls: AtomicUsize,
}

impl CountingCompactor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Compactor for CountingCompactor {
    fn compact(
        &self,
        items: &[ConversationItem],
        _cancel: &CancellationToken,
    ) -> Result<serde_json::Value, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "items": items.len() }))
    }
}

pub struct FailingCompactor;

impl Compactor for FailingCompactor {
    fn compact(
        &self,
        _items: &[ConversationItem],
        _cancel: &CancellationToken,
    ) -> Result<serde_json::Value, CollaboratorError> {
        Err(CollaboratorError::unavailable(
            CollaboratorKind::Compactor,
            "compaction failed",
        ))
    }
}
