//! Retrieval-augmented selection.
//!
//! The `k_recent` newest items are always kept. Older unpinned items are
//! scored against the query by cosine similarity of their embeddings and the
//! best `max_candidates` are added. The embedding itself is a black box; the
//! selection given scores is [`RetrievalAugmented::select_scored`].

use tokio_util::sync::CancellationToken;

use ctxbudget_types::{Budget, PolicySettings};

use crate::collaborators::{CollaboratorError, CollaboratorKind, Embedder, call_collaborator};
use crate::error::SelectionError;
use crate::log::{ConversationLog, Pins};
use crate::selection::{Selection, Sizer};
use crate::token_counter::TokenEstimator;

/// Cosine similarity between two vectors.
///
/// Mismatched lengths and zero vectors score 0.0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Indices of the `max` best candidates by descending score. Ties go to the
/// higher (more recent) index.
#[must_use]
pub fn rank_candidates(scored: &[(usize, f64)], max: usize) -> Vec<usize> {
    let mut ranked = scored.to_vec();
    ranked.sort_by(|(ia, sa), (ib, sb)| sb.total_cmp(sa).then_with(|| ib.cmp(ia)));
    ranked.into_iter().take(max).map(|(index, _)| index).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalAugmented {
    pub k_recent: usize,
    pub max_candidates: usize,
}

impl Default for RetrievalAugmented {
    fn default() -> Self {
        Self::from(&PolicySettings::default())
    }
}

impl From<&PolicySettings> for RetrievalAugmented {
    fn from(settings: &PolicySettings) -> Self {
        Self {
            k_recent: settings.k_recent,
            max_candidates: settings.max_candidates,
        }
    }
}

impl RetrievalAugmented {
    #[must_use]
    pub fn new(k_recent: usize, max_candidates: usize) -> Self {
        Self {
            k_recent,
            max_candidates,
        }
    }

    /// Indices eligible for scoring: unpinned and older than the recent window.
    #[must_use]
    pub fn candidates(&self, log: &ConversationLog, budget: &Budget) -> Vec<usize> {
        let pins = Pins::resolve(budget, log.items());
        let recent_start = log.len().saturating_sub(self.k_recent);
        pins.unpinned().filter(|index| *index < recent_start).collect()
    }

    pub fn select(
        &self,
        log: &ConversationLog,
        query: &str,
        budget: &Budget,
        estimator: &TokenEstimator,
        embedder: &dyn Embedder,
        cancel: &CancellationToken,
    ) -> Result<Selection, SelectionError> {
        let candidates = self.candidates(log, budget);
        if candidates.is_empty() || self.max_candidates == 0 {
            return Ok(self.select_scored(log, budget, estimator, &[]));
        }

        let embed = |text: &str| {
            call_collaborator(CollaboratorKind::Embedder, cancel, || {
                embedder.embed(text, cancel)
            })
            .map_err(retrieval_error)
        };

        let query_vector = embed(query)?;
        let mut scored = Vec::with_capacity(candidates.len());
        for index in candidates {
            let text = log.items()[index].body().plain_text();
            let score = cosine_similarity(&query_vector, &embed(&text)?);
            scored.push((index, score));
        }

        Ok(self.select_scored(log, budget, estimator, &scored))
    }

    /// Selection given precomputed `(index, score)` pairs.
    #[must_use]
    pub fn select_scored(
        &self,
        log: &ConversationLog,
        budget: &Budget,
        estimator: &TokenEstimator,
        scored: &[(usize, f64)],
    ) -> Selection {
        let items = log.items();
        let pins = Pins::resolve(budget, items);
        let recent_start = items.len().saturating_sub(self.k_recent);

        let mut keep: Vec<bool> = (0..items.len())
            .map(|index| index >= recent_start || pins.is_pinned(index))
            .collect();
        let top = rank_candidates(scored, self.max_candidates);
        for index in &top {
            if let Some(slot) = keep.get_mut(*index) {
                *slot = true;
            }
        }

        tracing::debug!(retrieved = ?top, recent = items.len() - recent_start, "Retrieval selection");

        let mut sizer = Sizer::new(estimator);
        let segments = items
            .iter()
            .zip(keep)
            .filter_map(|(item, keep)| keep.then(|| sizer.original(item)))
            .collect();
        sizer.finish(segments, budget.available_tokens())
    }
}

fn retrieval_error(err: CollaboratorError) -> SelectionError {
    match err {
        CollaboratorError::Canceled { kind } => SelectionError::Canceled { kind },
        err @ CollaboratorError::Unavailable { .. } => SelectionError::RetrievalUnavailable(err),
    }
}
