//! Context engine - owns one conversation's log and runs the policies over it.

use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use ctxbudget_types::{Budget, ItemBody, ItemId, PolicySettings};

use crate::atomic_write::{AtomicWriteOptions, atomic_write_with_options};
use crate::collaborators::{Compactor, Embedder, Summarizer};
use crate::compaction::{CompactionRecord, CompactionStore};
use crate::error::SelectionError;
use crate::log::ConversationLog;
use crate::policy::{
    self, DefaultRetention, HybridConfig, RetentionPredicate, RetrievalAugmented, SlidingWindow,
    SpanReducer, SummarizationConfig,
};
use crate::selection::{ContextUsage, Selection};
use crate::token_counter::TokenEstimator;

/// Whether the whole log fits a budget.
///
/// Returned by [`ContextEngine::usage`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContextUsageStatus {
    /// The whole log fits.
    Ready(ContextUsage),
    /// The log exceeds the budget; a reducing policy is needed.
    NeedsReduction { usage: ContextUsage },
    /// Pinned items alone exceed the budget; unrecoverable without a larger
    /// budget or fewer pins.
    PinnedTooLarge {
        usage: ContextUsage,
        required_tokens: u32,
        budget_tokens: u32,
    },
}

impl ContextUsageStatus {
    #[must_use]
    pub fn usage(&self) -> &ContextUsage {
        match self {
            Self::Ready(usage)
            | Self::NeedsReduction { usage }
            | Self::PinnedTooLarge { usage, .. } => usage,
        }
    }
}

/// On-disk shape of a session.
#[derive(Deserialize)]
struct SessionSnapshot {
    log: ConversationLog,
    #[serde(default)]
    compactions: CompactionStore,
}

#[derive(Serialize)]
struct SessionSnapshotRef<'a> {
    log: &'a ConversationLog,
    compactions: &'a CompactionStore,
}

impl SessionSnapshot {
    fn validate(&self) -> Result<()> {
        let len = self.log.len() as u64;
        for record in self.compactions.records() {
            let covers = record.covers();
            if covers.end.value() > len {
                bail!(
                    "compaction record {}..{} reaches past the log ({len} items)",
                    covers.start,
                    covers.end
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ContextEngine {
    log: ConversationLog,
    compactions: CompactionStore,
    estimator: TokenEstimator,
    policy: PolicySettings,
}

impl ContextEngine {
    #[must_use]
    pub fn new(estimator: TokenEstimator, policy: PolicySettings) -> Self {
        Self {
            log: ConversationLog::new(),
            compactions: CompactionStore::new(),
            estimator,
            policy,
        }
    }

    pub fn append(&mut self, body: ItemBody) -> ItemId {
        self.log.append(body)
    }

    #[must_use]
    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    #[must_use]
    pub fn compactions(&self) -> &CompactionStore {
        &self.compactions
    }

    #[must_use]
    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    #[must_use]
    pub fn policy(&self) -> &PolicySettings {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: PolicySettings) {
        self.policy = policy;
    }

    pub fn truncate(&self, budget: &Budget) -> Result<Selection, SelectionError> {
        policy::truncation::select(&self.log, budget, &self.estimator)
    }

    #[must_use]
    pub fn sliding_window(&self, budget: &Budget) -> Selection {
        SlidingWindow::new(self.policy.sliding_window_max_items).select(
            &self.log,
            budget,
            &self.estimator,
        )
    }

    pub fn summarize(
        &self,
        budget: &Budget,
        summarizer: &dyn Summarizer,
        cancel: &CancellationToken,
    ) -> Result<Selection, SelectionError> {
        policy::summarization::select(
            &self.log,
            budget,
            &self.estimator,
            summarizer,
            &SummarizationConfig::from(&self.policy),
            cancel,
        )
    }

    #[must_use]
    pub fn selective(&self, budget: &Budget, predicate: &dyn RetentionPredicate) -> Selection {
        policy::selective::select(&self.log, budget, &self.estimator, predicate)
    }

    /// Selective retention with [`DefaultRetention`].
    #[must_use]
    pub fn selective_default(&self, budget: &Budget) -> Selection {
        self.selective(budget, &DefaultRetention::for_budget(budget))
    }

    pub fn retrieve(
        &self,
        query: &str,
        budget: &Budget,
        embedder: &dyn Embedder,
        cancel: &CancellationToken,
    ) -> Result<Selection, SelectionError> {
        RetrievalAugmented::from(&self.policy).select(
            &self.log,
            query,
            budget,
            &self.estimator,
            embedder,
            cancel,
        )
    }

    /// Compact a range and keep the record. The log is unchanged.
    pub fn compact(
        &mut self,
        range: Range<ItemId>,
        compactor: &dyn Compactor,
        cancel: &CancellationToken,
    ) -> Result<CompactionRecord, SelectionError> {
        policy::compaction::compact(&self.log, &mut self.compactions, range, compactor, cancel)
    }

    pub fn select_with_compaction(&self, budget: &Budget) -> Result<Selection, SelectionError> {
        policy::compaction::select_with_compaction(
            &self.log,
            &self.compactions,
            budget,
            &self.estimator,
        )
    }

    /// Hybrid pipeline. Fresh compactions made along the way are kept.
    pub fn hybrid(
        &mut self,
        budget: &Budget,
        reducer: SpanReducer<'_>,
        cancel: &CancellationToken,
    ) -> Result<Selection, SelectionError> {
        let config = HybridConfig::new(&self.policy, reducer);
        policy::hybrid::select(
            &self.log,
            &mut self.compactions,
            budget,
            &self.estimator,
            &config,
            cancel,
        )
    }

    /// Cap another policy's output at the budget.
    pub fn enforce_budget(
        &self,
        selection: Selection,
        budget: &Budget,
    ) -> Result<Selection, SelectionError> {
        policy::enforce_budget(selection, &self.log, budget)
    }

    #[must_use]
    pub fn usage(&self, budget: &Budget) -> ContextUsageStatus {
        let used_tokens = self
            .log
            .items()
            .iter()
            .map(|item| self.estimator.estimate_item(item).tokens)
            .fold(0u32, u32::saturating_add);
        let usage = ContextUsage {
            used_tokens,
            budget_tokens: budget.available_tokens(),
            synthetic_segments: 0,
        };

        if used_tokens <= usage.budget_tokens {
            return ContextUsageStatus::Ready(usage);
        }

        match self.truncate(budget) {
            Err(SelectionError::BudgetExceeded {
                required,
                available,
                ..
            }) => ContextUsageStatus::PinnedTooLarge {
                usage,
                required_tokens: required,
                budget_tokens: available,
            },
            _ => ContextUsageStatus::NeedsReduction { usage },
        }
    }

    /// Save the log and compaction records to a JSON file.
    ///
    /// Uses atomic write pattern: write to temp file, then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = SessionSnapshotRef {
            log: &self.log,
            compactions: &self.compactions,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        atomic_write_with_options(
            path,
            json.as_bytes(),
            AtomicWriteOptions {
                sync_all: true,
                dir_sync: true,
                unix_mode: Some(0o600),
            },
        )
        .with_context(|| format!("failed to write session {}", path.display()))?;
        Ok(())
    }

    /// Load a session saved by [`save`](Self::save).
    pub fn load(
        path: impl AsRef<Path>,
        estimator: TokenEstimator,
        policy: PolicySettings,
    ) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session {}", path.display()))?;
        let snapshot: SessionSnapshot = serde_json::from_str(&json)
            .with_context(|| format!("invalid session file {}", path.display()))?;
        snapshot.validate()?;

        tracing::debug!(
            items = snapshot.log.len(),
            compactions = snapshot.compactions.len(),
            path = %path.display(),
            "Loaded session"
        );

        Ok(Self {
            log: snapshot.log,
            compactions: snapshot.compactions,
            estimator,
            policy,
        })
    }
}
