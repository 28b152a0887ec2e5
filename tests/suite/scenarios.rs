//! End-to-end policy scenarios over a `ContextEngine`.

use ctxbudget_context::policy::{SpanReducer, placeholder_text};
use ctxbudget_context::{
    CancellationToken, ContextEngine, ContextUsageStatus, Fallback, SelectionError, TokenEstimator,
};
use ctxbudget_types::{Budget, ItemBody, ItemId, PolicySettings, Role};

use crate::common::{
    CountingCompactor, FailingCompactor, FailingEmbedder, FailingSummarizer, FixedSummarizer,
    ScoreEmbedder, engine_with, ids,
};

#[test]
fn truncation_keeps_pinned_head_and_newest_tail() {
    let engine = engine_with(&[100; 12], PolicySettings::default());
    let budget = Budget::new(450).with_reserve(50).with_pin_first(1);

    let selection = engine.truncate(&budget).unwrap();

    assert_eq!(selection.original_ids(), ids(&[0, 9, 10, 11]));
    assert_eq!(selection.used_tokens(), 400);
    assert_eq!(selection.available_tokens(), 400);
    assert!(selection.fits_budget());
}

#[test]
fn failed_summary_equals_direct_truncation() {
    let policy = PolicySettings {
        summarize_threshold: 5,
        keep_recent: 3,
        ..PolicySettings::default()
    };
    let engine = engine_with(&[100; 8], policy);
    let budget = Budget::new(450).with_pin_first(1);
    let cancel = CancellationToken::new();

    let summarized = engine
        .summarize(&budget, &FailingSummarizer, &cancel)
        .unwrap();
    let direct = engine.truncate(&budget).unwrap();

    assert_eq!(summarized.segments(), direct.segments());
    assert_eq!(summarized.used_tokens(), direct.used_tokens());
    assert!(matches!(
        summarized.fallback(),
        Some(Fallback::Truncation { .. })
    ));
}

#[test]
fn summary_replaces_older_items() {
    let policy = PolicySettings {
        summarize_threshold: 5,
        keep_recent: 3,
        ..PolicySettings::default()
    };
    let engine = engine_with(&[100; 8], policy);
    let budget = Budget::new(10_000).with_pin_first(1);
    let summarizer = FixedSummarizer::default();

    let selection = engine
        .summarize(&budget, &summarizer, &CancellationToken::new())
        .unwrap();

    assert_eq!(summarizer.calls(), 1);
    assert_eq!(selection.original_ids(), ids(&[0, 5, 6, 7]));
    assert_eq!(selection.synthetic_count(), 1);
    assert!(selection.fallback().is_none());

    let bodies = selection.materialize(engine.log());
    assert_eq!(bodies[1].plain_text(), "summary of 4 items");
}

#[test]
fn canceled_summary_falls_back_without_calling() {
    let policy = PolicySettings {
        summarize_threshold: 2,
        keep_recent: 2,
        ..PolicySettings::default()
    };
    let engine = engine_with(&[10; 6], policy);
    let summarizer = FixedSummarizer::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let selection = engine
        .summarize(&Budget::new(1000), &summarizer, &cancel)
        .unwrap();

    assert_eq!(summarizer.calls(), 0);
    match selection.fallback() {
        Some(Fallback::Truncation { cause }) => assert!(cause.is_canceled()),
        other => panic!("expected truncation fallback, got {other:?}"),
    }
}

fn labeled_engine(n: usize, policy: PolicySettings) -> ContextEngine {
    let mut engine = ContextEngine::new(TokenEstimator::default(), policy);
    for index in 0..n {
        engine.append(ItemBody::text(Role::User, format!("item-{index}")));
    }
    engine
}

#[test]
fn retrieval_keeps_top_scores_and_recent_items() {
    let policy = PolicySettings {
        k_recent: 2,
        max_candidates: 2,
        ..PolicySettings::default()
    };
    let engine = labeled_engine(7, policy);
    let embedder = ScoreEmbedder::new("what did we decide")
        .score("item-0", 0.9)
        .score("item-1", 0.1)
        .score("item-2", 0.5)
        .score("item-3", 0.7)
        .score("item-4", 0.3);

    let selection = engine
        .retrieve(
            "what did we decide",
            &Budget::new(10_000),
            &embedder,
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(selection.original_ids(), ids(&[0, 3, 5, 6]));
}

#[test]
fn retrieval_surfaces_embedder_failure() {
    let engine = labeled_engine(7, PolicySettings::default());

    let err = engine
        .retrieve(
            "query",
            &Budget::new(10_000),
            &FailingEmbedder,
            &CancellationToken::new(),
        )
        .unwrap_err();

    assert!(matches!(err, SelectionError::RetrievalUnavailable(_)));
}

#[test]
fn compaction_leaves_log_and_plain_selection_unchanged() {
    let mut engine = engine_with(&[100; 10], PolicySettings::default());
    let budget = Budget::new(600).with_pin_first(1);
    let before_items = engine.log().items().to_vec();
    let before = engine.truncate(&budget).unwrap();

    let record = engine
        .compact(
            ItemId::new(1)..ItemId::new(6),
            &CountingCompactor::default(),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(record.source_item_count(), 5);
    assert_eq!(engine.log().items(), before_items.as_slice());
    assert_eq!(engine.compactions().len(), 1);
    assert_eq!(engine.truncate(&budget).unwrap(), before);
}

#[test]
fn compaction_selection_substitutes_stored_record() {
    let mut engine = engine_with(&[100; 10], PolicySettings::default());
    let budget = Budget::new(700).with_pin_first(1);
    engine
        .compact(
            ItemId::new(1)..ItemId::new(6),
            &CountingCompactor::default(),
            &CancellationToken::new(),
        )
        .unwrap();

    let selection = engine.select_with_compaction(&budget).unwrap();

    assert_eq!(selection.original_ids(), ids(&[0, 6, 7, 8, 9]));
    assert_eq!(selection.synthetic_count(), 1);
    assert!(selection.fits_budget());
    assert!(selection.fallback().is_none());
}

#[test]
fn compaction_selection_without_records_truncates() {
    let engine = engine_with(&[100; 10], PolicySettings::default());
    let budget = Budget::new(300).with_pin_first(1);

    let selection = engine.select_with_compaction(&budget).unwrap();

    assert_eq!(selection.original_ids(), ids(&[0, 8, 9]));
    assert_eq!(selection.fallback(), Some(&Fallback::NoFittingCompaction));
}

#[test]
fn failed_compaction_stores_nothing() {
    let mut engine = engine_with(&[100; 4], PolicySettings::default());

    let err = engine
        .compact(
            ItemId::new(0)..ItemId::new(2),
            &FailingCompactor,
            &CancellationToken::new(),
        )
        .unwrap_err();

    assert!(matches!(err, SelectionError::CollaboratorUnavailable { .. }));
    assert!(engine.compactions().is_empty());
}

#[test]
fn compaction_rejects_out_of_range() {
    let mut engine = engine_with(&[100; 4], PolicySettings::default());

    let err = engine
        .compact(
            ItemId::new(2)..ItemId::new(9),
            &CountingCompactor::default(),
            &CancellationToken::new(),
        )
        .unwrap_err();

    assert!(matches!(err, SelectionError::InvalidRange { len: 4, .. }));
}

fn hybrid_policy() -> PolicySettings {
    PolicySettings {
        max_messages_threshold: 3,
        ..PolicySettings::default()
    }
}

#[test]
fn hybrid_omits_middle_with_placeholder() {
    let mut engine = engine_with(&[100; 10], hybrid_policy());
    let budget = Budget::new(1000).with_pin_first(2).with_pin_last(2);

    let selection = engine
        .hybrid(&budget, SpanReducer::Omit, &CancellationToken::new())
        .unwrap();

    assert_eq!(selection.original_ids(), ids(&[0, 1, 8, 9]));
    assert_eq!(selection.synthetic_count(), 1);
    assert_eq!(
        selection.fallback(),
        Some(&Fallback::Placeholder { cause: None })
    );

    let bodies = selection.materialize(engine.log());
    assert_eq!(bodies.len(), 5);
    assert_eq!(bodies[2].role(), Role::System);
    assert_eq!(bodies[2].plain_text(), placeholder_text(6));
}

#[test]
fn hybrid_reuses_its_own_compaction() {
    let mut engine = engine_with(&[100; 10], hybrid_policy());
    let budget = Budget::new(1000).with_pin_first(2).with_pin_last(2);
    let compactor = CountingCompactor::default();
    let cancel = CancellationToken::new();

    let first = engine
        .hybrid(&budget, SpanReducer::Compactor(&compactor), &cancel)
        .unwrap();
    let second = engine
        .hybrid(&budget, SpanReducer::Compactor(&compactor), &cancel)
        .unwrap();

    assert_eq!(compactor.calls(), 1);
    assert_eq!(engine.compactions().len(), 1);
    assert_eq!(first, second);
    assert_eq!(engine.log().len(), 10);
}

#[test]
fn hybrid_below_threshold_is_plain_truncation() {
    let mut engine = engine_with(&[100; 5], hybrid_policy());
    let budget = Budget::new(1000).with_pin_first(1).with_pin_last(1);

    let selection = engine
        .hybrid(&budget, SpanReducer::Omit, &CancellationToken::new())
        .unwrap();

    assert_eq!(selection, engine.truncate(&budget).unwrap());
}

#[test]
fn pinned_overflow_is_reported_not_dropped() {
    let engine = engine_with(&[100; 5], PolicySettings::default());
    let budget = Budget::new(150).with_pin_first(2);

    let err = engine.truncate(&budget).unwrap_err();
    assert_eq!(
        err,
        SelectionError::BudgetExceeded {
            required: 200,
            available: 150,
            pinned_items: 2,
        }
    );

    match engine.usage(&budget) {
        ContextUsageStatus::PinnedTooLarge {
            required_tokens,
            budget_tokens,
            ..
        } => {
            assert_eq!(required_tokens, 200);
            assert_eq!(budget_tokens, 150);
        }
        other => panic!("expected PinnedTooLarge, got {other:?}"),
    }
}

#[test]
fn usage_reports_ready_and_needs_reduction() {
    let engine = engine_with(&[100; 5], PolicySettings::default());

    assert!(matches!(
        engine.usage(&Budget::new(500)),
        ContextUsageStatus::Ready(_)
    ));
    let status = engine.usage(&Budget::new(300));
    assert!(matches!(status, ContextUsageStatus::NeedsReduction { .. }));
    assert_eq!(status.usage().used_tokens, 500);
}

#[test]
fn empty_log_and_oversized_pins_are_not_errors() {
    let empty = ContextEngine::default();
    assert!(empty.truncate(&Budget::new(100)).unwrap().is_empty());
    assert!(empty.sliding_window(&Budget::new(100)).is_empty());

    let engine = engine_with(&[10; 3], PolicySettings::default());
    let selection = engine
        .truncate(&Budget::new(1000).with_pin_first(10).with_pin_last(10))
        .unwrap();
    assert_eq!(selection.original_ids(), ids(&[0, 1, 2]));
}

#[test]
fn zero_budget_selects_nothing_unpinned() {
    let engine = engine_with(&[10; 3], PolicySettings::default());
    let selection = engine.truncate(&Budget::new(0)).unwrap();
    assert!(selection.is_empty());
    assert_eq!(selection.used_tokens(), 0);
}

#[test]
fn selective_then_enforce_budget() {
    let mut engine = ContextEngine::new(TokenEstimator::default(), PolicySettings::default());
    engine.append(ItemBody::text(Role::System, "a".repeat(40))); // 10 tokens
    engine.append(ItemBody::text(Role::User, "b".repeat(40)));
    engine.append(ItemBody::text(Role::Assistant, "c".repeat(40)));
    engine.append(ItemBody::text(Role::Assistant, "d".repeat(40)).important());
    engine.append(ItemBody::text(Role::User, "e".repeat(40)));
    let budget = Budget::new(25);

    let kept = engine.selective_default(&budget);
    assert_eq!(kept.original_ids(), ids(&[0, 1, 3, 4]));
    assert!(!kept.fits_budget());

    let capped = engine.enforce_budget(kept, &budget).unwrap();
    assert_eq!(capped.original_ids(), ids(&[0, 4]));
    assert_eq!(capped.used_tokens(), 20);
}

#[test]
fn session_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let mut engine = engine_with(&[100; 8], PolicySettings::default());
    engine
        .compact(
            ItemId::new(1)..ItemId::new(4),
            &CountingCompactor::default(),
            &CancellationToken::new(),
        )
        .unwrap();
    engine.save(&path).unwrap();

    let loaded =
        ContextEngine::load(&path, TokenEstimator::default(), PolicySettings::default()).unwrap();

    assert_eq!(loaded.log().items(), engine.log().items());
    assert_eq!(loaded.compactions(), engine.compactions());
    let budget = Budget::new(500).with_pin_first(1);
    assert_eq!(
        loaded.select_with_compaction(&budget).unwrap(),
        engine.select_with_compaction(&budget).unwrap()
    );
}
