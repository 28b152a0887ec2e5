//! Property tests over random logs and budgets.

use proptest::prelude::*;

use ctxbudget_context::policy::SpanReducer;
use ctxbudget_context::{CancellationToken, ContextEngine, Selection, SelectionError};
use ctxbudget_types::{Budget, ItemId, PolicySettings};

use crate::common::engine_with;

fn budget_strategy() -> impl Strategy<Value = Budget> {
    (0u32..3000, 0u32..300, 0usize..4, 0usize..4).prop_map(
        |(max_tokens, reserve, pin_first, pin_last)| {
            Budget::new(max_tokens)
                .with_reserve(reserve)
                .with_pin_first(pin_first)
                .with_pin_last(pin_last)
        },
    )
}

fn sizes_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..120, 0..30)
}

fn small_policy() -> PolicySettings {
    PolicySettings {
        sliding_window_max_items: 4,
        max_messages_threshold: 3,
        ..PolicySettings::default()
    }
}

/// Every policy that needs no external collaborator.
fn run_all(engine: &mut ContextEngine, budget: &Budget) -> Vec<Result<Selection, SelectionError>> {
    let cancel = CancellationToken::new();
    vec![
        engine.truncate(budget),
        Ok(engine.sliding_window(budget)),
        Ok(engine.selective_default(budget)),
        engine.select_with_compaction(budget),
        engine.hybrid(budget, SpanReducer::Omit, &cancel),
    ]
}

fn is_strictly_increasing(ids: &[ItemId]) -> bool {
    ids.windows(2).all(|pair| pair[0] < pair[1])
}

proptest! {
    #[test]
    fn truncation_respects_budget(sizes in sizes_strategy(), budget in budget_strategy()) {
        let engine = engine_with(&sizes, PolicySettings::default());
        match engine.truncate(&budget) {
            Ok(selection) => prop_assert!(selection.used_tokens() <= budget.available_tokens()),
            Err(err) => prop_assert!(
                matches!(err, SelectionError::BudgetExceeded { .. }),
                "unexpected error: {err}"
            ),
        }
    }

    #[test]
    fn enforce_budget_caps_any_filter(sizes in sizes_strategy(), budget in budget_strategy()) {
        let engine = engine_with(&sizes, small_policy());
        let window = engine.sliding_window(&budget);
        if let Ok(capped) = engine.enforce_budget(window, &budget) {
            prop_assert!(capped.fits_budget());
        }
    }

    #[test]
    fn selection_is_idempotent(sizes in sizes_strategy(), budget in budget_strategy()) {
        let mut engine = engine_with(&sizes, small_policy());
        let first: Vec<_> = run_all(&mut engine, &budget)
            .into_iter()
            .map(|result| result.map(|selection| selection.original_ids()))
            .collect();
        let second: Vec<_> = run_all(&mut engine, &budget)
            .into_iter()
            .map(|result| result.map(|selection| selection.original_ids()))
            .collect();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn original_order_is_preserved(sizes in sizes_strategy(), budget in budget_strategy()) {
        let mut engine = engine_with(&sizes, small_policy());
        for selection in run_all(&mut engine, &budget).into_iter().flatten() {
            prop_assert!(is_strictly_increasing(&selection.original_ids()));
        }
    }

    #[test]
    fn first_item_survives_when_pinned(
        sizes in prop::collection::vec(0usize..120, 1..30),
        budget in budget_strategy(),
    ) {
        let budget = budget.with_pin_first(budget.pin_first_n.max(1));
        let mut engine = engine_with(&sizes, small_policy());
        for result in run_all(&mut engine, &budget) {
            match result {
                Ok(selection) => {
                    prop_assert_eq!(selection.original_ids().first().copied(), Some(ItemId::new(0)));
                }
                Err(err) => prop_assert!(
                    matches!(err, SelectionError::BudgetExceeded { .. }),
                    "unexpected error: {err}"
                ),
            }
        }
    }

    #[test]
    fn log_is_never_mutated_by_selection(sizes in sizes_strategy(), budget in budget_strategy()) {
        let mut engine = engine_with(&sizes, small_policy());
        let before = engine.log().items().to_vec();
        let _ = run_all(&mut engine, &budget);
        prop_assert_eq!(engine.log().items(), before.as_slice());
    }
}
