//! Property-based tests for the reducer.

use factorial_cleaner::{
    is_full, missing_combinations, missing_count, LevelSets, ReductionConfig, Reducer, Row,
    SkeletonPolicy, Table, Termination,
};
use proptest::prelude::*;

/// Tables of one to three factors, each level drawn from 1..=4, with up to 30 rows.
fn random_table() -> impl Strategy<Value = Table<i64>> {
    (1usize..=3).prop_flat_map(|factors| {
        prop::collection::vec(
            (prop::collection::vec(1i64..=4, factors), 0i64..100),
            0..30,
        )
        .prop_map(move |rows| {
            Table::from_rows(
                factors,
                rows.iter().map(|(levels, response)| Row::new(levels, *response)),
            )
            .unwrap()
        })
    })
}

/// Level sets of one to three factors with one to three levels each.
fn random_levels() -> impl Strategy<Value = LevelSets<i64>> {
    prop::collection::vec(prop::collection::btree_set(1i64..=5, 1..=3), 1..=3)
        .prop_map(LevelSets::new)
}

fn reducer(policy: SkeletonPolicy) -> Reducer {
    Reducer::new(ReductionConfig::default().with_skeleton_policy(policy)).unwrap()
}

fn policy() -> impl Strategy<Value = SkeletonPolicy> {
    prop_oneof![Just(SkeletonPolicy::Fixed), Just(SkeletonPolicy::Shrinking)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_fullness_agrees_with_missing_combinations(table in random_table()) {
        let skeleton = table.level_sets().skeleton();
        let missing = missing_combinations(&table, &skeleton);
        prop_assert_eq!(missing.len(), missing_count(&table, &skeleton));
        let full = is_full(&table, &skeleton);
        prop_assert_eq!(full, is_full(&table, &skeleton));
        prop_assert_eq!(full, !table.is_empty() && missing.is_empty());
        prop_assert!(missing.iter().all(|combination| skeleton.contains(combination)));
    }

    #[test]
    fn prop_cleaning_only_removes_input_rows(table in random_table(), policy in policy()) {
        let cleaned = reducer(policy).clean(&table);
        prop_assert!(cleaned.table.iter().all(|row| table.contains(row)));
        prop_assert!(cleaned.table.is_deduplicated());
        prop_assert_eq!(
            cleaned.table.len() + cleaned.rows_removed + cleaned.duplicates_removed,
            table.len()
        );
        prop_assert_eq!(cleaned.table.is_empty(), table.is_empty());
    }

    #[test]
    fn prop_every_step_strictly_reduces_missing(table in random_table(), policy in policy()) {
        let cleaned = reducer(policy).clean(&table);
        for step in cleaned.steps.iter() {
            prop_assert!(step.missing_after < step.missing_before);
            prop_assert!(step.rows_removed > 0);
            prop_assert!(step.loss >= 0.0);
        }
        for pair in cleaned.steps.windows(2) {
            prop_assert_eq!(pair[0].missing_after, pair[1].missing_before);
        }
        prop_assert!(cleaned.loss >= 0.0);
    }

    #[test]
    fn prop_outcome_is_consistent(table in random_table(), policy in policy()) {
        let cleaned = reducer(policy).clean(&table);
        let missing = missing_combinations(&cleaned.table, &cleaned.skeleton);
        prop_assert_eq!(&cleaned.missing, &missing);
        prop_assert_eq!(cleaned.full, is_full(&cleaned.table, &cleaned.skeleton));
        prop_assert_eq!(cleaned.full, cleaned.termination == Termination::Full);
    }

    #[test]
    fn prop_fixed_design_never_removes_rows(table in random_table()) {
        let cleaned = reducer(SkeletonPolicy::Fixed).clean(&table);
        prop_assert_eq!(cleaned.rows_removed, 0);
        prop_assert!(cleaned.steps.is_empty());
    }

    #[test]
    fn prop_cleaning_is_idempotent(table in random_table(), policy in policy()) {
        let reducer = reducer(policy);
        let once = reducer.clean(&table);
        prop_assume!(once.termination != Termination::DepthExceeded);

        let twice = reducer.clean(&once.table);
        prop_assert_eq!(&twice.table, &once.table);
        prop_assert_eq!(twice.full, once.full);
        prop_assert!(twice.steps.is_empty());
    }

    #[test]
    fn prop_full_tables_are_fixpoints(levels in random_levels(), policy in policy()) {
        let skeleton = levels.skeleton();
        let table = Table::from_rows(
            levels.factor_count(),
            skeleton
                .iter()
                .enumerate()
                .map(|(response, combination)| {
                    Row::from_combination(combination.clone(), response as i64)
                }),
        )
        .unwrap();

        let cleaned = reducer(policy).clean(&table);
        prop_assert!(cleaned.full);
        prop_assert_eq!(&cleaned.table, &table);
        prop_assert_eq!(cleaned.loss, 0.0);
        prop_assert!(cleaned.steps.is_empty());
    }
}
