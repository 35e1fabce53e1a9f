//! Property tests for the cost estimator invariants.

use council_core::ExecutionMode;
use llm::{CostEngine, ModelRegistry};
use proptest::prelude::*;
use std::sync::Arc;

fn engine() -> CostEngine {
    CostEngine::new(Arc::new(ModelRegistry::with_models(
        ModelRegistry::builtin_catalog(),
    )))
}

proptest! {
    /// cost(FAST) <= cost(BALANCED) <= cost(BEST_QUALITY), same for time,
    /// all non-negative, at any prompt length.
    #[test]
    fn estimates_are_ordered_and_nonnegative(length in 0usize..=5000) {
        let engine = engine();
        let estimates = engine.estimate_all(length);

        prop_assert!(estimates.fast.estimated_cost >= 0.0);
        prop_assert!(estimates.fast.estimated_time_seconds >= 0.0);
        prop_assert!(estimates.fast.estimated_cost <= estimates.balanced.estimated_cost);
        prop_assert!(estimates.balanced.estimated_cost <= estimates.best_quality.estimated_cost);
        prop_assert!(
            estimates.fast.estimated_time_seconds <= estimates.balanced.estimated_time_seconds
        );
        prop_assert!(
            estimates.balanced.estimated_time_seconds
                <= estimates.best_quality.estimated_time_seconds
        );
    }

    /// For a fixed mode, estimates never shrink as the prompt grows.
    #[test]
    fn estimates_are_monotone_in_length(a in 0usize..=5000, b in 0usize..=5000) {
        let (shorter, longer) = if a <= b { (a, b) } else { (b, a) };
        let engine = engine();

        for mode in ExecutionMode::ALL {
            let small = engine.estimate(shorter, mode);
            let large = engine.estimate(longer, mode);
            prop_assert!(small.estimated_cost <= large.estimated_cost);
            prop_assert!(small.estimated_time_seconds <= large.estimated_time_seconds);
        }
    }

    /// The discrepancy check fires exactly when the relative gap exceeds
    /// one half, in either direction.
    #[test]
    fn discrepancy_threshold_is_symmetric(estimated in 0.0001f64..1.0, ratio in 0.0f64..3.0) {
        let engine = engine();
        let actual = estimated * ratio;
        let id = council_core::RequestId::new();
        let result = engine.check_discrepancy(id, ExecutionMode::Balanced, estimated, actual);

        let relative = (actual - estimated).abs() / estimated;
        if relative > 0.5 {
            prop_assert!(result.is_some());
            let discrepancy = result.unwrap();
            let expected_direction = if actual > estimated { "over" } else { "under" };
            prop_assert_eq!(discrepancy.direction, expected_direction);
        } else {
            prop_assert!(result.is_none());
        }
    }
}
