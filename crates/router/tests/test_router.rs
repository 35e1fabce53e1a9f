//! Determinism and maximality of the selection engine.

use council_core::{ExecutionMode, ModelSpec, ProviderKind, RequestId, Subtask, TaskType};
use llm::{BreakerBoard, ModelRegistry};
use router::Router;
use rstest::rstest;
use std::sync::Arc;

fn model(id: &str, provider: ProviderKind, unit_price: f64, latency: u64, rel: f64) -> ModelSpec {
    ModelSpec {
        id: id.into(),
        provider,
        supported_tasks: vec![TaskType::Reasoning, TaskType::Research, TaskType::FactCheck],
        input_price: unit_price / 2.0,
        output_price: unit_price / 2.0,
        typical_latency_ms: latency,
        reliability: rel,
        context_window: 128_000,
    }
}

fn catalog() -> Vec<ModelSpec> {
    vec![
        model("alpha", ProviderKind::OpenAi, 2.0e-6, 800, 0.97),
        model("bravo", ProviderKind::Groq, 1.3e-7, 300, 0.92),
        model("charlie", ProviderKind::Anthropic, 1.8e-5, 1600, 0.99),
        model("delta", ProviderKind::Local, 0.0, 2500, 0.90),
    ]
}

fn subtask() -> Subtask {
    Subtask::new(RequestId::new(), 0, "explain the tradeoffs", TaskType::Reasoning)
}

/// Catalog order must not influence the winner in any mode.
#[rstest]
#[case(ExecutionMode::Fast)]
#[case(ExecutionMode::Balanced)]
#[case(ExecutionMode::BestQuality)]
fn selection_is_order_independent(#[case] mode: ExecutionMode) {
    let models = catalog();
    let mut winners = Vec::new();

    for rotation in 0..models.len() {
        let mut rotated = models.clone();
        rotated.rotate_left(rotation);
        let router = Router::new(
            Arc::new(ModelRegistry::with_models(rotated)),
            Arc::new(BreakerBoard::default()),
        );
        winners.push(router.route(&subtask(), mode).unwrap().model.id);
    }

    assert!(
        winners.windows(2).all(|pair| pair[0] == pair[1]),
        "winner depends on catalog order in {mode}: {winners:?}"
    );
}

/// The ranking is sorted by score, and the selected model carries the
/// maximum over the whole candidate set.
#[rstest]
#[case(ExecutionMode::Balanced)]
#[case(ExecutionMode::BestQuality)]
fn ranking_is_sorted_and_maximal(#[case] mode: ExecutionMode) {
    let router = Router::new(
        Arc::new(ModelRegistry::with_models(catalog())),
        Arc::new(BreakerBoard::default()),
    );
    let decision = router.route(&subtask(), mode).unwrap();

    let scores: Vec<f64> = decision.ranked.iter().map(|c| c.score).collect();
    assert!(
        scores.windows(2).all(|pair| pair[0] >= pair[1]),
        "ranking not sorted: {scores:?}"
    );
    let maximum = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(decision.ranked[0].score, maximum);
    assert_eq!(decision.model.id, decision.ranked[0].model.id);
}

/// Excluding the winner always yields the previous runner-up.
#[test]
fn exclusion_walks_down_the_ranking() {
    let router = Router::new(
        Arc::new(ModelRegistry::with_models(catalog())),
        Arc::new(BreakerBoard::default()),
    );
    let first = router.route(&subtask(), ExecutionMode::Balanced).unwrap();
    let runner_up = first.ranked[1].model.id.clone();

    let second = router
        .route_excluding(&subtask(), ExecutionMode::Balanced, &[first.model.id.clone()])
        .unwrap();
    assert_eq!(second.model.id, runner_up);
}
