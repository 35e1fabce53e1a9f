//! End-to-end pipeline scenarios over scripted providers.

mod support;

use support::*;
use council_core::{
    BreakerState, ExecutionMode, ProgressKind, ProviderError, ProviderKind, Role,
};
use orchestrator::RequestResult;
use std::time::Duration;

/// Trivial FAST path: one subtask, cheapest provider, full event order,
/// exact cost accounting, dense sequence numbers.
#[tokio::test]
async fn trivial_fast_path() {
    let cheap = ScriptedProvider::new(ProviderKind::OpenAi)
        .with_reply("Hello")
        .with_usage(100, 10)
        .arc();
    let pricey = ScriptedProvider::new(ProviderKind::Groq)
        .with_reply("Hello")
        .arc();

    let setup = plane_with(
        vec![
            model("model-a", ProviderKind::OpenAi, 2e-6, 500, 0.95),
            model("model-b", ProviderKind::Groq, 1e-5, 700, 0.95),
        ],
        clients(vec![
            (ProviderKind::OpenAi, cheap.clone()),
            (ProviderKind::Groq, pricey.clone()),
        ]),
    );

    let id = setup
        .plane
        .submit("alice", Role::Authenticated, "Say hello in one word", ExecutionMode::Fast)
        .await
        .expect("submit");

    let mut rx = setup.plane.subscribe_progress(id, 0).await;
    let messages = collect_stream(&mut rx).await;

    // Fixed stage order.
    let observed = kinds(&messages);
    let expected = [
        ProgressKind::AnalysisStarted,
        ProgressKind::AnalysisComplete,
        ProgressKind::DecompositionComplete,
        ProgressKind::RoutingComplete,
        ProgressKind::ExecutionProgress,
        ProgressKind::SynthesisStarted,
        ProgressKind::FinalResponse,
    ];
    let mut cursor = 0;
    for kind in &observed {
        if cursor < expected.len() && kind == &expected[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(cursor, expected.len(), "stage order violated: {observed:?}");

    // Sequence numbers are 1, 2, 3, … contiguous.
    let seqs: Vec<u64> = messages.iter().filter(|m| m.seq > 0).map(|m| m.seq).collect();
    let expected_seqs: Vec<u64> = (1..=seqs.len() as u64).collect();
    assert_eq!(seqs, expected_seqs);

    // One subtask routed to the cheap model, no fallback.
    let routing = find(&messages, ProgressKind::RoutingComplete).unwrap();
    assert_eq!(routing.payload["assignments"].as_array().unwrap().len(), 1);
    assert_eq!(routing.payload["assignments"][0]["model"], "model-a");

    let execution = find(&messages, ProgressKind::ExecutionProgress).unwrap();
    assert_eq!(execution.payload["status"], "completed");
    assert_eq!(execution.payload["used_fallback"], false);

    // Cost is exactly tokens times the unit prices (1e-6 per side).
    let result = wait_result(&setup.plane, id).await;
    let RequestResult::Completed(final_response) = result else {
        panic!("expected completion, got {result:?}");
    };
    let expected_cost = 100.0 * 1e-6 + 10.0 * 1e-6;
    assert!((final_response.cost.total_cost - expected_cost).abs() < 1e-12);
    assert_eq!(final_response.models_used, vec!["model-a".to_string()]);
    assert_eq!(final_response.text, "Hello");
    assert_eq!(pricey.call_count(), 0);
}

/// Fallback on rate limit: primary fails once, the runner-up serves the
/// subtask, the breaker stays CLOSED after a single failure.
#[tokio::test]
async fn fallback_on_rate_limit() {
    let flaky = ScriptedProvider::new(ProviderKind::OpenAi)
        .with_steps(vec![Err(ProviderError::RateLimited { retry_after: None })])
        .with_reply("late answer")
        .arc();
    let steady = ScriptedProvider::new(ProviderKind::Groq)
        .with_reply("steady answer")
        .arc();

    let setup = plane_with(
        vec![
            model("model-a", ProviderKind::OpenAi, 2e-6, 500, 0.95),
            model("model-b", ProviderKind::Groq, 1e-5, 700, 0.95),
        ],
        clients(vec![
            (ProviderKind::OpenAi, flaky.clone()),
            (ProviderKind::Groq, steady.clone()),
        ]),
    );

    let id = setup
        .plane
        .submit("alice", Role::Authenticated, "Say hello in one word", ExecutionMode::Fast)
        .await
        .expect("submit");

    let mut rx = setup.plane.subscribe_progress(id, 0).await;
    let messages = collect_stream(&mut rx).await;

    let execution = find(&messages, ProgressKind::ExecutionProgress).unwrap();
    assert_eq!(execution.payload["used_fallback"], true);
    assert_eq!(execution.payload["primary_model_failed"], "model-a");
    assert_eq!(execution.payload["fallback_model"], "model-b");
    assert_eq!(execution.payload["reason"], "rate limit");

    // A single failure must not open the breaker.
    assert_eq!(setup.breakers.state(ProviderKind::OpenAi), BreakerState::Closed);

    let RequestResult::Completed(final_response) = wait_result(&setup.plane, id).await else {
        panic!("expected completion");
    };
    assert_eq!(final_response.provider_usage.get("groq"), Some(&1));
    assert_eq!(final_response.provider_usage.get("openai"), None);
    assert_eq!(steady.call_count(), 1);
}

/// After five consecutive failures the breaker opens and routing skips
/// the provider entirely at candidate-set construction.
#[tokio::test]
async fn breaker_opens_after_five_failures_and_routing_skips() {
    let broken = ScriptedProvider::new(ProviderKind::OpenAi)
        .with_failure(ProviderError::Transport("connection refused".into()))
        .arc();
    let steady = ScriptedProvider::new(ProviderKind::Groq)
        .with_reply("ok")
        .arc();

    let setup = plane_with(
        vec![
            model("model-a", ProviderKind::OpenAi, 2e-6, 500, 0.95),
            model("model-b", ProviderKind::Groq, 1e-5, 700, 0.95),
        ],
        clients(vec![
            (ProviderKind::OpenAi, broken.clone()),
            (ProviderKind::Groq, steady.clone()),
        ]),
    );

    // Five single-subtask requests, each costing one primary failure.
    for _ in 0..5 {
        let id = setup
            .plane
            .submit("alice", Role::Authenticated, "Say hello in one word", ExecutionMode::Fast)
            .await
            .expect("submit");
        let RequestResult::Completed(_) = wait_result(&setup.plane, id).await else {
            panic!("fallback should have saved the request");
        };
    }
    assert_eq!(broken.call_count(), 5);
    assert_eq!(setup.breakers.state(ProviderKind::OpenAi), BreakerState::Open);

    // Sixth request: model-a is not even a candidate; no network call.
    let id = setup
        .plane
        .submit("alice", Role::Authenticated, "Say hello in one word", ExecutionMode::Fast)
        .await
        .expect("submit");
    let mut rx = setup.plane.subscribe_progress(id, 0).await;
    let messages = collect_stream(&mut rx).await;

    let routing = find(&messages, ProgressKind::RoutingComplete).unwrap();
    assert_eq!(routing.payload["assignments"][0]["model"], "model-b");
    assert_eq!(broken.call_count(), 5);
}

/// BEST_QUALITY decomposition depth, task typing, redundant dispatch on
/// a high-risk subtask, and inconclusive arbitration rendering.
#[tokio::test]
async fn best_quality_decomposition_and_arbitration() {
    let confident = ScriptedProvider::new(ProviderKind::OpenAi)
        .with_reply("The rollout is safe to enable")
        .arc();
    let dissenting = ScriptedProvider::new(ProviderKind::Groq)
        .with_reply("The rollout is not safe to enable")
        .arc();

    let setup = plane_with(
        vec![
            model("model-a", ProviderKind::OpenAi, 2e-6, 500, 0.95),
            model("model-b", ProviderKind::Groq, 1e-5, 700, 0.92),
        ],
        clients(vec![
            (ProviderKind::OpenAi, confident.clone()),
            (ProviderKind::Groq, dissenting.clone()),
        ]),
    );

    let id = setup
        .plane
        .submit(
            "alice",
            Role::Authenticated,
            "Explain the production rollout of X, then write Python for X, then list 3 uses.",
            ExecutionMode::BestQuality,
        )
        .await
        .expect("submit");

    let mut rx = setup.plane.subscribe_progress(id, 0).await;
    let messages = collect_stream(&mut rx).await;

    let decomposition = find(&messages, ProgressKind::DecompositionComplete).unwrap();
    let subtasks = decomposition.payload["subtasks"].as_array().unwrap();
    assert!((4..=6).contains(&subtasks.len()), "got {}", subtasks.len());
    let types: Vec<&str> = subtasks
        .iter()
        .map(|s| s["task_type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"CODE_GENERATION"));
    assert!(types.contains(&"RESEARCH"));

    // The high-risk part went to two models; the close disagreement is
    // inconclusive and both readings are rendered.
    let arbitration = find(&messages, ProgressKind::ArbitrationDecision)
        .expect("redundant dispatch must force an arbitration decision");
    assert_eq!(arbitration.payload["decision"], "INCONCLUSIVE");

    let RequestResult::Completed(final_response) = wait_result(&setup.plane, id).await else {
        panic!("expected completion");
    };
    assert!(final_response.text.contains("Alternative A"));
    assert!(final_response.text.contains("Alternative B"));
    assert!(dissenting.call_count() >= 1);
}

/// A subtask whose only capable model keeps failing is reported inside
/// the final response; the request still succeeds.
#[tokio::test]
async fn partial_failure_is_annotated() {
    let prose = ScriptedProvider::new(ProviderKind::OpenAi)
        .with_reply("A thorough explanation.")
        .arc();
    let coder = ScriptedProvider::new(ProviderKind::Groq)
        .with_failure(ProviderError::Server {
            status: 503,
            message: "overloaded".into(),
        })
        .arc();

    use council_core::TaskType::*;
    let setup = plane_with(
        vec![
            model_for(
                "prose-model",
                ProviderKind::OpenAi,
                vec![Reasoning, Research, FactCheck, Verification, Creative],
                2e-6,
                500,
                0.95,
            ),
            model_for("code-model", ProviderKind::Groq, vec![CodeGeneration], 1e-6, 400, 0.9),
        ],
        clients(vec![
            (ProviderKind::OpenAi, prose.clone()),
            (ProviderKind::Groq, coder.clone()),
        ]),
    );

    let id = setup
        .plane
        .submit(
            "alice",
            Role::Authenticated,
            "Explain X and also write python code for X",
            ExecutionMode::Balanced,
        )
        .await
        .expect("submit");

    let RequestResult::Completed(final_response) = wait_result(&setup.plane, id).await else {
        panic!("expected partial completion");
    };
    assert!(final_response.text.contains("could not be completed"));
    assert!(final_response.text.contains("A thorough explanation"));
    assert!(final_response.confidence < 0.9);
}

/// Cancellation reaches in-flight provider calls, the request ends in
/// CANCELLED, and the progress stream ends with `cancelled`.
#[tokio::test]
async fn cancellation_reaches_inflight_calls() {
    let slow = ScriptedProvider::new(ProviderKind::OpenAi)
        .with_reply("too late")
        .with_delay(Duration::from_secs(30))
        .arc();

    let setup = plane_with(
        vec![model("model-a", ProviderKind::OpenAi, 2e-6, 500, 0.95)],
        clients(vec![(ProviderKind::OpenAi, slow.clone())]),
    );

    let id = setup
        .plane
        .submit("alice", Role::Authenticated, "Say hello in one word", ExecutionMode::BestQuality)
        .await
        .expect("submit");

    // Let the pipeline reach the provider call, then cancel.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(setup.plane.cancel(id).await.expect("cancel"));

    let result = wait_result(&setup.plane, id).await;
    assert!(matches!(result, RequestResult::Cancelled), "got {result:?}");

    let mut rx = setup.plane.subscribe_progress(id, 0).await;
    let messages = collect_stream(&mut rx).await;
    assert_eq!(messages.last().unwrap().kind, ProgressKind::Cancelled);
}

/// Zero configured providers: submission fails fast with NO_PROVIDERS.
#[tokio::test]
async fn no_providers_fails_fast() {
    let setup = plane_with(vec![], clients(vec![]));
    let err = setup
        .plane
        .submit("alice", Role::Authenticated, "Say hello in one word", ExecutionMode::Fast)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NO_PROVIDERS");
}

/// Progress replay: a subscriber that reconnects with its last acked seq
/// receives exactly the missed suffix.
#[tokio::test]
async fn progress_replay_after_reconnect() {
    let steady = ScriptedProvider::new(ProviderKind::OpenAi)
        .with_reply("Hello")
        .arc();
    let setup = plane_with(
        vec![model("model-a", ProviderKind::OpenAi, 2e-6, 500, 0.95)],
        clients(vec![(ProviderKind::OpenAi, steady)]),
    );

    let id = setup
        .plane
        .submit("alice", Role::Authenticated, "Say hello in one word", ExecutionMode::Fast)
        .await
        .expect("submit");

    let mut rx = setup.plane.subscribe_progress(id, 0).await;
    let all = collect_stream(&mut rx).await;
    let total = all.iter().filter(|m| m.seq > 0).count() as u64;
    assert!(total >= 5);

    // Client saw the first three messages, acked them, then dropped.
    setup
        .plane
        .handle_client_message(id, council_core::ClientMessage::Ack { seq: 3 })
        .await;
    let mut rx = setup
        .plane
        .handle_client_message(id, council_core::ClientMessage::Reconnect { since_seq: 3 })
        .await
        .expect("reconnect yields a subscription");

    let replayed = collect_stream(&mut rx).await;
    let seqs: Vec<u64> = replayed.iter().filter(|m| m.seq > 0).map(|m| m.seq).collect();
    let expected: Vec<u64> = (4..=total).collect();
    assert_eq!(seqs, expected);
}
