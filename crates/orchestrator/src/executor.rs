use common::ProgressBus;
use council_core::{
    AgentResponse, CouncilResult, ExecutionMode, ModelSpec, OrchestrationError, ProgressKind,
    ProviderError, ProviderKind, ProviderSelectionEntry, Request, RequestId, RiskLevel,
    SelfAssessment, Subtask, SubtaskId, SubtaskStatus, TaskType,
};
use llm::{BreakerBoard, CompletionRequest, CompletionResponse, ProviderClient};
use router::{RouteDecision, Router};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Words that lower the confidence read on a response.
const HEDGE_MARKERS: [&str; 7] = [
    "might",
    "maybe",
    "possibly",
    "not sure",
    "unclear",
    "i think",
    "probably",
];

/// What went wrong with one model attempt.
enum AttemptFailure {
    BreakerOpen,
    MissingClient,
    Cancelled,
    Provider(ProviderError),
}

impl AttemptFailure {
    /// Short reason used in progress payloads and fallback entries.
    fn reason(&self) -> String {
        match self {
            AttemptFailure::BreakerOpen => "circuit breaker open".to_string(),
            AttemptFailure::MissingClient => "no client configured".to_string(),
            AttemptFailure::Cancelled => "cancelled".to_string(),
            AttemptFailure::Provider(err) => err.kind().to_string(),
        }
    }

    fn sentence(&self) -> String {
        match self {
            AttemptFailure::BreakerOpen => "provider refused by open circuit breaker".to_string(),
            AttemptFailure::MissingClient => "provider has no configured client".to_string(),
            AttemptFailure::Cancelled => "call was cancelled".to_string(),
            AttemptFailure::Provider(err) => err.to_string(),
        }
    }
}

/// Everything a per-subtask worker needs, cheap to clone into the task.
#[derive(Clone)]
struct TaskContext {
    clients: Arc<HashMap<ProviderKind, Arc<dyn ProviderClient>>>,
    breakers: Arc<BreakerBoard>,
    router: Arc<Router>,
    bus: ProgressBus,
    request_id: RequestId,
    mode: ExecutionMode,
    cancel: CancellationToken,
    redundant_min_risk: RiskLevel,
}

/// Result of running one subtask to completion (or failure).
struct SubtaskRun {
    subtask_id: SubtaskId,
    responses: Vec<AgentResponse>,
    assigned_model: Option<String>,
    entries: Vec<ProviderSelectionEntry>,
    provider_usage: BTreeMap<String, u32>,
    error: Option<String>,
    cancelled: bool,
}

impl SubtaskRun {
    fn new(subtask_id: SubtaskId) -> Self {
        Self {
            subtask_id,
            responses: Vec::new(),
            assigned_model: None,
            entries: Vec::new(),
            provider_usage: BTreeMap::new(),
            error: None,
            cancelled: false,
        }
    }

    fn cancelled(subtask_id: SubtaskId) -> Self {
        let mut run = Self::new(subtask_id);
        run.cancelled = true;
        run
    }
}

/// Aggregate result of the execution stage.
pub struct ExecutionOutcome {
    /// Successful agent responses; a subtask may have two when it was
    /// dispatched redundantly for arbitration.
    pub responses: Vec<AgentResponse>,
    /// Last error sentence per non-recoverably failed subtask.
    pub failures: HashMap<SubtaskId, String>,
    /// Selection entries produced during execution (fallback, redundant
    /// dispatch), to append after the router's primary entries.
    pub entries: Vec<ProviderSelectionEntry>,
    /// Successful calls per provider.
    pub provider_usage: BTreeMap<String, u32>,
}

/// Runs routed subtasks concurrently with per-request and global
/// parallelism caps, circuit-breaker gating, and one fallback retry.
pub struct Executor {
    clients: Arc<HashMap<ProviderKind, Arc<dyn ProviderClient>>>,
    breakers: Arc<BreakerBoard>,
    router: Arc<Router>,
    bus: ProgressBus,
    global_permits: Arc<Semaphore>,
    redundant_min_risk: RiskLevel,
}

impl Executor {
    pub fn new(
        clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
        breakers: Arc<BreakerBoard>,
        router: Arc<Router>,
        bus: ProgressBus,
        worker_budget: usize,
    ) -> Self {
        Self {
            clients: Arc::new(clients),
            breakers,
            router,
            bus,
            global_permits: Arc::new(Semaphore::new(worker_budget.max(1))),
            redundant_min_risk: RiskLevel::High,
        }
    }

    /// Run all routed subtasks. Subtask statuses and model assignments
    /// are written back; responses arrive in completion order.
    pub async fn execute(
        &self,
        request: &Request,
        subtasks: &mut [Subtask],
        decisions: Vec<(SubtaskId, RouteDecision)>,
        cancel: &CancellationToken,
    ) -> CouncilResult<ExecutionOutcome> {
        let per_request = Arc::new(Semaphore::new(request.mode.parallelism()));
        let mut join_set: JoinSet<SubtaskRun> = JoinSet::new();

        let by_id: HashMap<SubtaskId, Subtask> = subtasks
            .iter()
            .map(|s| (s.id, s.clone()))
            .collect();

        for (subtask_id, decision) in decisions {
            let Some(subtask) = by_id.get(&subtask_id).cloned() else {
                continue;
            };
            let ctx = TaskContext {
                clients: self.clients.clone(),
                breakers: self.breakers.clone(),
                router: self.router.clone(),
                bus: self.bus.clone(),
                request_id: request.id,
                mode: request.mode,
                cancel: cancel.clone(),
                redundant_min_risk: self.redundant_min_risk,
            };
            let per_request = per_request.clone();
            let global = self.global_permits.clone();

            join_set.spawn(async move {
                let Ok(_global) = global.acquire_owned().await else {
                    return SubtaskRun::cancelled(subtask.id);
                };
                let Ok(_local) = per_request.acquire_owned().await else {
                    return SubtaskRun::cancelled(subtask.id);
                };
                if ctx.cancel.is_cancelled() {
                    return SubtaskRun::cancelled(subtask.id);
                }
                run_subtask(ctx, subtask, decision).await
            });
        }

        let mut runs: Vec<SubtaskRun> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(run) => runs.push(run),
                Err(e) => {
                    return Err(OrchestrationError::Integrity(format!(
                        "subtask worker panicked: {e}"
                    )))
                }
            }
        }

        if cancel.is_cancelled() || runs.iter().any(|r| r.cancelled) {
            return Err(OrchestrationError::Cancelled);
        }

        let mut outcome = ExecutionOutcome {
            responses: Vec::new(),
            failures: HashMap::new(),
            entries: Vec::new(),
            provider_usage: BTreeMap::new(),
        };

        for run in runs {
            if let Some(subtask) = subtasks.iter_mut().find(|s| s.id == run.subtask_id) {
                subtask.assigned_model = run.assigned_model.clone();
                subtask.status = if run.responses.is_empty() {
                    SubtaskStatus::Failed
                } else {
                    SubtaskStatus::Completed
                };
            }
            if let Some(error) = run.error {
                outcome.failures.insert(run.subtask_id, error);
            }
            outcome.responses.extend(run.responses);
            outcome.entries.extend(run.entries);
            for (provider, count) in run.provider_usage {
                *outcome.provider_usage.entry(provider).or_insert(0) += count;
            }
        }

        info!(
            request_id = %request.id,
            succeeded = subtasks.iter().filter(|s| s.status == SubtaskStatus::Completed).count(),
            failed = outcome.failures.len(),
            "execution stage finished"
        );
        Ok(outcome)
    }
}

async fn run_subtask(ctx: TaskContext, subtask: Subtask, decision: RouteDecision) -> SubtaskRun {
    let mut run = SubtaskRun::new(subtask.id);
    let primary = decision.model.clone();
    let started = Instant::now();

    match attempt_model(&ctx, &subtask, &primary).await {
        Ok(response) => {
            *run.provider_usage
                .entry(primary.provider.to_string())
                .or_insert(0) += 1;
            run.assigned_model = Some(primary.id.clone());
            run.responses.push(response);

            ctx.bus
                .publish(
                    ctx.request_id,
                    ProgressKind::ExecutionProgress,
                    serde_json::json!({
                        "subtask_id": subtask.id,
                        "status": "completed",
                        "model": primary.id,
                        "used_fallback": false,
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    }),
                )
                .await;

            maybe_dispatch_redundant(&ctx, &subtask, &decision, &mut run).await;
        }
        Err(AttemptFailure::Cancelled) => {
            run.cancelled = true;
        }
        Err(failure) => {
            let reason = failure.reason();
            debug!(
                subtask_id = %subtask.id,
                model = %primary.id,
                reason = %reason,
                "primary model failed, looking for fallback"
            );
            fallback_subtask(&ctx, &subtask, &primary, reason, started, &mut run).await;
        }
    }

    run
}

/// One fallback retry: re-score with the failed primary excluded.
async fn fallback_subtask(
    ctx: &TaskContext,
    subtask: &Subtask,
    primary: &ModelSpec,
    reason: String,
    started: Instant,
    run: &mut SubtaskRun,
) {
    let rerouted = ctx
        .router
        .route_excluding(subtask, ctx.mode, std::slice::from_ref(&primary.id));

    let fallback_decision = match rerouted {
        Ok(decision) => decision,
        Err(_) => {
            run.error = Some(format!("no fallback available after {reason}"));
            run.assigned_model = Some(primary.id.clone());
            ctx.bus
                .publish(
                    ctx.request_id,
                    ProgressKind::ExecutionProgress,
                    serde_json::json!({
                        "subtask_id": subtask.id,
                        "status": "failed",
                        "model": primary.id,
                        "used_fallback": false,
                        "reason": reason,
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    }),
                )
                .await;
            return;
        }
    };

    let fallback = fallback_decision.model.clone();
    let mut entry = fallback_decision.entry.clone();
    entry.reason = format!("fallback after {reason} on {}: {}", primary.id, entry.reason);
    run.entries.push(entry);

    match attempt_model(ctx, subtask, &fallback).await {
        Ok(response) => {
            *run.provider_usage
                .entry(fallback.provider.to_string())
                .or_insert(0) += 1;
            run.assigned_model = Some(fallback.id.clone());
            run.responses.push(response);

            ctx.bus
                .publish(
                    ctx.request_id,
                    ProgressKind::ExecutionProgress,
                    serde_json::json!({
                        "subtask_id": subtask.id,
                        "status": "completed",
                        "model": fallback.id,
                        "used_fallback": true,
                        "primary_model_failed": primary.id,
                        "fallback_model": fallback.id,
                        "reason": reason,
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    }),
                )
                .await;
        }
        Err(AttemptFailure::Cancelled) => {
            run.cancelled = true;
        }
        Err(second_failure) => {
            run.error = Some(second_failure.sentence());
            run.assigned_model = Some(fallback.id.clone());
            warn!(
                subtask_id = %subtask.id,
                primary = %primary.id,
                fallback = %fallback.id,
                "fallback also failed, subtask is non-recoverable"
            );
            ctx.bus
                .publish(
                    ctx.request_id,
                    ProgressKind::ExecutionProgress,
                    serde_json::json!({
                        "subtask_id": subtask.id,
                        "status": "failed",
                        "model": fallback.id,
                        "used_fallback": true,
                        "primary_model_failed": primary.id,
                        "fallback_model": fallback.id,
                        "reason": second_failure.reason(),
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    }),
                )
                .await;
        }
    }
}

/// BEST_QUALITY sends high-risk subtasks to the runner-up as well so the
/// arbiter has competing answers to judge.
async fn maybe_dispatch_redundant(
    ctx: &TaskContext,
    subtask: &Subtask,
    decision: &RouteDecision,
    run: &mut SubtaskRun,
) {
    if ctx.mode != ExecutionMode::BestQuality || subtask.risk < ctx.redundant_min_risk {
        return;
    }
    let Some(runner_up) = decision.ranked.get(1).map(|c| c.model.clone()) else {
        return;
    };

    match attempt_model(ctx, subtask, &runner_up).await {
        Ok(response) => {
            *run.provider_usage
                .entry(runner_up.provider.to_string())
                .or_insert(0) += 1;
            run.entries.push(ProviderSelectionEntry {
                subtask_id: subtask.id,
                model_id: runner_up.id.clone(),
                reason: "redundant dispatch for arbitration".to_string(),
                alternatives: Vec::new(),
                snapshot: council_core::SelectionSnapshot {
                    unit_price: runner_up.unit_price(),
                    typical_latency_ms: runner_up.typical_latency_ms,
                    reliability: runner_up.reliability,
                },
            });
            run.responses.push(response);
        }
        Err(failure) => {
            // The primary already succeeded; a failed redundant call only
            // costs us the second opinion.
            debug!(
                subtask_id = %subtask.id,
                model = %runner_up.id,
                reason = %failure.reason(),
                "redundant dispatch failed"
            );
        }
    }
}

async fn attempt_model(
    ctx: &TaskContext,
    subtask: &Subtask,
    model: &ModelSpec,
) -> Result<AgentResponse, AttemptFailure> {
    if !ctx.breakers.try_acquire(model.provider) {
        return Err(AttemptFailure::BreakerOpen);
    }

    let Some(client) = ctx.clients.get(&model.provider) else {
        return Err(AttemptFailure::MissingClient);
    };

    let request = CompletionRequest::new(&model.id, &subtask.content)
        .with_system_prompt(&system_prompt_for(subtask.task_type))
        .with_parameters(Some(1024), Some(0.2));

    let outcome = match tokio::time::timeout(
        ctx.mode.deadline(),
        client.generate(&request, &ctx.cancel),
    )
    .await
    {
        Ok(inner) => inner,
        Err(_) => Err(ProviderError::Timeout(ctx.mode.deadline())),
    };

    match outcome {
        Ok(completion) => {
            ctx.breakers.record_success(model.provider);
            Ok(build_response(subtask, model, completion))
        }
        Err(ProviderError::Cancelled) => Err(AttemptFailure::Cancelled),
        Err(err) => {
            ctx.breakers.record_failure(model.provider);
            Err(AttemptFailure::Provider(err))
        }
    }
}

fn build_response(
    subtask: &Subtask,
    model: &ModelSpec,
    completion: CompletionResponse,
) -> AgentResponse {
    let mut assessment = SelfAssessment::new(
        assess_confidence(&completion.content),
        parse_risk_marker(&completion.content).unwrap_or(subtask.risk),
    );
    assessment.assumptions = extract_assumptions(&completion.content);
    assessment.input_tokens = completion.usage.input_tokens;
    assessment.output_tokens = completion.usage.output_tokens;
    assessment.elapsed_ms = completion.elapsed.as_millis() as u64;

    AgentResponse {
        subtask_id: subtask.id,
        model_id: model.id.clone(),
        content: completion.content,
        assessment,
        created_at: chrono::Utc::now(),
        success: true,
    }
}

fn system_prompt_for(task: TaskType) -> String {
    let role = match task {
        TaskType::Reasoning => "Reason step by step and give a clear conclusion.",
        TaskType::Research => "Survey what is known and cite the kind of source you rely on.",
        TaskType::CodeGeneration => "Produce working, idiomatic code with a short usage note.",
        TaskType::Debugging => "Diagnose the defect and propose the minimal fix.",
        TaskType::Creative => "Write with an original voice.",
        TaskType::FactCheck => "Judge the claims strictly; separate supported from unsupported.",
        TaskType::Verification => "Check the material against its requirements point by point.",
    };
    format!("{role} State any assumptions on their own line starting with 'Assuming'.")
}

/// Confidence read on a response: hedging and refusals lower it.
pub(crate) fn assess_confidence(content: &str) -> f64 {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return 0.1;
    }
    let lowered = trimmed.to_lowercase();
    if lowered.contains("i don't know") || lowered.contains("cannot answer") {
        return 0.3;
    }

    let hedges = HEDGE_MARKERS
        .iter()
        .filter(|marker| lowered.contains(*marker))
        .count();
    let mut confidence = 0.9 - 0.1 * hedges as f64;
    if trimmed.chars().count() < 20 {
        confidence -= 0.1;
    }
    confidence.clamp(0.1, 1.0)
}

/// Assumptions are lines or sentences the model marked as such, in order.
pub(crate) fn extract_assumptions(content: &str) -> Vec<String> {
    content
        .split(['\n', '.'])
        .map(str::trim)
        .filter(|sentence| {
            let lowered = sentence.to_lowercase();
            lowered.starts_with("assuming ")
                || lowered.starts_with("i assume")
                || lowered.starts_with("assumption:")
        })
        .map(str::to_string)
        .collect()
}

/// A response may override the inherited risk with an explicit marker.
pub(crate) fn parse_risk_marker(content: &str) -> Option<RiskLevel> {
    let lowered = content.to_lowercase();
    if lowered.contains("risk: critical") {
        Some(RiskLevel::Critical)
    } else if lowered.contains("risk: high") {
        Some(RiskLevel::High)
    } else if lowered.contains("risk: medium") {
        Some(RiskLevel::Medium)
    } else if lowered.contains("risk: low") {
        Some(RiskLevel::Low)
    } else {
        None
    }
}
