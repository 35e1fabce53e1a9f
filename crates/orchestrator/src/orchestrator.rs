use crate::analysis::{truncate, QueryAnalyzer};
use crate::arbiter::{Arbiter, ArbitrationOutcome};
use crate::decomposer::Decomposer;
use crate::executor::Executor;
use crate::synthesizer::{SynthesisInput, Synthesizer};
use chrono::Utc;
use common::ProgressBus;
use council_core::{
    AgentResponse, CouncilResult, FinalResponse, OrchestrationError, ProgressKind, ProviderKind,
    Request, RequestStatus, RequestStore, SubtaskId, SubtaskStatus,
};
use llm::{BreakerBoard, CostEngine, ModelRegistry, ProviderClient};
use router::{RouteDecision, Router};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Global cap on concurrent provider calls across all requests.
    pub worker_budget: usize,
    /// Advisory per-request cost ceiling; exceeding the estimate logs a
    /// warning and nothing more.
    pub max_cost_per_request: Option<f64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_budget: 16,
            max_cost_per_request: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let worker_budget = std::env::var("COUNCIL_WORKER_BUDGET")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(16);
        let max_cost_per_request = std::env::var("COUNCIL_MAX_COST_PER_REQUEST")
            .ok()
            .and_then(|v| v.parse().ok());
        Self {
            worker_budget,
            max_cost_per_request,
        }
    }
}

/// Drives one request through the full pipeline and owns every mutation
/// of its state along the way.
pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    router: Arc<Router>,
    executor: Executor,
    arbiter: Arbiter,
    synthesizer: Synthesizer,
    analyzer: QueryAnalyzer,
    decomposer: Decomposer,
    cost_engine: Arc<CostEngine>,
    bus: ProgressBus,
    store: Arc<dyn RequestStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ModelRegistry>,
        clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
        breakers: Arc<BreakerBoard>,
        bus: ProgressBus,
        store: Arc<dyn RequestStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let router = Arc::new(Router::new(registry.clone(), breakers.clone()));
        let executor = Executor::new(
            clients,
            breakers,
            router.clone(),
            bus.clone(),
            config.worker_budget,
        );
        let cost_engine = Arc::new(CostEngine::new(registry.clone()));
        Self {
            arbiter: Arbiter::new(registry.clone()),
            registry,
            router,
            executor,
            synthesizer: Synthesizer::new(),
            analyzer: QueryAnalyzer::new(),
            decomposer: Decomposer::new(),
            cost_engine,
            bus,
            store,
            config,
        }
    }

    pub fn cost_engine(&self) -> Arc<CostEngine> {
        self.cost_engine.clone()
    }

    /// Drive a request to a terminal state, persisting along the way.
    /// The progress stream ends with exactly one of `final_response`,
    /// `error`, or `cancelled`.
    pub async fn process(
        &self,
        mut request: Request,
        cancel: CancellationToken,
    ) -> CouncilResult<FinalResponse> {
        request.status = RequestStatus::Running;
        self.store.put_request(&request).await?;
        info!(request_id = %request.id, mode = %request.mode, "request started");

        // Terminal events are published only after the terminal state is
        // persisted, so a consumer reacting to the stream always finds
        // the matching status and result behind it.
        match self.run_pipeline(&mut request, &cancel).await {
            Ok(final_response) => {
                request.status = RequestStatus::Succeeded;
                request.completed_at = Some(Utc::now());
                self.store.put_request(&request).await?;
                self.store.put_final(request.id, &final_response).await?;
                self.bus
                    .publish(
                        request.id,
                        ProgressKind::FinalResponse,
                        serde_json::json!({ "response": final_response }),
                    )
                    .await;
                info!(request_id = %request.id, "request succeeded");
                Ok(final_response)
            }
            Err(OrchestrationError::Cancelled) => {
                request.status = RequestStatus::Cancelled;
                request.completed_at = Some(Utc::now());
                request.error = Some("CANCELLED: request was cancelled".to_string());
                self.store.put_request(&request).await?;
                self.bus
                    .publish(
                        request.id,
                        ProgressKind::Cancelled,
                        serde_json::json!({ "request_id": request.id }),
                    )
                    .await;
                info!(request_id = %request.id, "request cancelled");
                Err(OrchestrationError::Cancelled)
            }
            Err(err) => {
                let code = err.error_code();
                request.status = RequestStatus::Failed;
                request.completed_at = Some(Utc::now());
                request.error = Some(format!("{code}: {err}"));
                self.store.put_request(&request).await?;
                self.bus
                    .publish(
                        request.id,
                        ProgressKind::Error,
                        serde_json::json!({ "code": code, "message": err.to_string() }),
                    )
                    .await;
                error!(request_id = %request.id, code, error = %err, "request failed");
                Err(err)
            }
        }
    }

    async fn run_pipeline(
        &self,
        request: &mut Request,
        cancel: &CancellationToken,
    ) -> CouncilResult<FinalResponse> {
        if self.registry.is_empty() {
            return Err(OrchestrationError::NoProviders);
        }

        // Analysis.
        self.bus
            .publish(
                request.id,
                ProgressKind::AnalysisStarted,
                serde_json::json!({ "prompt_chars": request.prompt.chars().count() }),
            )
            .await;
        let analysis = self.analyzer.analyze(&request.prompt);
        self.bus
            .publish(
                request.id,
                ProgressKind::AnalysisComplete,
                serde_json::json!({
                    "intent": analysis.intent,
                    "complexity": analysis.complexity,
                }),
            )
            .await;
        self.ensure_live(cancel)?;

        // Decomposition.
        let mut subtasks = self.decomposer.decompose(request, &analysis);
        let estimate = self
            .cost_engine
            .estimate(request.prompt.chars().count(), request.mode);
        let per_subtask = estimate.estimated_cost / subtasks.len().max(1) as f64;
        for subtask in &mut subtasks {
            subtask.estimated_cost = per_subtask;
        }
        if let Some(cap) = self.config.max_cost_per_request {
            if estimate.estimated_cost > cap {
                warn!(
                    request_id = %request.id,
                    estimated = estimate.estimated_cost,
                    cap,
                    "estimated cost exceeds the advisory per-request ceiling"
                );
            }
        }
        self.store.put_subtasks(request.id, &subtasks).await?;
        self.bus
            .publish(
                request.id,
                ProgressKind::DecompositionComplete,
                serde_json::json!({
                    "count": subtasks.len(),
                    "subtasks": subtasks.iter().map(|s| serde_json::json!({
                        "id": s.id,
                        "task_type": s.task_type,
                        "content": truncate(&s.content, 120),
                    })).collect::<Vec<_>>(),
                }),
            )
            .await;
        self.ensure_live(cancel)?;

        // Routing.
        let mut selection_log = Vec::new();
        let mut decisions: Vec<(SubtaskId, RouteDecision)> = Vec::new();
        let mut failures: HashMap<SubtaskId, String> = HashMap::new();
        for subtask in &mut subtasks {
            match self.router.route(subtask, request.mode) {
                Ok(decision) => {
                    subtask.assigned_model = Some(decision.model.id.clone());
                    subtask.status = SubtaskStatus::Routed;
                    selection_log.push(decision.entry.clone());
                    decisions.push((subtask.id, decision));
                }
                Err(err) => {
                    subtask.status = SubtaskStatus::Failed;
                    failures.insert(subtask.id, err.to_string());
                }
            }
        }
        if decisions.is_empty() {
            return Err(OrchestrationError::OrchestrationFailed(
                "no subtask could be routed to a model".to_string(),
            ));
        }
        self.bus
            .publish(
                request.id,
                ProgressKind::RoutingComplete,
                serde_json::json!({
                    "assignments": decisions.iter().map(|(id, d)| serde_json::json!({
                        "subtask_id": id,
                        "model": d.model.id,
                    })).collect::<Vec<_>>(),
                    "unroutable": failures.len(),
                }),
            )
            .await;
        self.ensure_live(cancel)?;

        // Execution.
        let outcome = self
            .executor
            .execute(request, &mut subtasks, decisions, cancel)
            .await?;
        selection_log.extend(outcome.entries.clone());
        failures.extend(outcome.failures.clone());

        self.store
            .put_responses(request.id, &outcome.responses)
            .await?;
        self.store.put_subtasks(request.id, &subtasks).await?;

        if outcome.responses.is_empty() {
            return Err(OrchestrationError::OrchestrationFailed(format!(
                "all {} subtasks failed",
                subtasks.len()
            )));
        }

        // Arbitration.
        let mut grouped: HashMap<SubtaskId, Vec<AgentResponse>> = HashMap::new();
        for response in &outcome.responses {
            grouped
                .entry(response.subtask_id)
                .or_default()
                .push(response.clone());
        }
        let mut outcomes: HashMap<SubtaskId, ArbitrationOutcome> = HashMap::new();
        for (subtask_id, responses) in grouped {
            let (verdict, payload) = self.arbiter.arbitrate(subtask_id, responses);
            if let Some(payload) = payload {
                self.bus
                    .publish(request.id, ProgressKind::ArbitrationDecision, payload)
                    .await;
            }
            outcomes.insert(subtask_id, verdict);
        }
        for finding in self.arbiter.detect_contradictions(&outcome.responses) {
            self.bus
                .publish(request.id, ProgressKind::ArbitrationDecision, finding)
                .await;
        }
        self.ensure_live(cancel)?;

        // Synthesis.
        self.bus
            .publish(
                request.id,
                ProgressKind::SynthesisStarted,
                serde_json::json!({ "responses": outcome.responses.len() }),
            )
            .await;

        let cost = match self.cost_engine.actual_cost(&outcome.responses) {
            Ok(cost) => cost,
            Err(err) => {
                // Integrity violations become orchestration failures.
                error!(request_id = %request.id, error = %err, "cost accounting failed");
                return Err(OrchestrationError::OrchestrationFailed(err.to_string()));
            }
        };
        // Observable but never user-facing, and never fatal.
        let _ = self.cost_engine.check_discrepancy(
            request.id,
            request.mode,
            estimate.estimated_cost,
            cost.total_cost,
        );

        let final_response = self.synthesizer.synthesize(SynthesisInput {
            subtasks: subtasks.clone(),
            outcomes,
            failures,
            cost,
            selection_log,
            provider_usage: outcome.provider_usage,
        });

        Ok(final_response)
    }

    fn ensure_live(&self, cancel: &CancellationToken) -> CouncilResult<()> {
        if cancel.is_cancelled() {
            Err(OrchestrationError::Cancelled)
        } else {
            Ok(())
        }
    }
}
