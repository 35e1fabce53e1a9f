use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::store::InMemoryRequestStore;
use chrono::{DateTime, Utc};
use common::{validate_prompt, ProgressBus, RateLimiter};
use council_core::{
    BreakerRecord, ClientMessage, CouncilResult, DeploymentMode, ExecutionMode, FinalResponse,
    HistoryFilter, OrchestrationError, ProgressMessage, ProviderKind, Request, RequestId,
    RequestStatus, RequestStore, Role,
};
use dashmap::DashMap;
use llm::{clients_from_env, BreakerBoard, ModeEstimates, ModelRegistry, ProviderClient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Answer to a status query.
#[derive(Debug, Clone)]
pub struct StatusView {
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Answer to a result query.
#[derive(Debug, Clone)]
pub enum RequestResult {
    Completed(FinalResponse),
    InProgress { status: RequestStatus },
    Failed { error: String },
    Cancelled,
}

/// Operational snapshot served to operators.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub available_models: Vec<String>,
    pub breakers: Vec<BreakerRecord>,
    pub active_requests: usize,
}

/// The control-plane facade in front of the pipeline: validation, rate
/// limiting, submission, progress streaming, history, estimation, and
/// cancellation.
pub struct ControlPlane {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<ModelRegistry>,
    breakers: Arc<BreakerBoard>,
    store: Arc<dyn RequestStore>,
    bus: ProgressBus,
    limiter: Arc<RateLimiter>,
    active: DashMap<RequestId, CancellationToken>,
}

impl ControlPlane {
    /// Assemble a control plane from explicitly constructed components.
    /// Tests inject alternates through this constructor.
    pub fn with_parts(
        registry: Arc<ModelRegistry>,
        clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
        breakers: Arc<BreakerBoard>,
        bus: ProgressBus,
        store: Arc<dyn RequestStore>,
        limiter: Arc<RateLimiter>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            clients,
            breakers.clone(),
            bus.clone(),
            store.clone(),
            config,
        ));
        Arc::new(Self {
            orchestrator,
            registry,
            breakers,
            store,
            bus,
            limiter,
            active: DashMap::new(),
        })
    }

    /// Default assembly over the in-memory store.
    pub fn new(
        registry: Arc<ModelRegistry>,
        clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Self::with_parts(
            registry,
            clients,
            Arc::new(BreakerBoard::default()),
            ProgressBus::default(),
            Arc::new(InMemoryRequestStore::new()),
            Arc::new(RateLimiter::new()),
            config,
        )
    }

    /// Bootstrap from the process environment: `.env`, per-provider
    /// credentials, deployment mode, worker budget.
    pub async fn from_env() -> Arc<Self> {
        dotenv::dotenv().ok();
        let deployment = DeploymentMode::from_env();
        let clients = clients_from_env(deployment);
        let registry = Arc::new(ModelRegistry::load_available(&clients, deployment).await);
        if registry.is_empty() {
            warn!("no providers configured; submissions will fail with NO_PROVIDERS");
        }
        Self::new(registry, clients, OrchestratorConfig::from_env())
    }

    /// Start the progress-bus housekeeper (heartbeats, idle closing, TTL).
    pub fn start_housekeeper(&self) -> JoinHandle<()> {
        self.bus.start_housekeeper()
    }

    /// Accept a request: validate, rate limit, persist, and launch the
    /// pipeline in the background. Returns the request id immediately.
    pub async fn submit(
        self: &Arc<Self>,
        principal: &str,
        role: Role,
        prompt: &str,
        mode: ExecutionMode,
    ) -> CouncilResult<RequestId> {
        validate_prompt(prompt)?;
        self.limiter.check_and_record(principal, role)?;
        if self.registry.is_empty() {
            return Err(OrchestrationError::NoProviders);
        }

        let request = Request::new(principal, role, prompt, mode);
        let id = request.id;
        self.store.put_request(&request).await?;

        let token = CancellationToken::new();
        self.active.insert(id, token.clone());

        let plane = self.clone();
        tokio::spawn(async move {
            // Terminal status and events are the orchestrator's job; the
            // error has already been recorded when this resolves.
            let _ = plane.orchestrator.process(request, token).await;
            plane.active.remove(&id);
        });

        info!(request_id = %id, principal, "request accepted");
        Ok(id)
    }

    pub async fn status(&self, id: RequestId) -> CouncilResult<StatusView> {
        let request = self
            .store
            .get_request(id)
            .await?
            .ok_or(OrchestrationError::NotFound(id))?;
        Ok(StatusView {
            status: request.status,
            created_at: request.created_at,
            completed_at: request.completed_at,
        })
    }

    pub async fn result(&self, id: RequestId) -> CouncilResult<RequestResult> {
        let request = self
            .store
            .get_request(id)
            .await?
            .ok_or(OrchestrationError::NotFound(id))?;

        match request.status {
            RequestStatus::Succeeded => {
                let final_response = self.store.get_final(id).await?.ok_or_else(|| {
                    OrchestrationError::Integrity("final response missing for succeeded request".into())
                })?;
                Ok(RequestResult::Completed(final_response))
            }
            RequestStatus::Failed => Ok(RequestResult::Failed {
                error: request
                    .error
                    .unwrap_or_else(|| "ORCHESTRATION_FAILED: request failed".to_string()),
            }),
            RequestStatus::Cancelled => Ok(RequestResult::Cancelled),
            status => Ok(RequestResult::InProgress { status }),
        }
    }

    /// Cancel an in-flight request. Returns whether a pipeline was
    /// actually signalled.
    pub async fn cancel(&self, id: RequestId) -> CouncilResult<bool> {
        if let Some(entry) = self.active.get(&id) {
            entry.value().cancel();
            info!(request_id = %id, "cancellation signalled");
            return Ok(true);
        }
        // Nothing in flight; report whether the id is known at all.
        self.store
            .get_request(id)
            .await?
            .ok_or(OrchestrationError::NotFound(id))?;
        Ok(false)
    }

    /// Subscribe to a request's progress stream from `since_seq`.
    pub async fn subscribe_progress(
        &self,
        id: RequestId,
        since_seq: u64,
    ) -> mpsc::Receiver<ProgressMessage> {
        self.bus.subscribe(id, since_seq).await
    }

    /// Handle an upstream client message; `reconnect` yields a fresh
    /// subscription.
    pub async fn handle_client_message(
        &self,
        id: RequestId,
        message: ClientMessage,
    ) -> Option<mpsc::Receiver<ProgressMessage>> {
        match message {
            ClientMessage::Ack { seq } => {
                self.bus.acknowledge(id, seq).await;
                None
            }
            ClientMessage::HeartbeatResponse => {
                self.bus.touch(id).await;
                None
            }
            ClientMessage::Reconnect { since_seq } => {
                Some(self.bus.subscribe(id, since_seq).await)
            }
        }
    }

    /// Paged per-principal history, newest first.
    pub async fn history(
        &self,
        principal: &str,
        filter: &HistoryFilter,
        page: usize,
        page_size: usize,
    ) -> CouncilResult<Vec<Request>> {
        self.store
            .list_requests(principal, filter, page, page_size)
            .await
    }

    /// Ex-ante estimates for all modes at the given prompt length.
    pub fn estimate(&self, prompt_length: usize) -> ModeEstimates {
        self.orchestrator.cost_engine().estimate_all(prompt_length)
    }

    /// Drop a request and everything hanging off it, including its
    /// progress mailbox. In-flight pipelines are cancelled first.
    pub async fn forget(&self, id: RequestId) -> CouncilResult<()> {
        if let Some(entry) = self.active.get(&id) {
            entry.value().cancel();
        }
        self.store.delete_request(id).await?;
        self.bus.retire(id).await;
        Ok(())
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            available_models: self
                .registry
                .all()
                .iter()
                .map(|m| format!("{} ({})", m.id, m.provider))
                .collect(),
            breakers: self.breakers.snapshots(),
            active_requests: self.active.len(),
        }
    }
}
