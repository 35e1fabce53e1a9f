#![allow(dead_code)]

use async_trait::async_trait;
use council_core::{
    ExecutionMode, ModelSpec, ProgressKind, ProgressMessage, ProviderError, ProviderKind,
    RequestId, TaskType,
};
use llm::{
    BreakerBoard, CompletionRequest, CompletionResponse, ModelRegistry, ProviderClient,
    ProviderHealth, TokenUsage,
};
use common::{ProgressBus, RateLimiter};
use orchestrator::{ControlPlane, InMemoryRequestStore, OrchestratorConfig, RequestResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Provider double with a scripted outcome queue. Once the queue drains
/// it keeps returning the fallback outcome.
pub struct ScriptedProvider {
    kind: ProviderKind,
    steps: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Result<String, ProviderError>,
    usage: TokenUsage,
    delay: Option<Duration>,
    pub calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            steps: Mutex::new(VecDeque::new()),
            fallback: Ok("scripted answer".to_string()),
            usage: TokenUsage::new(100, 10),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.fallback = Ok(reply.to_string());
        self
    }

    pub fn with_failure(mut self, error: ProviderError) -> Self {
        self.fallback = Err(error);
        self
    }

    pub fn with_steps(self, steps: Vec<Result<String, ProviderError>>) -> Self {
        *self.steps.lock() = steps.into();
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = TokenUsage::new(input_tokens, output_tokens);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let step = self.steps.lock().pop_front();
        match step.unwrap_or_else(|| self.fallback.clone()) {
            Ok(content) => Ok(CompletionResponse {
                content,
                usage: self.usage,
                model: request.model.clone(),
                elapsed: Duration::from_millis(5),
            }),
            Err(error) => Err(error),
        }
    }

    async fn health_check(&self) -> ProviderHealth {
        ProviderHealth::Healthy
    }
}

/// A model supporting every task type.
pub fn model(
    id: &str,
    provider: ProviderKind,
    unit_price: f64,
    latency_ms: u64,
    reliability: f64,
) -> ModelSpec {
    model_for(
        id,
        provider,
        TaskType::SPECIFICITY_ORDER.to_vec(),
        unit_price,
        latency_ms,
        reliability,
    )
}

pub fn model_for(
    id: &str,
    provider: ProviderKind,
    tasks: Vec<TaskType>,
    unit_price: f64,
    latency_ms: u64,
    reliability: f64,
) -> ModelSpec {
    ModelSpec {
        id: id.into(),
        provider,
        supported_tasks: tasks,
        input_price: unit_price / 2.0,
        output_price: unit_price / 2.0,
        typical_latency_ms: latency_ms,
        reliability,
        context_window: 128_000,
    }
}

pub struct TestPlane {
    pub plane: Arc<ControlPlane>,
    pub breakers: Arc<BreakerBoard>,
}

/// Assemble a control plane over scripted providers.
pub fn plane_with(
    models: Vec<ModelSpec>,
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
) -> TestPlane {
    let breakers = Arc::new(BreakerBoard::default());
    let plane = ControlPlane::with_parts(
        Arc::new(ModelRegistry::with_models(models)),
        clients,
        breakers.clone(),
        ProgressBus::default(),
        Arc::new(InMemoryRequestStore::new()),
        Arc::new(RateLimiter::new()),
        OrchestratorConfig {
            worker_budget: 8,
            max_cost_per_request: None,
        },
    );
    TestPlane { plane, breakers }
}

pub fn clients(
    pairs: Vec<(ProviderKind, Arc<ScriptedProvider>)>,
) -> HashMap<ProviderKind, Arc<dyn ProviderClient>> {
    pairs
        .into_iter()
        .map(|(kind, client)| (kind, client as Arc<dyn ProviderClient>))
        .collect()
}

/// Poll until the request reaches a terminal state.
pub async fn wait_result(plane: &Arc<ControlPlane>, id: RequestId) -> RequestResult {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        match plane.result(id).await.expect("result lookup") {
            RequestResult::InProgress { .. } => {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "request {id} did not finish in time"
                );
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            terminal => return terminal,
        }
    }
}

/// Drain a progress subscription until a terminal kind arrives.
pub async fn collect_stream(rx: &mut mpsc::Receiver<ProgressMessage>) -> Vec<ProgressMessage> {
    let mut messages = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("progress stream stalled")
            .expect("progress stream closed early");
        let terminal = message.kind.is_terminal();
        messages.push(message);
        if terminal {
            return messages;
        }
    }
}

pub fn kinds(messages: &[ProgressMessage]) -> Vec<ProgressKind> {
    messages
        .iter()
        .filter(|m| m.seq > 0)
        .map(|m| m.kind)
        .collect()
}

pub fn find<'a>(
    messages: &'a [ProgressMessage],
    kind: ProgressKind,
) -> Option<&'a ProgressMessage> {
    messages.iter().find(|m| m.kind == kind)
}

pub fn submit_args() -> (&'static str, ExecutionMode) {
    ("Say hello in one word", ExecutionMode::Fast)
}
