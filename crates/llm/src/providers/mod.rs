use async_trait::async_trait;
use council_core::{DeploymentMode, ProviderError, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod anthropic_provider;
pub mod groq_provider;
pub mod local_provider;
pub mod openai_provider;

pub use anthropic_provider::AnthropicProvider;
pub use groq_provider::GroqProvider;
pub use local_provider::LocalProvider;
pub use openai_provider::OpenAiProvider;

/// Request object handed to a provider client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt: prompt.to_string(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: &str) -> Self {
        self.system_prompt = Some(system_prompt.to_string());
        self
    }

    pub fn with_parameters(mut self, max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Rough fallback when a provider omits usage: ~4 characters per token.
    pub fn estimated(prompt: &str, completion: &str) -> Self {
        Self {
            input_tokens: (prompt.len() as u64).div_ceil(4),
            output_tokens: (completion.len() as u64).div_ceil(4),
        }
    }
}

/// Response object returned by a provider client.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub elapsed: Duration,
}

/// Health probe verdict for a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderHealth {
    Healthy,
    Degraded,
    Down,
}

/// Uniform capability over all LLM providers.
///
/// One implementation per provider family; the executor only ever talks
/// to this trait, which is what lets tests inject scripted providers.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn name(&self) -> String {
        self.kind().to_string()
    }

    /// Execute a completion. Implementations must honor `cancel` within
    /// their own I/O wait and surface failures as typed errors.
    async fn generate(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError>;

    async fn health_check(&self) -> ProviderHealth;
}

/// Map a reqwest failure onto the typed taxonomy.
pub(crate) fn classify_transport_error(err: reqwest::Error, deadline: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(deadline)
    } else if err.is_connect() {
        ProviderError::Transport(format!("connection failed: {err}"))
    } else {
        ProviderError::Transport(err.to_string())
    }
}

/// Latency threshold past which a successful health probe is reported as
/// degraded.
pub(crate) const DEGRADED_PROBE_LATENCY: Duration = Duration::from_secs(5);

/// Build clients for every provider whose credential variable resolves
/// and whose kind the deployment mode admits.
pub fn clients_from_env(deployment: DeploymentMode) -> HashMap<ProviderKind, Arc<dyn ProviderClient>> {
    let mut clients: HashMap<ProviderKind, Arc<dyn ProviderClient>> = HashMap::new();

    for kind in ProviderKind::ALL {
        if !deployment.admits(kind) {
            continue;
        }
        let Ok(credential) = std::env::var(kind.credential_var()) else {
            continue;
        };
        if credential.trim().is_empty() {
            continue;
        }

        let built: Result<Arc<dyn ProviderClient>, anyhow::Error> = match kind {
            ProviderKind::OpenAi => OpenAiProvider::new(credential).map(|p| Arc::new(p) as _),
            ProviderKind::Anthropic => AnthropicProvider::new(credential).map(|p| Arc::new(p) as _),
            ProviderKind::Groq => GroqProvider::new(credential).map(|p| Arc::new(p) as _),
            ProviderKind::Local => LocalProvider::new(credential).map(|p| Arc::new(p) as _),
        };

        match built {
            Ok(client) => {
                info!(provider = %kind, "provider client configured");
                clients.insert(kind, client);
            }
            Err(e) => warn!(provider = %kind, error = %e, "skipping misconfigured provider"),
        }
    }

    clients
}
