use super::subtask::TaskType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Provider family a model belongs to. One credential variable per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Groq,
    Local,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Groq,
        ProviderKind::Local,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Groq => "groq",
            ProviderKind::Local => "local",
        }
    }

    /// Environment variable holding this provider's credential or endpoint.
    pub fn credential_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Groq => "GROQ_API_KEY",
            ProviderKind::Local => "LOCAL_LLM_URL",
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, ProviderKind::Local)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment mode filters the registry catalog by provider locality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentMode {
    Local,
    Cloud,
    #[default]
    Hybrid,
}

impl DeploymentMode {
    pub const ENV_VAR: &'static str = "COUNCIL_DEPLOYMENT";

    pub fn from_env() -> Self {
        std::env::var(Self::ENV_VAR)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub fn admits(&self, provider: ProviderKind) -> bool {
        match self {
            DeploymentMode::Local => !provider.is_remote(),
            DeploymentMode::Cloud => provider.is_remote(),
            DeploymentMode::Hybrid => true,
        }
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(DeploymentMode::Local),
            "CLOUD" => Ok(DeploymentMode::Cloud),
            "HYBRID" => Ok(DeploymentMode::Hybrid),
            other => Err(format!("unknown deployment mode: {other}")),
        }
    }
}

/// Catalog record for a language model. Loaded at startup, immutable per
/// process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub provider: ProviderKind,
    pub supported_tasks: Vec<TaskType>,
    /// USD per input token.
    pub input_price: f64,
    /// USD per output token.
    pub output_price: f64,
    pub typical_latency_ms: u64,
    /// Historical success rate in [0, 1].
    pub reliability: f64,
    pub context_window: u32,
}

impl ModelSpec {
    pub fn supports(&self, task: TaskType) -> bool {
        self.supported_tasks.contains(&task)
    }

    /// Combined per-token price used for candidate scoring and tie-breaks.
    pub fn unit_price(&self) -> f64 {
        self.input_price + self.output_price
    }

    pub fn run_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 * self.input_price + output_tokens as f64 * self.output_price
    }
}

/// Circuit breaker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Observable snapshot of one provider's breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerRecord {
    pub provider: ProviderKind,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub next_probe_at: Option<DateTime<Utc>>,
}
