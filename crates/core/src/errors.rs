use crate::domain::request::RequestId;
use crate::domain::subtask::TaskType;
use std::time::Duration;
use thiserror::Error;

/// Typed failures from a provider client. These are routed through the
/// circuit breaker and the fallback path, never raw to the caller.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("provider rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    InvalidResponse(String),

    #[error("call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transient failures are worth a fallback attempt; auth and malformed
    /// responses are not fixed by retrying elsewhere with the same config.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Transport(_)
                | ProviderError::Server { .. }
        )
    }

    /// Short stable label used in breaker logs and progress payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::RateLimited { .. } => "rate limit",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Transport(_) => "transport",
            ProviderError::Auth(_) => "auth",
            ProviderError::Server { .. } => "server error",
            ProviderError::InvalidResponse(_) => "invalid response",
            ProviderError::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status into a typed provider error.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ProviderError::Auth(message),
            408 => ProviderError::Timeout(Duration::from_secs(0)),
            429 => ProviderError::RateLimited { retry_after: None },
            s if s >= 500 => ProviderError::Server { status: s, message },
            _ => ProviderError::InvalidResponse(message),
        }
    }
}

/// Kernel-level failure taxonomy. Every variant carries a stable error
/// code and renders as a single human-readable sentence.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rate limit exceeded, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("no providers are available")]
    NoProviders,

    #[error("no model can serve task type {task_type}")]
    NoRoute { task_type: TaskType },

    #[error("orchestration failed: {0}")]
    OrchestrationFailed(String),

    #[error("internal invariant violated: {0}")]
    Integrity(String),

    #[error("request was cancelled")]
    Cancelled,

    #[error("unknown request: {0}")]
    NotFound(RequestId),

    #[error("storage failure: {0}")]
    Store(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl OrchestrationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            OrchestrationError::InvalidInput(_) => "INVALID_INPUT",
            OrchestrationError::RateLimited { .. } => "RATE_LIMITED",
            OrchestrationError::NoProviders => "NO_PROVIDERS",
            OrchestrationError::NoRoute { .. } => "NO_ROUTE",
            OrchestrationError::OrchestrationFailed(_) => "ORCHESTRATION_FAILED",
            OrchestrationError::Integrity(_) => "INTEGRITY",
            OrchestrationError::Cancelled => "CANCELLED",
            OrchestrationError::NotFound(_) => "NOT_FOUND",
            OrchestrationError::Store(_) => "STORE",
            OrchestrationError::Provider(_) => "PROVIDER",
        }
    }
}

pub type CouncilResult<T> = Result<T, OrchestrationError>;
