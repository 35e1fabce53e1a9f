//! Provider layer for the council control plane.
//!
//! Uniform [`ProviderClient`] capability over the supported LLM
//! providers, the per-provider circuit breaker board, the model
//! registry, and the cost engine.

pub mod circuit_breaker;
pub mod cost;
pub mod providers;
pub mod registry;

pub use circuit_breaker::{BreakerBoard, BreakerConfig, CircuitBreaker};
pub use cost::{CostDiscrepancy, CostEngine, CostEstimate, ModeEstimates};
pub use providers::{
    clients_from_env, CompletionRequest, CompletionResponse, ProviderClient, ProviderHealth,
    TokenUsage,
};
pub use registry::ModelRegistry;
