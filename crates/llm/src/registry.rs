use crate::providers::{ProviderClient, ProviderHealth};
use council_core::{DeploymentMode, ModelSpec, ProviderKind, TaskType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Static catalog of the models the control plane can route to.
///
/// Built once at startup from the built-in catalog filtered by deployment
/// mode, configured credentials, and a health probe per provider;
/// immutable afterwards and shared read-only.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
}

impl ModelRegistry {
    /// Registry over an explicit model list. Tests and embedders use this
    /// to inject alternates.
    pub fn with_models(models: Vec<ModelSpec>) -> Self {
        Self { models }
    }

    /// Load the available subset of the built-in catalog: the provider is
    /// admitted by the deployment mode, has a configured client, and its
    /// health probe does not come back down.
    pub async fn load_available(
        clients: &HashMap<ProviderKind, Arc<dyn ProviderClient>>,
        deployment: DeploymentMode,
    ) -> Self {
        let mut healthy: HashMap<ProviderKind, bool> = HashMap::new();
        for (kind, client) in clients {
            let health = client.health_check().await;
            let usable = health != ProviderHealth::Down;
            if !usable {
                warn!(provider = %kind, "provider failed startup health probe, excluding");
            }
            healthy.insert(*kind, usable);
        }

        let models: Vec<ModelSpec> = Self::builtin_catalog()
            .into_iter()
            .filter(|spec| {
                deployment.admits(spec.provider)
                    && healthy.get(&spec.provider).copied().unwrap_or(false)
            })
            .collect();

        info!(
            available = models.len(),
            deployment = ?deployment,
            "model registry loaded"
        );
        Self { models }
    }

    /// The full catalog before availability filtering. Prices are USD per
    /// token; latency and reliability come from observed service behavior.
    pub fn builtin_catalog() -> Vec<ModelSpec> {
        use TaskType::*;
        vec![
            ModelSpec {
                id: "gpt-4o".into(),
                provider: ProviderKind::OpenAi,
                supported_tasks: vec![
                    Reasoning,
                    Research,
                    CodeGeneration,
                    Debugging,
                    Creative,
                    FactCheck,
                    Verification,
                ],
                input_price: 2.5e-6,
                output_price: 1.0e-5,
                typical_latency_ms: 1400,
                reliability: 0.98,
                context_window: 128_000,
            },
            ModelSpec {
                id: "gpt-4o-mini".into(),
                provider: ProviderKind::OpenAi,
                supported_tasks: vec![Reasoning, Research, Creative, FactCheck, Verification],
                input_price: 1.5e-7,
                output_price: 6.0e-7,
                typical_latency_ms: 800,
                reliability: 0.97,
                context_window: 128_000,
            },
            ModelSpec {
                id: "claude-3-5-sonnet-20241022".into(),
                provider: ProviderKind::Anthropic,
                supported_tasks: vec![
                    Reasoning,
                    Research,
                    CodeGeneration,
                    Debugging,
                    Creative,
                    FactCheck,
                    Verification,
                ],
                input_price: 3.0e-6,
                output_price: 1.5e-5,
                typical_latency_ms: 1600,
                reliability: 0.98,
                context_window: 200_000,
            },
            ModelSpec {
                id: "claude-3-haiku-20240307".into(),
                provider: ProviderKind::Anthropic,
                supported_tasks: vec![Research, Creative, FactCheck, Verification],
                input_price: 2.5e-7,
                output_price: 1.25e-6,
                typical_latency_ms: 600,
                reliability: 0.96,
                context_window: 200_000,
            },
            ModelSpec {
                id: "llama-3.1-70b-versatile".into(),
                provider: ProviderKind::Groq,
                supported_tasks: vec![Reasoning, Research, CodeGeneration, Debugging, Creative],
                input_price: 5.9e-7,
                output_price: 7.9e-7,
                typical_latency_ms: 400,
                reliability: 0.94,
                context_window: 131_072,
            },
            ModelSpec {
                id: "llama-3.1-8b-instant".into(),
                provider: ProviderKind::Groq,
                supported_tasks: vec![Research, Creative, FactCheck, Verification],
                input_price: 5.0e-8,
                output_price: 8.0e-8,
                typical_latency_ms: 250,
                reliability: 0.92,
                context_window: 131_072,
            },
            ModelSpec {
                id: "llama3:8b".into(),
                provider: ProviderKind::Local,
                supported_tasks: vec![Reasoning, Research, CodeGeneration, Creative],
                input_price: 0.0,
                output_price: 0.0,
                typical_latency_ms: 2500,
                reliability: 0.90,
                context_window: 8_192,
            },
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn all(&self) -> &[ModelSpec] {
        &self.models
    }

    /// All models supporting the given task type.
    pub fn by_task_type(&self, task: TaskType) -> Vec<&ModelSpec> {
        self.models.iter().filter(|m| m.supports(task)).collect()
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == model_id)
    }
}
