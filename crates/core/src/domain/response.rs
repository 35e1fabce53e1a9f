use super::subtask::{RiskLevel, SubtaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured metadata returned with every model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfAssessment {
    /// Model confidence in [0, 1].
    pub confidence: f64,
    /// Assumptions extracted from the response text, in order of
    /// appearance; may be empty.
    pub assumptions: Vec<String>,
    pub risk: RiskLevel,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub elapsed_ms: u64,
}

impl SelfAssessment {
    pub fn new(confidence: f64, risk: RiskLevel) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
            assumptions: Vec::new(),
            risk,
            input_tokens: 0,
            output_tokens: 0,
            elapsed_ms: 0,
        }
    }
}

/// A single model's answer to one subtask. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub subtask_id: SubtaskId,
    pub model_id: String,
    pub content: String,
    pub assessment: SelfAssessment,
    pub created_at: DateTime<Utc>,
    pub success: bool,
}

impl AgentResponse {
    /// Cost of this run given the model's per-token prices.
    pub fn cost(&self, input_price: f64, output_price: f64) -> f64 {
        self.assessment.input_tokens as f64 * input_price
            + self.assessment.output_tokens as f64 * output_price
    }
}

/// Per-subtask slice of the cost breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskCost {
    pub subtask_id: SubtaskId,
    pub model_id: String,
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Per-model slice of the cost breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCost {
    pub model_id: String,
    pub calls: u32,
    pub cost: f64,
}

/// Explicit cost accounting record attached to every final response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub total_cost: f64,
    pub by_subtask: Vec<SubtaskCost>,
    pub by_model: Vec<ModelCost>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

/// Cost/latency/reliability snapshot taken at selection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionSnapshot {
    pub unit_price: f64,
    pub typical_latency_ms: u64,
    pub reliability: f64,
}

/// Audit record of one routing decision. On fallback the prior selection
/// entry is retained, so the log tells the full story of a subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSelectionEntry {
    pub subtask_id: SubtaskId,
    pub model_id: String,
    pub reason: String,
    /// Top-3 runner-up model ids at selection time.
    pub alternatives: Vec<String>,
    pub snapshot: SelectionSnapshot,
}

/// The synthesized answer returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResponse {
    pub text: String,
    /// Weighted mean of subtask confidences, weighted by content length.
    pub confidence: f64,
    pub cost: CostBreakdown,
    pub models_used: Vec<String>,
    /// Successful calls per provider.
    pub provider_usage: BTreeMap<String, u32>,
    pub selection_log: Vec<ProviderSelectionEntry>,
}
