//! Provider selection engine.
//!
//! For every subtask the router builds the candidate set (models that
//! support the task type, are available, and whose breaker admits
//! dispatch), scores each candidate on a weighted blend of availability,
//! cost, latency, capability breadth, and reliability, and picks the
//! maximum with deterministic tie-breaking. Fallback after a provider
//! failure is the same scoring pass with the failed model excluded.

use council_core::{
    CouncilResult, ExecutionMode, ModelSpec, OrchestrationError, ProviderSelectionEntry,
    SelectionSnapshot, Subtask,
};
use llm::{BreakerBoard, ModelRegistry};
use std::sync::Arc;
use tracing::debug;

pub const WEIGHT_AVAILABILITY: f64 = 0.40;
pub const WEIGHT_COST: f64 = 0.25;
pub const WEIGHT_LATENCY: f64 = 0.15;
pub const WEIGHT_CAPABILITY: f64 = 0.10;
pub const WEIGHT_RELIABILITY: f64 = 0.10;

/// BEST_QUALITY boosts the reliability component before scoring.
const BEST_QUALITY_RELIABILITY_BOOST: f64 = 1.5;

/// Individual score components on the 0..=100 scale, pre-weighting.
#[derive(Debug, Clone, Copy)]
pub struct ScoreComponents {
    pub availability: f64,
    pub cost: f64,
    pub latency: f64,
    pub capability: f64,
    pub reliability: f64,
}

/// One scored member of the candidate set.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub model: ModelSpec,
    pub score: f64,
    pub components: ScoreComponents,
}

/// Outcome of one routing pass.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub model: ModelSpec,
    pub entry: ProviderSelectionEntry,
    /// Full ranking, best first; used for redundant dispatch.
    pub ranked: Vec<ScoredCandidate>,
}

pub struct Router {
    registry: Arc<ModelRegistry>,
    breakers: Arc<BreakerBoard>,
}

impl Router {
    pub fn new(registry: Arc<ModelRegistry>, breakers: Arc<BreakerBoard>) -> Self {
        Self { registry, breakers }
    }

    /// Select the best model for a subtask.
    pub fn route(&self, subtask: &Subtask, mode: ExecutionMode) -> CouncilResult<RouteDecision> {
        self.route_excluding(subtask, mode, &[])
    }

    /// Select the best model with some model ids excluded (fallback after
    /// failure re-scores without the failed primary).
    pub fn route_excluding(
        &self,
        subtask: &Subtask,
        mode: ExecutionMode,
        exclude: &[String],
    ) -> CouncilResult<RouteDecision> {
        let mut candidates: Vec<&ModelSpec> = self
            .registry
            .by_task_type(subtask.task_type)
            .into_iter()
            .filter(|m| !exclude.contains(&m.id))
            .filter(|m| self.breakers.is_dispatchable(m.provider))
            .collect();

        if candidates.is_empty() {
            return Err(OrchestrationError::NoRoute {
                task_type: subtask.task_type,
            });
        }

        // Accuracy requirement is a soft filter: it narrows to reliable
        // candidates when possible but never empties the set.
        if subtask.accuracy_requirement > 0.0 {
            let strict: Vec<&ModelSpec> = candidates
                .iter()
                .copied()
                .filter(|m| m.reliability >= subtask.accuracy_requirement)
                .collect();
            if !strict.is_empty() {
                candidates = strict;
            }
        }

        // FAST drops candidates slower than the median latency of the set.
        if mode == ExecutionMode::Fast && candidates.len() > 1 {
            let mut latencies: Vec<u64> =
                candidates.iter().map(|m| m.typical_latency_ms).collect();
            latencies.sort_unstable();
            let median = latencies[(latencies.len() - 1) / 2];
            candidates.retain(|m| m.typical_latency_ms <= median);
        }

        let mut ranked = score_candidates(&candidates, mode);
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.model.unit_price().total_cmp(&b.model.unit_price()))
                .then_with(|| a.model.typical_latency_ms.cmp(&b.model.typical_latency_ms))
                .then_with(|| a.model.id.cmp(&b.model.id))
        });

        let selected = ranked[0].clone();
        let alternatives: Vec<String> = ranked
            .iter()
            .skip(1)
            .take(3)
            .map(|c| c.model.id.clone())
            .collect();

        debug!(
            subtask = %subtask.id,
            task_type = %subtask.task_type,
            model = %selected.model.id,
            score = selected.score,
            candidates = ranked.len(),
            "routing decision"
        );

        let entry = ProviderSelectionEntry {
            subtask_id: subtask.id,
            model_id: selected.model.id.clone(),
            reason: format!(
                "highest score {:.2} of {} candidates for {} in {} mode",
                selected.score,
                ranked.len(),
                subtask.task_type,
                mode
            ),
            alternatives,
            snapshot: SelectionSnapshot {
                unit_price: selected.model.unit_price(),
                typical_latency_ms: selected.model.typical_latency_ms,
                reliability: selected.model.reliability,
            },
        };

        Ok(RouteDecision {
            model: selected.model.clone(),
            entry,
            ranked,
        })
    }
}

/// Score a candidate set. Normalizations are taken over the set itself so
/// the scale is stable per invocation.
fn score_candidates(candidates: &[&ModelSpec], mode: ExecutionMode) -> Vec<ScoredCandidate> {
    let min_price = candidates
        .iter()
        .map(|m| m.unit_price())
        .fold(f64::INFINITY, f64::min);
    let max_price = candidates
        .iter()
        .map(|m| m.unit_price())
        .fold(f64::NEG_INFINITY, f64::max);
    let min_latency = candidates
        .iter()
        .map(|m| m.typical_latency_ms)
        .min()
        .unwrap_or(0);
    let max_latency = candidates
        .iter()
        .map(|m| m.typical_latency_ms)
        .max()
        .unwrap_or(0);
    let max_supported = candidates
        .iter()
        .map(|m| m.supported_tasks.len())
        .max()
        .unwrap_or(1)
        .max(1);

    let normalize = |value: f64, min: f64, max: f64| -> f64 {
        if (max - min).abs() < f64::EPSILON {
            0.0
        } else {
            (value - min) / (max - min)
        }
    };

    candidates
        .iter()
        .map(|model| {
            let availability = 100.0;
            let cost = 100.0 * (1.0 - normalize(model.unit_price(), min_price, max_price));
            let latency = 100.0
                * (1.0
                    - normalize(
                        model.typical_latency_ms as f64,
                        min_latency as f64,
                        max_latency as f64,
                    ));
            let capability = 100.0 * model.supported_tasks.len() as f64 / max_supported as f64;

            let mut reliability_factor = model.reliability;
            if mode == ExecutionMode::BestQuality {
                reliability_factor *= BEST_QUALITY_RELIABILITY_BOOST;
            }
            let reliability = 100.0 * reliability_factor;

            let score = WEIGHT_AVAILABILITY * availability
                + WEIGHT_COST * cost
                + WEIGHT_LATENCY * latency
                + WEIGHT_CAPABILITY * capability
                + WEIGHT_RELIABILITY * reliability;

            ScoredCandidate {
                model: (*model).clone(),
                score,
                components: ScoreComponents {
                    availability,
                    cost,
                    latency,
                    capability,
                    reliability,
                },
            }
        })
        .collect()
}
