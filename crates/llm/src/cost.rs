use crate::registry::ModelRegistry;
use council_core::{
    AgentResponse, CostBreakdown, CouncilResult, ExecutionMode, ModelCost, OrchestrationError,
    RequestId, SubtaskCost,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Characters-per-token factor shared by estimation formulas.
const TOKEN_FACTOR: f64 = 0.25;

/// Output speed assumed when projecting wall time, tokens per second.
const OUTPUT_TOKENS_PER_SECOND: f64 = 50.0;

/// Fallback per-token prices when the registry is empty (estimation stays
/// usable even with zero configured providers).
const FALLBACK_PRICES: (f64, f64) = (1.0e-6, 2.0e-6);

/// Relative discrepancy past which an event is emitted.
const DISCREPANCY_THRESHOLD: f64 = 0.5;
const DISCREPANCY_EPSILON: f64 = 1e-9;

/// Ex-ante cost and wall-time projection for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub estimated_cost: f64,
    pub estimated_time_seconds: f64,
}

/// Estimates for all three modes, as served by the estimate endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeEstimates {
    pub fast: CostEstimate,
    pub balanced: CostEstimate,
    pub best_quality: CostEstimate,
}

/// Emitted when actual spend diverges from the ex-ante estimate by more
/// than 50%. Logged and observable, never user-visible, never fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostDiscrepancy {
    pub request_id: RequestId,
    pub mode: ExecutionMode,
    pub direction: String,
    pub ratio: f64,
    pub estimated: f64,
    pub actual: f64,
}

struct CachedEstimate {
    estimate: CostEstimate,
    computed_at: Instant,
}

/// Pre-execution estimator and post-execution accountant.
pub struct CostEngine {
    registry: Arc<ModelRegistry>,
    cache: Mutex<HashMap<(u64, ExecutionMode), CachedEstimate>>,
    cache_ttl: Duration,
}

impl CostEngine {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
            cache_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Estimate cost and wall time for one mode. Results are cached for
    /// up to an hour keyed on (length bucketed to the nearest 10, mode).
    pub fn estimate(&self, request_length: usize, mode: ExecutionMode) -> CostEstimate {
        let bucket = Self::length_bucket(request_length);
        let key = (bucket, mode);

        {
            let mut cache = self.cache.lock();
            if let Some(cached) = cache.get(&key) {
                if cached.computed_at.elapsed() < self.cache_ttl {
                    return cached.estimate;
                }
                cache.remove(&key);
            }
        }

        let estimate = self.compute_estimate(bucket as usize, mode);
        self.cache.lock().insert(
            key,
            CachedEstimate {
                estimate,
                computed_at: Instant::now(),
            },
        );
        estimate
    }

    /// Estimates for all modes at once.
    pub fn estimate_all(&self, request_length: usize) -> ModeEstimates {
        ModeEstimates {
            fast: self.estimate(request_length, ExecutionMode::Fast),
            balanced: self.estimate(request_length, ExecutionMode::Balanced),
            best_quality: self.estimate(request_length, ExecutionMode::BestQuality),
        }
    }

    fn length_bucket(request_length: usize) -> u64 {
        (((request_length as u64) + 5) / 10) * 10
    }

    fn compute_estimate(&self, request_length: usize, mode: ExecutionMode) -> CostEstimate {
        let input_tokens =
            (request_length as f64 * TOKEN_FACTOR * mode.subtask_multiplier()).ceil();
        let output_tokens =
            (request_length as f64 * TOKEN_FACTOR * mode.output_multiplier()).ceil();

        let (input_price, output_price) = self.mix_prices(mode);
        let estimated_cost = input_tokens * input_price + output_tokens * output_price;

        let base_latency_s = self.mean_latency_seconds();
        let estimated_time_seconds =
            base_latency_s * mode.subtask_multiplier() + output_tokens / OUTPUT_TOKENS_PER_SECOND;

        debug!(
            request_length,
            mode = %mode,
            input_tokens,
            output_tokens,
            estimated_cost,
            "cost estimate computed"
        );

        CostEstimate {
            estimated_cost,
            estimated_time_seconds,
        }
    }

    /// Expected model mix per mode: cheapest third for FAST, the whole
    /// catalog for BALANCED, the premium third for BEST_QUALITY. Clamped
    /// so mode ordering holds for any injected catalog.
    fn mix_prices(&self, mode: ExecutionMode) -> (f64, f64) {
        let mut models: Vec<_> = self.registry.all().to_vec();
        if models.is_empty() {
            return FALLBACK_PRICES;
        }
        models.sort_by(|a, b| {
            a.unit_price()
                .total_cmp(&b.unit_price())
                .then_with(|| a.id.cmp(&b.id))
        });

        let third = models.len().div_ceil(3);
        let average = |slice: &[council_core::ModelSpec]| -> (f64, f64) {
            let n = slice.len() as f64;
            (
                slice.iter().map(|m| m.input_price).sum::<f64>() / n,
                slice.iter().map(|m| m.output_price).sum::<f64>() / n,
            )
        };

        let fast = average(&models[..third]);
        let balanced = average(&models);
        let premium = average(&models[models.len() - third..]);

        let balanced = (balanced.0.max(fast.0), balanced.1.max(fast.1));
        let premium = (premium.0.max(balanced.0), premium.1.max(balanced.1));

        match mode {
            ExecutionMode::Fast => fast,
            ExecutionMode::Balanced => balanced,
            ExecutionMode::BestQuality => premium,
        }
    }

    fn mean_latency_seconds(&self) -> f64 {
        let models = self.registry.all();
        if models.is_empty() {
            return 1.2;
        }
        let total: u64 = models.iter().map(|m| m.typical_latency_ms).sum();
        (total as f64 / models.len() as f64) / 1000.0
    }

    /// Sum actual spend over the produced responses, grouped by subtask
    /// and by model.
    pub fn actual_cost(&self, responses: &[AgentResponse]) -> CouncilResult<CostBreakdown> {
        let mut breakdown = CostBreakdown::default();
        let mut per_model: HashMap<String, ModelCost> = HashMap::new();

        for response in responses.iter().filter(|r| r.success) {
            let spec = self.registry.get(&response.model_id).ok_or_else(|| {
                OrchestrationError::Integrity(format!(
                    "response references unknown model {}",
                    response.model_id
                ))
            })?;

            let cost = response.cost(spec.input_price, spec.output_price);
            if !cost.is_finite() || cost < 0.0 {
                return Err(OrchestrationError::Integrity(format!(
                    "non-finite cost for subtask {}",
                    response.subtask_id
                )));
            }

            breakdown.total_cost += cost;
            breakdown.total_input_tokens += response.assessment.input_tokens;
            breakdown.total_output_tokens += response.assessment.output_tokens;
            breakdown.by_subtask.push(SubtaskCost {
                subtask_id: response.subtask_id,
                model_id: response.model_id.clone(),
                cost,
                input_tokens: response.assessment.input_tokens,
                output_tokens: response.assessment.output_tokens,
            });

            let entry = per_model
                .entry(response.model_id.clone())
                .or_insert_with(|| ModelCost {
                    model_id: response.model_id.clone(),
                    calls: 0,
                    cost: 0.0,
                });
            entry.calls += 1;
            entry.cost += cost;
        }

        let mut by_model: Vec<ModelCost> = per_model.into_values().collect();
        by_model.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        breakdown.by_model = by_model;

        Ok(breakdown)
    }

    /// Compare actual spend against the estimate; over the threshold an
    /// observable discrepancy is produced. Never fails the request.
    pub fn check_discrepancy(
        &self,
        request_id: RequestId,
        mode: ExecutionMode,
        estimated: f64,
        actual: f64,
    ) -> Option<CostDiscrepancy> {
        let ratio = (actual - estimated).abs() / estimated.max(DISCREPANCY_EPSILON);
        if ratio <= DISCREPANCY_THRESHOLD {
            return None;
        }

        let direction = if actual > estimated { "over" } else { "under" };
        warn!(
            request_id = %request_id,
            mode = %mode,
            estimated,
            actual,
            ratio,
            direction,
            "cost discrepancy detected"
        );

        Some(CostDiscrepancy {
            request_id,
            mode,
            direction: direction.to_string(),
            ratio,
            estimated,
            actual,
        })
    }
}
