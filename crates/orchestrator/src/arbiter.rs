use council_core::{AgentResponse, SubtaskId};
use llm::ModelRegistry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Responses below this confidence are dropped before judging.
const CONFIDENCE_FLOOR: f64 = 0.3;

/// When disagreeing candidates score within this delta the decision is
/// inconclusive and both are kept.
const INCONCLUSIVE_DELTA: f64 = 0.1;

/// Claims longer than this are not treated as extractable spans.
const CLAIM_SPAN_MAX_CHARS: usize = 80;

/// Reliability assumed for models missing from the registry.
const UNKNOWN_RELIABILITY: f64 = 0.5;

/// Verdict for one subtask's set of responses.
#[derive(Debug, Clone)]
pub enum ArbitrationOutcome {
    /// Only one usable response; nothing to arbitrate.
    Single(AgentResponse),
    /// A clear winner by confidence × reliability.
    Winner {
        chosen: AgentResponse,
        rejected: Vec<String>,
    },
    /// Disagreement too close to call: the synthesizer must present both.
    Inconclusive {
        primary: AgentResponse,
        alternative: AgentResponse,
    },
    /// Every response fell below the confidence floor.
    Empty,
}

impl ArbitrationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ArbitrationOutcome::Single(_) => "SINGLE",
            ArbitrationOutcome::Winner { .. } => "WINNER",
            ArbitrationOutcome::Inconclusive { .. } => "INCONCLUSIVE",
            ArbitrationOutcome::Empty => "EMPTY",
        }
    }
}

/// Resolves competing responses for a subtask and detects contradicting
/// claims across subtasks. Disagreements are never merged silently; every
/// decision is observable.
pub struct Arbiter {
    registry: Arc<ModelRegistry>,
}

impl Arbiter {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Judge the responses produced for one subtask. Returns the outcome
    /// and, when an actual decision was made, a progress payload.
    pub fn arbitrate(
        &self,
        subtask_id: SubtaskId,
        responses: Vec<AgentResponse>,
    ) -> (ArbitrationOutcome, Option<Value>) {
        let total = responses.len();
        let mut usable: Vec<AgentResponse> = responses
            .into_iter()
            .filter(|r| r.assessment.confidence >= CONFIDENCE_FLOOR)
            .collect();

        match usable.len() {
            0 => {
                let payload = (total > 0).then(|| {
                    serde_json::json!({
                        "subtask_id": subtask_id,
                        "decision": "EMPTY",
                        "dropped": total,
                    })
                });
                (ArbitrationOutcome::Empty, payload)
            }
            1 => {
                let response = usable.remove(0);
                let payload = (total > 1).then(|| {
                    serde_json::json!({
                        "subtask_id": subtask_id,
                        "decision": "SINGLE",
                        "model": response.model_id,
                        "dropped": total - 1,
                    })
                });
                (ArbitrationOutcome::Single(response), payload)
            }
            _ => self.judge(subtask_id, usable),
        }
    }

    fn judge(
        &self,
        subtask_id: SubtaskId,
        mut candidates: Vec<AgentResponse>,
    ) -> (ArbitrationOutcome, Option<Value>) {
        candidates.sort_by(|a, b| {
            self.product(b)
                .total_cmp(&self.product(a))
                .then_with(|| a.model_id.cmp(&b.model_id))
        });

        let top_score = self.product(&candidates[0]);
        let second_score = self.product(&candidates[1]);
        let delta = top_score - second_score;
        let disagree = responses_disagree(&candidates[0], &candidates[1]);

        debug!(
            subtask_id = %subtask_id,
            top = %candidates[0].model_id,
            top_score,
            second = %candidates[1].model_id,
            second_score,
            disagree,
            "arbitrating responses"
        );

        if disagree && delta < INCONCLUSIVE_DELTA {
            let alternative = candidates.remove(1);
            let primary = candidates.remove(0);
            info!(subtask_id = %subtask_id, "arbitration inconclusive, keeping both answers");
            let payload = serde_json::json!({
                "subtask_id": subtask_id,
                "decision": "INCONCLUSIVE",
                "primary": primary.model_id,
                "alternative": alternative.model_id,
                "delta": delta,
            });
            (
                ArbitrationOutcome::Inconclusive {
                    primary,
                    alternative,
                },
                Some(payload),
            )
        } else {
            let chosen = candidates.remove(0);
            let rejected: Vec<String> = candidates.iter().map(|r| r.model_id.clone()).collect();
            let payload = serde_json::json!({
                "subtask_id": subtask_id,
                "decision": "WINNER",
                "model": chosen.model_id,
                "score": top_score,
                "rejected": rejected,
            });
            (ArbitrationOutcome::Winner { chosen, rejected }, Some(payload))
        }
    }

    /// confidence × model reliability.
    fn product(&self, response: &AgentResponse) -> f64 {
        let reliability = self
            .registry
            .get(&response.model_id)
            .map(|m| m.reliability)
            .unwrap_or(UNKNOWN_RELIABILITY);
        response.assessment.confidence * reliability
    }

    /// Cross-subtask contradiction scan: a short claim in one response
    /// whose negation appears in another. Returns progress payloads; the
    /// claims themselves stay in both answers, explicitly flagged.
    pub fn detect_contradictions(&self, responses: &[AgentResponse]) -> Vec<Value> {
        let mut claims: HashMap<String, SubtaskId> = HashMap::new();
        let mut findings = Vec::new();

        for response in responses {
            for claim in extract_claims(&response.content) {
                claims.entry(claim).or_insert(response.subtask_id);
            }
        }

        let mut reported: Vec<(String, String)> = Vec::new();
        for response in responses {
            for claim in extract_claims(&response.content) {
                if let Some(negated) = negate_claim(&claim) {
                    if let Some(&other) = claims.get(&negated) {
                        if other == response.subtask_id {
                            continue;
                        }
                        // Report each claim/negation pair once.
                        let key = if claim < negated {
                            (claim.clone(), negated.clone())
                        } else {
                            (negated.clone(), claim.clone())
                        };
                        if reported.contains(&key) {
                            continue;
                        }
                        reported.push(key);
                        findings.push(serde_json::json!({
                            "decision": "CONTRADICTION",
                            "claim": claim,
                            "conflicting_claim": negated,
                            "subtask_id": response.subtask_id,
                            "conflicts_with": other,
                        }));
                    }
                }
            }
        }

        findings
    }
}

/// Two responses disagree when a short claim of one is negated in the
/// other, or when both are themselves short extractable spans that do not
/// normalize to the same string.
fn responses_disagree(a: &AgentResponse, b: &AgentResponse) -> bool {
    let norm_a = normalize(&a.content);
    let norm_b = normalize(&b.content);
    if norm_a == norm_b {
        return false;
    }
    if norm_a.chars().count() <= CLAIM_SPAN_MAX_CHARS
        && norm_b.chars().count() <= CLAIM_SPAN_MAX_CHARS
    {
        return true;
    }

    let claims_b: Vec<String> = extract_claims(&b.content);
    extract_claims(&a.content).iter().any(|claim| {
        negate_claim(claim)
            .map(|negated| claims_b.contains(&negated))
            .unwrap_or(false)
    })
}

fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!'])
        .to_string()
}

/// Short declarative sentences, normalized.
fn extract_claims(text: &str) -> Vec<String> {
    text.split(['.', '\n'])
        .map(normalize)
        .filter(|s| !s.is_empty() && s.chars().count() <= CLAIM_SPAN_MAX_CHARS)
        .collect()
}

/// "x is y" <-> "x is not y". Returns the counterpart claim when the
/// shape allows one.
fn negate_claim(claim: &str) -> Option<String> {
    if let Some(rest) = claim.split_once(" is not ") {
        return Some(format!("{} is {}", rest.0, rest.1));
    }
    if let Some(rest) = claim.split_once(" is ") {
        return Some(format!("{} is not {}", rest.0, rest.1));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_core::{ModelSpec, ProviderKind, RiskLevel, SelfAssessment, TaskType};

    fn registry() -> Arc<ModelRegistry> {
        let model = |id: &str, reliability: f64| ModelSpec {
            id: id.into(),
            provider: ProviderKind::OpenAi,
            supported_tasks: vec![TaskType::Reasoning],
            input_price: 1e-6,
            output_price: 1e-6,
            typical_latency_ms: 500,
            reliability,
            context_window: 100_000,
        };
        Arc::new(ModelRegistry::with_models(vec![
            model("model-a", 0.95),
            model("model-b", 0.92),
        ]))
    }

    fn response(model: &str, confidence: f64, content: &str) -> AgentResponse {
        AgentResponse {
            subtask_id: SubtaskId::new(),
            model_id: model.into(),
            content: content.into(),
            assessment: SelfAssessment::new(confidence, RiskLevel::Low),
            created_at: chrono::Utc::now(),
            success: true,
        }
    }

    #[test]
    fn single_response_passes_through() {
        let arbiter = Arbiter::new(registry());
        let (outcome, payload) =
            arbiter.arbitrate(SubtaskId::new(), vec![response("model-a", 0.9, "fine")]);
        assert!(matches!(outcome, ArbitrationOutcome::Single(_)));
        assert!(payload.is_none());
    }

    #[test]
    fn low_confidence_responses_are_dropped() {
        let arbiter = Arbiter::new(registry());
        let (outcome, payload) = arbiter.arbitrate(
            SubtaskId::new(),
            vec![
                response("model-a", 0.2, "wild guess"),
                response("model-b", 0.9, "solid answer"),
            ],
        );
        match outcome {
            ArbitrationOutcome::Single(r) => assert_eq!(r.model_id, "model-b"),
            other => panic!("expected Single, got {}", other.label()),
        }
        assert!(payload.is_some());
    }

    #[test]
    fn all_dropped_is_empty() {
        let arbiter = Arbiter::new(registry());
        let (outcome, _) = arbiter.arbitrate(
            SubtaskId::new(),
            vec![response("model-a", 0.1, "?"), response("model-b", 0.2, "??")],
        );
        assert!(matches!(outcome, ArbitrationOutcome::Empty));
    }

    #[test]
    fn agreeing_responses_pick_highest_product() {
        // Products 0.9*0.95=0.855 vs 0.88*0.92=0.810; same long content
        // means no disagreement, so the higher product wins.
        let arbiter = Arbiter::new(registry());
        let text = "The algorithm runs in linearithmic time because each level does linear work \
                    across a logarithmic number of levels";
        let (outcome, _) = arbiter.arbitrate(
            SubtaskId::new(),
            vec![response("model-b", 0.88, text), response("model-a", 0.9, text)],
        );
        match outcome {
            ArbitrationOutcome::Winner { chosen, rejected } => {
                assert_eq!(chosen.model_id, "model-a");
                assert_eq!(rejected, vec!["model-b".to_string()]);
            }
            other => panic!("expected Winner, got {}", other.label()),
        }
    }

    #[test]
    fn close_disagreement_is_inconclusive() {
        // Products 0.82*0.95=0.779 vs 0.80*0.92=0.736: delta < 0.1 and the
        // short answers disagree.
        let arbiter = Arbiter::new(registry());
        let (outcome, payload) = arbiter.arbitrate(
            SubtaskId::new(),
            vec![
                response("model-a", 0.82, "The flag is safe to enable"),
                response("model-b", 0.80, "The flag is not safe to enable"),
            ],
        );
        match outcome {
            ArbitrationOutcome::Inconclusive { primary, alternative } => {
                assert_eq!(primary.model_id, "model-a");
                assert_eq!(alternative.model_id, "model-b");
            }
            other => panic!("expected Inconclusive, got {}", other.label()),
        }
        let payload = payload.unwrap();
        assert_eq!(payload["decision"], "INCONCLUSIVE");
    }

    #[test]
    fn wide_margin_beats_disagreement() {
        let arbiter = Arbiter::new(registry());
        let (outcome, _) = arbiter.arbitrate(
            SubtaskId::new(),
            vec![
                response("model-a", 0.95, "The flag is safe to enable"),
                response("model-b", 0.55, "The flag is not safe to enable"),
            ],
        );
        assert!(matches!(outcome, ArbitrationOutcome::Winner { .. }));
    }

    #[test]
    fn cross_subtask_contradictions_are_detected() {
        let arbiter = Arbiter::new(registry());
        let a = response("model-a", 0.9, "Summary done. The cache is enabled by default.");
        let b = response("model-b", 0.9, "The cache is not enabled by default.");
        let findings = arbiter.detect_contradictions(&[a, b]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0]["decision"], "CONTRADICTION");
    }

    #[test]
    fn no_contradiction_within_one_subtask() {
        let arbiter = Arbiter::new(registry());
        let id = SubtaskId::new();
        let mut a = response("model-a", 0.9, "The cache is enabled by default.");
        let mut b = response("model-b", 0.9, "The cache is not enabled by default.");
        a.subtask_id = id;
        b.subtask_id = id;
        assert!(arbiter.detect_contradictions(&[a, b]).is_empty());
    }
}
