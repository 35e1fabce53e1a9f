use crate::analysis::truncate;
use crate::arbiter::ArbitrationOutcome;
use council_core::{
    AgentResponse, CostBreakdown, FinalResponse, ProviderSelectionEntry, Subtask, SubtaskId,
    SubtaskStatus,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Inputs collected over the pipeline, handed to synthesis in one piece.
pub struct SynthesisInput {
    pub subtasks: Vec<Subtask>,
    pub outcomes: HashMap<SubtaskId, ArbitrationOutcome>,
    pub failures: HashMap<SubtaskId, String>,
    pub cost: CostBreakdown,
    pub selection_log: Vec<ProviderSelectionEntry>,
    pub provider_usage: BTreeMap<String, u32>,
}

/// Combines validated responses into one coherent answer.
///
/// Sections follow the original subtask order regardless of completion
/// order; identical sentences are deduplicated across sections; failed
/// parts are annotated and lower the overall confidence; inconclusive
/// arbitration is surfaced inline as explicit alternatives.
pub struct Synthesizer;

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesizer {
    pub fn new() -> Self {
        Self
    }

    pub fn synthesize(&self, mut input: SynthesisInput) -> FinalResponse {
        input.subtasks.sort_by_key(|s| s.ordinal);
        let multi_part = input.subtasks.len() > 1;

        let mut sections: Vec<String> = Vec::new();
        let mut weighted_confidence = 0.0_f64;
        let mut weight_total = 0.0_f64;
        let mut models_used: Vec<String> = Vec::new();
        let mut seen_sentences: HashSet<String> = HashSet::new();

        for subtask in &input.subtasks {
            let heading = if multi_part {
                format!("## {}\n\n", heading_for(subtask))
            } else {
                String::new()
            };

            let body = match input.outcomes.get(&subtask.id) {
                Some(ArbitrationOutcome::Single(response))
                | Some(ArbitrationOutcome::Winner {
                    chosen: response, ..
                }) => {
                    accumulate(response, &mut weighted_confidence, &mut weight_total);
                    note_model(&mut models_used, &response.model_id);
                    dedupe_sentences(&response.content, &mut seen_sentences)
                }
                Some(ArbitrationOutcome::Inconclusive {
                    primary,
                    alternative,
                }) => {
                    accumulate(primary, &mut weighted_confidence, &mut weight_total);
                    accumulate(alternative, &mut weighted_confidence, &mut weight_total);
                    note_model(&mut models_used, &primary.model_id);
                    note_model(&mut models_used, &alternative.model_id);
                    format!(
                        "The sources disagree; both readings are given.\n\n\
                         **Alternative A** ({}): {}\n\n**Alternative B** ({}): {}",
                        primary.model_id,
                        primary.content.trim(),
                        alternative.model_id,
                        alternative.content.trim()
                    )
                }
                Some(ArbitrationOutcome::Empty) | None => {
                    let reason = input
                        .failures
                        .get(&subtask.id)
                        .cloned()
                        .unwrap_or_else(|| "no usable response".to_string());
                    format!("_This part could not be completed: {reason}._")
                }
            };

            sections.push(format!("{heading}{}", body.trim()));
        }

        let completed = input
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .count();
        let success_ratio = if input.subtasks.is_empty() {
            0.0
        } else {
            completed as f64 / input.subtasks.len() as f64
        };

        let confidence = if weight_total > 0.0 {
            (weighted_confidence / weight_total) * success_ratio
        } else {
            0.0
        };

        debug!(
            sections = sections.len(),
            completed,
            confidence,
            "synthesis finished"
        );

        FinalResponse {
            text: sections.join("\n\n"),
            confidence: confidence.clamp(0.0, 1.0),
            cost: input.cost,
            models_used,
            provider_usage: input.provider_usage,
            selection_log: input.selection_log,
        }
    }
}

fn heading_for(subtask: &Subtask) -> String {
    let words: Vec<&str> = subtask.content.split_whitespace().take(8).collect();
    if words.is_empty() {
        return "Part".to_string();
    }
    let mut heading = words.join(" ");
    if subtask.content.split_whitespace().count() > 8 {
        heading.push('…');
    }
    truncate(&heading, 64)
}

/// Confidence weighted by content length.
fn accumulate(response: &AgentResponse, weighted: &mut f64, total: &mut f64) {
    let weight = response.content.chars().count().max(1) as f64;
    *weighted += response.assessment.confidence * weight;
    *total += weight;
}

fn note_model(models: &mut Vec<String>, model_id: &str) {
    if !models.iter().any(|m| m == model_id) {
        models.push(model_id.to_string());
    }
}

/// Drop sentences already emitted by an earlier section, preserving
/// order and punctuation of what remains.
fn dedupe_sentences(content: &str, seen: &mut HashSet<String>) -> String {
    let mut kept: Vec<String> = Vec::new();
    for raw in content.split_inclusive(['.', '!', '?']) {
        let normalized = raw
            .trim()
            .trim_end_matches(['.', '!', '?'])
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if normalized.is_empty() {
            kept.push(raw.to_string());
            continue;
        }
        if seen.insert(normalized) {
            kept.push(raw.to_string());
        }
    }
    kept.join("").trim().to_string()
}
