use crate::analysis::{split_clauses, truncate, Analysis};
use council_core::{Request, RiskLevel, Subtask, TaskType};
use tracing::debug;

/// Keyword patterns per task type, consulted in specificity order.
fn type_patterns(task: TaskType) -> &'static [&'static str] {
    match task {
        TaskType::CodeGeneration => &[
            "write code", "python", "javascript", "rust", "implement", "function", "script",
            "program", "snippet", "code for",
        ],
        TaskType::Debugging => &["debug", "fix", "bug", "error", "stack trace", "crash", "fails"],
        TaskType::Reasoning => &[
            "explain", "why", "how does", "analyze", "compare", "reason", "derive", "prove",
        ],
        TaskType::Research => &[
            "list", "find", "research", "what are", "uses", "examples", "overview", "summarize",
            "sources",
        ],
        TaskType::FactCheck => &["is it true", "fact", "check whether", "confirm", "cross-check"],
        TaskType::Verification => &["verify", "validate", "review", "double-check", "audit"],
        TaskType::Creative => &[
            "poem", "story", "creative", "imagine", "slogan", "song", "brainstorm", "name ideas",
        ],
    }
}

/// Keywords that raise a subtask's risk level.
const HIGH_RISK_MARKERS: [&str; 6] = [
    "production",
    "security",
    "financial",
    "medical",
    "delete",
    "legal",
];

/// Splits a request into atomic typed subtasks.
///
/// Depth is mode-driven; TRIVIAL and SIMPLE analyses bypass splitting and
/// yield one subtask identical to the input. When a quality mode asks for
/// more parts than the prompt naturally has, cross-check and verification
/// subtasks over the whole prompt fill the gap.
pub struct Decomposer;

impl Default for Decomposer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decomposer {
    pub fn new() -> Self {
        Self
    }

    pub fn decompose(&self, request: &Request, analysis: &Analysis) -> Vec<Subtask> {
        let (min_parts, max_parts) = request.mode.subtask_range();

        let mut parts: Vec<String> = if analysis.complexity.needs_decomposition() {
            split_clauses(&request.prompt)
        } else {
            vec![request.prompt.clone()]
        };

        // Over the mode cap: fold the overflow into the final part so no
        // ask is dropped.
        if parts.len() > max_parts {
            let tail = parts.split_off(max_parts - 1).join(". ");
            parts.push(tail);
        }

        let mut subtasks: Vec<Subtask> = parts
            .iter()
            .enumerate()
            .map(|(ordinal, content)| self.build_subtask(request, ordinal, content))
            .collect();

        // Quality modes pad with supplemental subtasks over the whole
        // prompt, but never when analysis bypassed decomposition.
        if analysis.complexity.needs_decomposition() {
            let supplements = [
                (
                    TaskType::FactCheck,
                    format!(
                        "Cross-check the factual claims made while answering: {}",
                        truncate(&request.prompt, 160)
                    ),
                ),
                (
                    TaskType::Verification,
                    format!(
                        "Verify the combined answer fully addresses: {}",
                        truncate(&request.prompt, 160)
                    ),
                ),
                (
                    TaskType::Research,
                    format!(
                        "Gather supporting context for: {}",
                        truncate(&request.prompt, 160)
                    ),
                ),
            ];
            for (task_type, content) in supplements {
                if subtasks.len() >= min_parts {
                    break;
                }
                let ordinal = subtasks.len();
                let subtask = Subtask::new(request.id, ordinal, &content, task_type)
                    .with_accuracy(accuracy_for(task_type));
                subtasks.push(subtask);
            }
        }

        debug!(
            request_id = %request.id,
            mode = %request.mode,
            subtasks = subtasks.len(),
            "request decomposed"
        );
        subtasks
    }

    fn build_subtask(&self, request: &Request, ordinal: usize, content: &str) -> Subtask {
        let task_type = classify(content);
        let risk = assess_risk(content);
        let mut subtask = Subtask::new(request.id, ordinal, content, task_type)
            .with_risk(risk)
            .with_accuracy(accuracy_for(task_type));
        // Parts of the user's own prompt outrank supplemental checks.
        subtask.priority = 1;
        subtask
    }
}

/// Classify a clause by keyword match, preferring the most specific type.
/// Ties resolve by the fixed specificity order.
pub fn classify(content: &str) -> TaskType {
    let lowered = content.to_lowercase();
    for task in TaskType::SPECIFICITY_ORDER {
        if type_patterns(task)
            .iter()
            .any(|pattern| lowered.contains(pattern))
        {
            return task;
        }
    }
    TaskType::Reasoning
}

fn assess_risk(content: &str) -> RiskLevel {
    let lowered = content.to_lowercase();
    if HIGH_RISK_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        RiskLevel::High
    } else if content.split_whitespace().count() > 40 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn accuracy_for(task: TaskType) -> f64 {
    match task {
        TaskType::FactCheck | TaskType::Verification => 0.9,
        TaskType::CodeGeneration | TaskType::Debugging => 0.8,
        TaskType::Reasoning | TaskType::Research => 0.6,
        TaskType::Creative => 0.3,
    }
}
