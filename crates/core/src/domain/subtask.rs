use super::request::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubtaskId(pub Uuid);

impl SubtaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubtaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of work a subtask represents; drives model candidate filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Reasoning,
    Research,
    CodeGeneration,
    Debugging,
    Creative,
    FactCheck,
    Verification,
}

impl TaskType {
    /// Tie-break order for classification: most specific type first.
    pub const SPECIFICITY_ORDER: [TaskType; 7] = [
        TaskType::CodeGeneration,
        TaskType::Debugging,
        TaskType::Reasoning,
        TaskType::Research,
        TaskType::FactCheck,
        TaskType::Verification,
        TaskType::Creative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Reasoning => "REASONING",
            TaskType::Research => "RESEARCH",
            TaskType::CodeGeneration => "CODE_GENERATION",
            TaskType::Debugging => "DEBUGGING",
            TaskType::Creative => "CREATIVE",
            TaskType::FactCheck => "FACT_CHECK",
            TaskType::Verification => "VERIFICATION",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk attached to a subtask; HIGH and above triggers redundant dispatch
/// in BEST_QUALITY mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    Pending,
    Routed,
    Running,
    Completed,
    Failed,
}

/// Atomic unit of work derived from the user prompt.
///
/// Created by the decomposer; the router fills `assigned_model`, the
/// executor drives `status`. Destroyed with the parent request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub request_id: RequestId,
    /// Position within the original user intent; the synthesizer restores
    /// this order regardless of completion order.
    pub ordinal: usize,
    pub content: String,
    pub task_type: TaskType,
    pub priority: u8,
    pub risk: RiskLevel,
    /// Required answer accuracy in [0, 1]; feeds router soft filtering.
    pub accuracy_requirement: f64,
    pub assigned_model: Option<String>,
    pub status: SubtaskStatus,
    pub estimated_cost: f64,
    pub created_at: DateTime<Utc>,
}

impl Subtask {
    pub fn new(request_id: RequestId, ordinal: usize, content: &str, task_type: TaskType) -> Self {
        Self {
            id: SubtaskId::new(),
            request_id,
            ordinal,
            content: content.to_string(),
            task_type,
            priority: 0,
            risk: RiskLevel::Low,
            accuracy_requirement: 0.0,
            assigned_model: None,
            status: SubtaskStatus::Pending,
            estimated_cost: 0.0,
            created_at: Utc::now(),
        }
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy_requirement = accuracy.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_is_clamped() {
        let s = Subtask::new(RequestId::new(), 0, "x", TaskType::Reasoning).with_accuracy(1.4);
        assert_eq!(s.accuracy_requirement, 1.0);
        let s = s.with_accuracy(-0.2);
        assert_eq!(s.accuracy_requirement, 0.0);
    }

    #[test]
    fn risk_levels_order() {
        assert!(RiskLevel::High >= RiskLevel::High);
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::Low < RiskLevel::Medium);
    }
}
