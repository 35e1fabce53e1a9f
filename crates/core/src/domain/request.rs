use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier of a user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User-selectable execution preset.
///
/// The mode drives decomposition depth, per-request parallelism, provider
/// preferences, per-call deadlines, and the cost estimator multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Fast,
    Balanced,
    BestQuality,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 3] = [
        ExecutionMode::Fast,
        ExecutionMode::Balanced,
        ExecutionMode::BestQuality,
    ];

    /// Decomposition depth bounds: FAST <= 2, BALANCED 3-4, BEST_QUALITY 4-6.
    pub fn subtask_range(&self) -> (usize, usize) {
        match self {
            ExecutionMode::Fast => (1, 2),
            ExecutionMode::Balanced => (3, 4),
            ExecutionMode::BestQuality => (4, 6),
        }
    }

    /// Per-request concurrent provider call cap.
    pub fn parallelism(&self) -> usize {
        match self {
            ExecutionMode::Fast => 2,
            ExecutionMode::Balanced => 3,
            ExecutionMode::BestQuality => 5,
        }
    }

    /// Per-call deadline for provider requests.
    pub fn deadline(&self) -> Duration {
        match self {
            ExecutionMode::Fast => Duration::from_secs(15),
            ExecutionMode::Balanced => Duration::from_secs(30),
            ExecutionMode::BestQuality => Duration::from_secs(60),
        }
    }

    /// Input-side token multiplier used by the cost estimator.
    pub fn subtask_multiplier(&self) -> f64 {
        match self {
            ExecutionMode::Fast => 1.5,
            ExecutionMode::Balanced => 3.0,
            ExecutionMode::BestQuality => 5.0,
        }
    }

    /// Output-side token multiplier used by the cost estimator.
    pub fn output_multiplier(&self) -> f64 {
        match self {
            ExecutionMode::Fast => 1.5,
            ExecutionMode::Balanced => 2.0,
            ExecutionMode::BestQuality => 3.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Fast => "FAST",
            ExecutionMode::Balanced => "BALANCED",
            ExecutionMode::BestQuality => "BEST_QUALITY",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fast" => Ok(ExecutionMode::Fast),
            "balanced" => Ok(ExecutionMode::Balanced),
            "best_quality" | "best" => Ok(ExecutionMode::BestQuality),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Succeeded | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Running => "RUNNING",
            RequestStatus::Succeeded => "SUCCEEDED",
            RequestStatus::Failed => "FAILED",
            RequestStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Caller role; drives the hourly rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Demo,
    Authenticated,
    Admin,
}

impl Role {
    pub fn hourly_limit(&self) -> u32 {
        match self {
            Role::Demo => 3,
            Role::Authenticated => 100,
            Role::Admin => 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Demo => "demo",
            Role::Authenticated => "authenticated",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "demo" => Ok(Role::Demo),
            "authenticated" | "user" => Ok(Role::Authenticated),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A user request as accepted by the control plane.
///
/// Mutated only by the orchestrator that owns it; terminal on
/// SUCCEEDED / FAILED / CANCELLED and retained for history afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub principal: String,
    pub role: Role,
    pub prompt: String,
    pub mode: ExecutionMode,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Stable error code plus one sentence, set when the request fails.
    pub error: Option<String>,
}

impl Request {
    pub fn new(principal: &str, role: Role, prompt: &str, mode: ExecutionMode) -> Self {
        Self {
            id: RequestId::new(),
            principal: principal.to_string(),
            role,
            prompt: prompt.to_string(),
            mode,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}
