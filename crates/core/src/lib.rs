//! Core domain models and contracts for the council control plane.
//!
//! This crate holds the entities shared by every other crate in the
//! workspace: requests and subtasks, model catalog records, agent
//! responses, progress events, the error taxonomy, and the storage
//! contracts consumed from external collaborators. It deliberately
//! contains no I/O.

pub mod contracts;
pub mod domain;
pub mod errors;
pub mod events;

pub use contracts::{HistoryFilter, RequestStore};
pub use domain::model::{BreakerRecord, BreakerState, DeploymentMode, ModelSpec, ProviderKind};
pub use domain::request::{ExecutionMode, Request, RequestId, RequestStatus, Role};
pub use domain::response::{
    AgentResponse, CostBreakdown, FinalResponse, ModelCost, ProviderSelectionEntry,
    SelectionSnapshot, SelfAssessment, SubtaskCost,
};
pub use domain::subtask::{RiskLevel, Subtask, SubtaskId, SubtaskStatus, TaskType};
pub use errors::{CouncilResult, OrchestrationError, ProviderError};
pub use events::{ClientMessage, ProgressKind, ProgressMessage};
