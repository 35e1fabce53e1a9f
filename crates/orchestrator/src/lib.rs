//! Request pipeline and control-plane facade.
//!
//! A request flows through Analysis → Decomposition → Routing →
//! Execution → Arbitration → Synthesis, with every stage publishing to
//! the per-request progress bus. The [`ControlPlane`] facade in front of
//! the pipeline adds validation, rate limiting, history, estimation, and
//! cancellation.

pub mod analysis;
pub mod arbiter;
pub mod decomposer;
pub mod executor;
pub mod orchestrator;
pub mod service;
pub mod store;
pub mod synthesizer;

pub use analysis::{Analysis, Complexity, QueryAnalyzer};
pub use arbiter::{Arbiter, ArbitrationOutcome};
pub use decomposer::Decomposer;
pub use executor::{ExecutionOutcome, Executor};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use service::{ControlPlane, RequestResult, StatusReport, StatusView};
pub use store::InMemoryRequestStore;
pub use synthesizer::Synthesizer;
