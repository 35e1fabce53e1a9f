use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kinds of messages carried by the per-request progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    ConnectionEstablished,
    Heartbeat,
    AnalysisStarted,
    AnalysisComplete,
    DecompositionComplete,
    RoutingComplete,
    ExecutionProgress,
    ArbitrationDecision,
    SynthesisStarted,
    FinalResponse,
    Error,
    Cancelled,
}

impl ProgressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressKind::ConnectionEstablished => "connection_established",
            ProgressKind::Heartbeat => "heartbeat",
            ProgressKind::AnalysisStarted => "analysis_started",
            ProgressKind::AnalysisComplete => "analysis_complete",
            ProgressKind::DecompositionComplete => "decomposition_complete",
            ProgressKind::RoutingComplete => "routing_complete",
            ProgressKind::ExecutionProgress => "execution_progress",
            ProgressKind::ArbitrationDecision => "arbitration_decision",
            ProgressKind::SynthesisStarted => "synthesis_started",
            ProgressKind::FinalResponse => "final_response",
            ProgressKind::Error => "error",
            ProgressKind::Cancelled => "cancelled",
        }
    }

    /// Terminal kinds end the stream for a request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressKind::FinalResponse | ProgressKind::Error | ProgressKind::Cancelled
        )
    }
}

impl fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message on a request's progress stream.
///
/// Sequence numbers are dense and strictly increasing within a request,
/// starting at 1. A seq of 0 marks synthetic per-subscription messages
/// (`connection_established`) that are not part of the durable stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub seq: u64,
    pub kind: ProgressKind,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl ProgressMessage {
    pub fn new(seq: u64, kind: ProgressKind, payload: Value) -> Self {
        Self {
            seq,
            kind,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Messages a progress subscriber may send upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ack { seq: u64 },
    HeartbeatResponse,
    Reconnect { since_seq: u64 },
}
