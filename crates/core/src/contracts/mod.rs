//! Contracts for external collaborators the kernel consumes but does not
//! implement: durable storage of requests, subtasks, and responses.
//!
//! The reference in-memory implementation lives in the orchestrator crate
//! and backs both the test suite and the CLI.

use crate::domain::request::{ExecutionMode, Request, RequestId, RequestStatus};
use crate::domain::response::{AgentResponse, FinalResponse};
use crate::domain::subtask::Subtask;
use crate::errors::CouncilResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Filters applied when listing a principal's request history.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub mode: Option<ExecutionMode>,
    pub content_substring: Option<String>,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl HistoryFilter {
    pub fn matches(&self, request: &Request) -> bool {
        if let Some(mode) = self.mode {
            if request.mode != mode {
                return false;
            }
        }
        if let Some(needle) = &self.content_substring {
            if !request
                .prompt
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some((from, to)) = self.date_range {
            if request.created_at < from || request.created_at > to {
                return false;
            }
        }
        true
    }
}

/// Durable store for requests and everything hanging off them.
///
/// Deleting a request cascades to its subtasks, responses, and final
/// response; there is no other ownership edge back from children.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn put_request(&self, request: &Request) -> CouncilResult<()>;

    async fn update_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> CouncilResult<()>;

    async fn get_request(&self, id: RequestId) -> CouncilResult<Option<Request>>;

    async fn put_subtasks(&self, id: RequestId, subtasks: &[Subtask]) -> CouncilResult<()>;

    async fn get_subtasks(&self, id: RequestId) -> CouncilResult<Vec<Subtask>>;

    async fn put_responses(&self, id: RequestId, responses: &[AgentResponse]) -> CouncilResult<()>;

    async fn put_final(&self, id: RequestId, response: &FinalResponse) -> CouncilResult<()>;

    async fn get_final(&self, id: RequestId) -> CouncilResult<Option<FinalResponse>>;

    /// Cascading delete: request, subtasks, responses, final response.
    async fn delete_request(&self, id: RequestId) -> CouncilResult<()>;

    /// Page through a principal's requests, newest first.
    async fn list_requests(
        &self,
        principal: &str,
        filter: &HistoryFilter,
        page: usize,
        page_size: usize,
    ) -> CouncilResult<Vec<Request>>;
}
