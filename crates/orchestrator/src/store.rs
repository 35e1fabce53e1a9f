use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::input_validation::clamp_page_size;
use council_core::{
    AgentResponse, CouncilResult, FinalResponse, HistoryFilter, Request, RequestId, RequestStatus,
    RequestStore, Subtask,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct StoreState {
    requests: HashMap<RequestId, Request>,
    subtasks: HashMap<RequestId, Vec<Subtask>>,
    responses: HashMap<RequestId, Vec<AgentResponse>>,
    finals: HashMap<RequestId, FinalResponse>,
}

/// Reference [`RequestStore`] implementation backing tests and the CLI.
/// A production deployment plugs a durable store in behind the same
/// contract.
#[derive(Default)]
pub struct InMemoryRequestStore {
    state: RwLock<StoreState>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn put_request(&self, request: &Request) -> CouncilResult<()> {
        let mut state = self.state.write().await;
        state.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> CouncilResult<()> {
        let mut state = self.state.write().await;
        if let Some(request) = state.requests.get_mut(&id) {
            request.status = status;
            if completed_at.is_some() {
                request.completed_at = completed_at;
            }
        }
        Ok(())
    }

    async fn get_request(&self, id: RequestId) -> CouncilResult<Option<Request>> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id).cloned())
    }

    async fn put_subtasks(&self, id: RequestId, subtasks: &[Subtask]) -> CouncilResult<()> {
        let mut state = self.state.write().await;
        state.subtasks.insert(id, subtasks.to_vec());
        Ok(())
    }

    async fn get_subtasks(&self, id: RequestId) -> CouncilResult<Vec<Subtask>> {
        let state = self.state.read().await;
        Ok(state.subtasks.get(&id).cloned().unwrap_or_default())
    }

    async fn put_responses(&self, id: RequestId, responses: &[AgentResponse]) -> CouncilResult<()> {
        let mut state = self.state.write().await;
        state.responses.insert(id, responses.to_vec());
        Ok(())
    }

    async fn put_final(&self, id: RequestId, response: &FinalResponse) -> CouncilResult<()> {
        let mut state = self.state.write().await;
        state.finals.insert(id, response.clone());
        Ok(())
    }

    async fn get_final(&self, id: RequestId) -> CouncilResult<Option<FinalResponse>> {
        let state = self.state.read().await;
        Ok(state.finals.get(&id).cloned())
    }

    async fn delete_request(&self, id: RequestId) -> CouncilResult<()> {
        let mut state = self.state.write().await;
        state.requests.remove(&id);
        state.subtasks.remove(&id);
        state.responses.remove(&id);
        state.finals.remove(&id);
        debug!(request_id = %id, "request deleted with cascade");
        Ok(())
    }

    async fn list_requests(
        &self,
        principal: &str,
        filter: &HistoryFilter,
        page: usize,
        page_size: usize,
    ) -> CouncilResult<Vec<Request>> {
        let state = self.state.read().await;
        let mut matching: Vec<Request> = state
            .requests
            .values()
            .filter(|r| r.principal == principal && filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let page_size = clamp_page_size(page_size);
        Ok(matching
            .into_iter()
            .skip(page * page_size)
            .take(page_size)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_core::{ExecutionMode, Role, SubtaskId, TaskType};

    fn request(principal: &str) -> Request {
        Request::new(principal, Role::Authenticated, "prompt", ExecutionMode::Fast)
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = InMemoryRequestStore::new();
        let request = request("alice");
        store.put_request(&request).await.unwrap();
        let loaded = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(loaded.principal, "alice");
    }

    #[tokio::test]
    async fn delete_cascades_to_children() {
        let store = InMemoryRequestStore::new();
        let request = request("alice");
        store.put_request(&request).await.unwrap();
        let subtask = Subtask::new(request.id, 0, "part", TaskType::Reasoning);
        store.put_subtasks(request.id, &[subtask]).await.unwrap();

        store.delete_request(request.id).await.unwrap();
        assert!(store.get_request(request.id).await.unwrap().is_none());
        assert!(store.get_subtasks(request.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_is_per_principal_newest_first_and_paged() {
        let store = InMemoryRequestStore::new();
        for i in 0..5 {
            let mut r = request("alice");
            r.created_at = Utc::now() + chrono::Duration::seconds(i);
            store.put_request(&r).await.unwrap();
        }
        store.put_request(&request("bob")).await.unwrap();

        let filter = HistoryFilter::default();
        let first_page = store.list_requests("alice", &filter, 0, 2).await.unwrap();
        assert_eq!(first_page.len(), 2);
        assert!(first_page[0].created_at >= first_page[1].created_at);

        let third_page = store.list_requests("alice", &filter, 2, 2).await.unwrap();
        assert_eq!(third_page.len(), 1);
    }

    #[tokio::test]
    async fn page_size_is_capped() {
        let store = InMemoryRequestStore::new();
        for _ in 0..30 {
            store.put_request(&request("alice")).await.unwrap();
        }
        let filter = HistoryFilter::default();
        let page = store.list_requests("alice", &filter, 0, 100).await.unwrap();
        assert_eq!(page.len(), 20);
    }

    #[tokio::test]
    async fn update_status_sets_completion_time() {
        let store = InMemoryRequestStore::new();
        let request = request("alice");
        store.put_request(&request).await.unwrap();
        store
            .update_status(request.id, RequestStatus::Succeeded, Some(Utc::now()))
            .await
            .unwrap();
        let loaded = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RequestStatus::Succeeded);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn responses_roundtrip() {
        use council_core::{RiskLevel, SelfAssessment};
        let store = InMemoryRequestStore::new();
        let request = request("alice");
        store.put_request(&request).await.unwrap();
        let response = AgentResponse {
            subtask_id: SubtaskId::new(),
            model_id: "m".into(),
            content: "x".into(),
            assessment: SelfAssessment::new(0.9, RiskLevel::Low),
            created_at: Utc::now(),
            success: true,
        };
        store.put_responses(request.id, &[response]).await.unwrap();
    }
}
