//! In-memory audit store for tests and ephemeral runs

use crate::infrastructure::audit_store::*;
use crate::proxy::approval::Decision;
use crate::proxy::types::ExchangeId;
use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Default)]
struct MemoryState {
    requests: Vec<RequestRecord>,
    responses: Vec<ResponseRecord>,
    binary_files: Vec<BinaryFileRecord>,
}

/// Audit store that keeps every record in process memory
#[derive(Default)]
pub struct InMemoryAuditStore {
    state: RwLock<MemoryState>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every response record written for a request, in write order
    pub fn responses_for(&self, id: ExchangeId) -> Vec<ResponseRecord> {
        self.state
            .read()
            .responses
            .iter()
            .filter(|r| r.request_id == id)
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.state.read().requests.len()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn store_request(&self, record: RequestRecord) -> StoreResult<()> {
        self.state.write().requests.push(record);
        Ok(())
    }

    async fn store_response(&self, record: ResponseRecord) -> StoreResult<()> {
        self.state.write().responses.push(record);
        Ok(())
    }

    async fn store_binary_file(&self, record: BinaryFileRecord) -> StoreResult<()> {
        self.state.write().binary_files.push(record);
        Ok(())
    }

    async fn record_decision(&self, id: ExchangeId, decision: Decision) -> StoreResult<()> {
        let mut state = self.state.write();
        if let Some(request) = state.requests.iter_mut().find(|r| r.id == id) {
            request.approval = Some(decision.as_str().to_string());
        }
        Ok(())
    }

    async fn get_request(&self, id: ExchangeId) -> StoreResult<Option<RequestRecord>> {
        Ok(self
            .state
            .read()
            .requests
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn get_response_for_request(
        &self,
        id: ExchangeId,
    ) -> StoreResult<Option<ResponseRecord>> {
        Ok(self
            .state
            .read()
            .responses
            .iter()
            .find(|r| r.request_id == id)
            .cloned())
    }

    async fn binary_files_for_request(&self, id: ExchangeId) -> StoreResult<Vec<BinaryFileRecord>> {
        Ok(self
            .state
            .read()
            .binary_files
            .iter()
            .filter(|f| f.request_id == id)
            .cloned()
            .collect())
    }

    async fn list_requests(&self, filter: &RequestFilter) -> StoreResult<RequestPage> {
        let state = self.state.read();
        let mut matching: Vec<&RequestRecord> =
            state.requests.iter().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let requests = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(*filter.limit.as_ref() as usize)
            .map(|request| {
                let response = state
                    .responses
                    .iter()
                    .find(|r| r.request_id == request.id);
                RequestSummary {
                    id: request.id,
                    provider: request.provider.clone(),
                    endpoint: request.endpoint.clone(),
                    method: request.method.clone(),
                    created_at: request.created_at,
                    status: response.map(|r| r.status_code),
                    is_error: response.is_some_and(|r| r.is_error),
                    error_message: response.and_then(|r| r.error_message.clone()),
                }
            })
            .collect();

        Ok(RequestPage { requests, total })
    }

    async fn stats(&self) -> StoreResult<RequestStats> {
        let state = self.state.read();
        let mut stats = RequestStats {
            total_requests: state.requests.len() as u64,
            ..Default::default()
        };
        for request in &state.requests {
            *stats
                .requests_by_provider
                .entry(request.provider.clone())
                .or_default() += 1;
        }
        for response in &state.responses {
            *stats
                .requests_by_status
                .entry(response.status_code)
                .or_default() += 1;
        }
        Ok(stats)
    }
}
