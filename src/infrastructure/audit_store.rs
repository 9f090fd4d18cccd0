//! Audit persistence contract
//!
//! The exchange engine writes through [`AuditStore`] and never depends on a
//! concrete backend. Identifiers are assigned by the engine, so every write
//! is an insert of a fully formed record.

use crate::proxy::approval::Decision;
use crate::proxy::types::{DurationMillis, ExchangeId, ResponseId};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Flattened `name -> first value` header map as stored
pub type StoredHeaders = BTreeMap<String, String>;

/// Page size accepted by [`RequestFilter`]
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1000),
    default = 50,
    derive(Clone, Copy, Debug, Display, Default, PartialEq, Eq, Serialize, TryFrom, AsRef)
)]
pub struct ListLimit(u32);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Path escapes storage root: {0}")]
    PathTraversal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Inbound request as captured before dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    pub id: ExchangeId,
    pub provider: String,
    pub endpoint: String,
    pub method: String,
    pub headers: StoredHeaders,
    #[serde(serialize_with = "serialize_lossy")]
    pub body: Bytes,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<String>,
}

/// Terminal response half of an exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRecord {
    pub id: ResponseId,
    pub request_id: ExchangeId,
    pub status_code: u16,
    pub headers: StoredHeaders,
    #[serde(serialize_with = "serialize_lossy")]
    pub body: Bytes,
    pub duration_ms: DurationMillis,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Pointer to a binary payload saved by the file store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinaryFileRecord {
    pub id: Uuid,
    pub request_id: ExchangeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<ResponseId>,
    pub file_path: String,
    pub content_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Row of the request listing, joined with its response when one exists
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSummary {
    pub id: ExchangeId,
    pub provider: String,
    pub endpoint: String,
    pub method: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub provider: Option<String>,
    /// Substring of the endpoint path
    pub path_pattern: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: ListLimit,
    pub offset: u32,
}

impl RequestFilter {
    pub(crate) fn matches(&self, record: &RequestRecord) -> bool {
        self.provider
            .as_ref()
            .is_none_or(|provider| &record.provider == provider)
            && self
                .path_pattern
                .as_ref()
                .is_none_or(|pattern| record.endpoint.contains(pattern.as_str()))
            && self.date_from.is_none_or(|from| record.created_at >= from)
            && self.date_to.is_none_or(|to| record.created_at <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestPage {
    pub requests: Vec<RequestSummary>,
    /// Number of records matching the filter, ignoring pagination
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestStats {
    pub total_requests: u64,
    pub requests_by_provider: BTreeMap<String, u64>,
    pub requests_by_status: BTreeMap<u16, u64>,
}

/// Persistence collaborator for the audit trail
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn store_request(&self, record: RequestRecord) -> StoreResult<()>;

    async fn store_response(&self, record: ResponseRecord) -> StoreResult<()>;

    async fn store_binary_file(&self, record: BinaryFileRecord) -> StoreResult<()>;

    /// Record the terminal approval decision against a request
    async fn record_decision(&self, id: ExchangeId, decision: Decision) -> StoreResult<()>;

    async fn get_request(&self, id: ExchangeId) -> StoreResult<Option<RequestRecord>>;

    async fn get_response_for_request(&self, id: ExchangeId)
        -> StoreResult<Option<ResponseRecord>>;

    async fn binary_files_for_request(&self, id: ExchangeId) -> StoreResult<Vec<BinaryFileRecord>>;

    /// Newest first
    async fn list_requests(&self, filter: &RequestFilter) -> StoreResult<RequestPage>;

    async fn stats(&self) -> StoreResult<RequestStats>;
}

fn serialize_lossy<S: serde::Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}
