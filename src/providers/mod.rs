//! Provider abstraction and routing for upstream AI APIs
//!
//! Each provider owns a disjoint path prefix. The registry resolves an inbound
//! path to the first registered provider that accepts it; overlapping
//! prefixes are refused at registration.

pub mod canned;
pub mod constants;
pub mod openai;
pub mod replicate;

use crate::infrastructure::{AuditStore, FileStore};
use crate::proxy::client::HttpClient;
use crate::proxy::types::{ExchangeId, ProxyError, ResponseId};
use async_trait::async_trait;
use bytes::Bytes;
use canned::{CannedResponse, OverrideAction};
use http::{HeaderMap, Uri};
use nutype::nutype;
use std::sync::Arc;

pub use openai::OpenAiProvider;
pub use replicate::ReplicateProvider;

/// Provider identifier, normalized to lowercase
#[nutype(
    sanitize(trim, lowercase),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct ProviderId(String);

/// Everything a provider needs to attach extra artifacts to an exchange
#[derive(Clone)]
pub struct PostProcessContext {
    pub request_id: ExchangeId,
    pub response_id: ResponseId,
    pub client: HttpClient,
    pub files: Arc<FileStore>,
    pub store: Arc<dyn AuditStore>,
}

/// Core provider trait for upstream AI APIs
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Inbound path prefix this provider owns
    fn route_prefix(&self) -> &str;

    fn accepts(&self, path: &str) -> bool {
        path.starts_with(self.route_prefix())
    }

    /// Upstream URL for an inbound path and query
    fn rewrite(&self, path: &str, query: Option<&str>) -> Result<Uri, ProviderError>;

    /// Validate auth headers and strip hop-by-hop headers before dispatch
    fn prepare(&self, headers: &mut HeaderMap) -> Result<(), ProviderError>;

    /// Whether this endpoint class may answer with an incrementally flushed body
    fn is_streaming(&self, path: &str) -> bool;

    fn canned_error(&self, action: OverrideAction) -> CannedResponse {
        canned::generic_error(action)
    }

    /// Best-effort work on a captured (decoded) response body
    async fn post_process(
        &self,
        _body: &Bytes,
        _ctx: &PostProcessContext,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Registry of all available providers
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, refusing prefixes that overlap an existing one
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<(), ProviderError> {
        let prefix = provider.route_prefix();
        if let Some(existing) = self.providers.iter().find(|p| {
            let other = p.route_prefix();
            other.starts_with(prefix) || prefix.starts_with(other)
        }) {
            return Err(ProviderError::OverlappingPrefix {
                existing: existing.route_prefix().to_string(),
                rejected: prefix.to_string(),
            });
        }
        self.providers.push(provider);
        Ok(())
    }

    /// First registered provider accepting the path
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.accepts(path)).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Provider-specific error type
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    AuthenticationError(String),

    #[error("Route prefix {rejected} overlaps already registered {existing}")]
    OverlappingPrefix { existing: String, rejected: String },

    #[error("Post-processing failed: {0}")]
    PostProcess(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::infrastructure::StoreError),
}

impl From<ProviderError> for ProxyError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidPath(msg) | ProviderError::InvalidUrl(msg) => {
                ProxyError::InvalidTargetUrl(msg)
            }
            ProviderError::AuthenticationError(msg) => ProxyError::Preparation(msg),
            other => ProxyError::Internal(other.to_string()),
        }
    }
}

/// Join `base` with `path` minus `strip`, keeping the query string
pub(crate) fn upstream_uri(
    base_url: &str,
    strip: &str,
    path: &str,
    query: Option<&str>,
) -> Result<Uri, ProviderError> {
    let stripped = path
        .strip_prefix(strip)
        .ok_or_else(|| ProviderError::InvalidPath(format!("missing {strip} prefix: {path}")))?;
    let target = match query {
        Some(q) if !q.is_empty() => format!("{}{stripped}?{q}", base_url.trim_end_matches('/')),
        _ => format!("{}{stripped}", base_url.trim_end_matches('/')),
    };
    target
        .parse()
        .map_err(|_| ProviderError::InvalidUrl(target))
}
