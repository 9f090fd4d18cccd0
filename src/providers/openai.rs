//! OpenAI provider

use super::canned::{self, CannedResponse, OverrideAction};
use super::constants::{error_messages, routes, streaming_endpoints};
use super::{upstream_uri, Provider, ProviderError, ProviderId};
use crate::proxy::headers::{strip_hop_by_hop, AUTHORIZATION};
use http::{HeaderMap, Uri};

/// Routes `/openai/v1/...` to the OpenAI API
pub struct OpenAiProvider {
    base_url: String,
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiProvider {
    pub fn new() -> Self {
        Self::with_base_url(routes::OPENAI_BASE_URL)
    }

    /// Point the provider at a different upstream (self-hosted or test)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Provider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new("openai")
    }

    fn route_prefix(&self) -> &str {
        routes::OPENAI_PREFIX
    }

    fn rewrite(&self, path: &str, query: Option<&str>) -> Result<Uri, ProviderError> {
        upstream_uri(&self.base_url, routes::OPENAI_STRIP, path, query)
    }

    fn prepare(&self, headers: &mut HeaderMap) -> Result<(), ProviderError> {
        if headers.get(AUTHORIZATION).is_none_or(|v| v.is_empty()) {
            return Err(ProviderError::AuthenticationError(
                error_messages::MISSING_AUTHORIZATION.to_string(),
            ));
        }
        strip_hop_by_hop(headers);
        Ok(())
    }

    fn is_streaming(&self, path: &str) -> bool {
        streaming_endpoints::OPENAI
            .iter()
            .any(|endpoint| path.contains(endpoint))
    }

    fn canned_error(&self, action: OverrideAction) -> CannedResponse {
        canned::openai_error(action)
    }
}
