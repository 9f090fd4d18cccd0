//! Replicate provider
//!
//! Besides routing, Replicate predictions reference generated images by URL.
//! Post-processing downloads those images so the audit trail keeps them after
//! the upstream links expire.

use super::canned::{self, CannedResponse, OverrideAction};
use super::constants::{auth, error_messages, json_fields, routes, streaming_endpoints, IMAGE_EXTENSIONS};
use super::{upstream_uri, PostProcessContext, Provider, ProviderError, ProviderId};
use crate::infrastructure::audit_store::BinaryFileRecord;
use crate::proxy::headers::{media_type, strip_hop_by_hop, AUTHORIZATION};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full, Limited};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_LIMIT: usize = 64 * 1024 * 1024;
const DEFAULT_IMAGE_TYPE: &str = "image/png";

/// Routes `/replicate/v1/...` to the Replicate API
pub struct ReplicateProvider {
    base_url: String,
}

impl Default for ReplicateProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicateProvider {
    pub fn new() -> Self {
        Self::with_base_url(routes::REPLICATE_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    async fn download_image(&self, url: &str, ctx: &PostProcessContext) -> Result<(), ProviderError> {
        let uri: Uri = url
            .parse()
            .map_err(|_| ProviderError::InvalidUrl(url.to_string()))?;
        let request = Request::get(uri)
            .body(Full::new(Bytes::new()))
            .map_err(|e| ProviderError::Download(e.to_string()))?;

        let response = tokio::time::timeout(DOWNLOAD_TIMEOUT, ctx.client.request(request))
            .await
            .map_err(|_| ProviderError::Download(format!("timed out fetching {url}")))?
            .map_err(|e| ProviderError::Download(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(ProviderError::Download(format!(
                "unexpected status {} for {url}",
                response.status()
            )));
        }

        let content_type =
            media_type(response.headers()).unwrap_or_else(|| DEFAULT_IMAGE_TYPE.to_string());
        let bytes = tokio::time::timeout(
            DOWNLOAD_TIMEOUT,
            Limited::new(response.into_body(), DOWNLOAD_LIMIT).collect(),
        )
        .await
        .map_err(|_| ProviderError::Download(format!("timed out reading {url}")))?
        .map_err(|e| ProviderError::Download(e.to_string()))?
        .to_bytes();

        let stored = ctx
            .files
            .save(self.id().as_ref(), &content_type, &bytes)
            .await?;
        ctx.store
            .store_binary_file(BinaryFileRecord {
                id: Uuid::now_v7(),
                request_id: ctx.request_id,
                response_id: Some(ctx.response_id),
                file_path: stored.relative_path,
                content_type,
                size: stored.size,
                created_at: Utc::now(),
            })
            .await?;

        debug!(request_id = %ctx.request_id, url, "Stored generated image");
        Ok(())
    }
}

/// Image URLs referenced by a prediction's `output` (string or array)
pub fn image_urls(prediction: &Value) -> Vec<String> {
    let candidates: Vec<&str> = match prediction.get(json_fields::OUTPUT) {
        Some(Value::String(url)) => vec![url.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    candidates
        .into_iter()
        .filter(|url| is_image_url(url))
        .map(str::to_string)
        .collect()
}

fn is_image_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://"))
        && IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[async_trait]
impl Provider for ReplicateProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new("replicate")
    }

    fn route_prefix(&self) -> &str {
        routes::REPLICATE_PREFIX
    }

    fn rewrite(&self, path: &str, query: Option<&str>) -> Result<Uri, ProviderError> {
        upstream_uri(&self.base_url, routes::REPLICATE_STRIP, path, query)
    }

    fn prepare(&self, headers: &mut HeaderMap) -> Result<(), ProviderError> {
        let value = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ProviderError::AuthenticationError(error_messages::MISSING_AUTHORIZATION.to_string())
            })?;
        if !value.starts_with(auth::TOKEN_PREFIX) && !value.starts_with(auth::BEARER_PREFIX) {
            return Err(ProviderError::AuthenticationError(
                error_messages::INVALID_REPLICATE_AUTHORIZATION.to_string(),
            ));
        }
        strip_hop_by_hop(headers);
        Ok(())
    }

    fn is_streaming(&self, path: &str) -> bool {
        streaming_endpoints::REPLICATE
            .iter()
            .any(|endpoint| path.contains(endpoint))
    }

    fn canned_error(&self, action: OverrideAction) -> CannedResponse {
        canned::replicate_error(action)
    }

    async fn post_process(&self, body: &Bytes, ctx: &PostProcessContext) -> Result<(), ProviderError> {
        let prediction: Value = serde_json::from_slice(body)
            .map_err(|e| ProviderError::PostProcess(format!("response is not JSON: {e}")))?;

        for url in image_urls(&prediction) {
            if let Err(e) = self.download_image(&url, ctx).await {
                warn!(request_id = %ctx.request_id, url, error = %e, "Failed to store generated image");
            }
        }
        Ok(())
    }
}
