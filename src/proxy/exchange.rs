//! Exchange engine: one inbound request, one upstream dispatch, one audit trail
//!
//! The engine owns the lifecycle of every proxied request. It persists the
//! request, passes the approval gate, rewrites and dispatches upstream, relays
//! the reply (buffered or streamed) and writes exactly one response record
//! per admitted exchange.
//!
//! Requests rejected before admission (no provider, oversized body, malformed
//! stream flag) keep only their request record.

use crate::infrastructure::audit_store::{BinaryFileRecord, RequestRecord, ResponseRecord, StoredHeaders};
use crate::infrastructure::{AuditStore, FileStore};
use crate::providers::canned::OverrideAction;
use crate::providers::{PostProcessContext, Provider, ProviderRegistry};
use crate::proxy::approval::{ApprovalGate, Decision};
use crate::proxy::capture::{decode_for_storage, is_binary_media};
use crate::proxy::client::HttpClient;
use crate::proxy::error_response::ErrorResponseExt;
use crate::proxy::events::{EventBroadcaster, GatewayEvent};
use crate::proxy::headers::{
    first_values, media_type, strip_hop_by_hop, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE,
    HOST,
};
use crate::proxy::shutdown::{ExchangeGuard, ShutdownCoordinator};
use crate::proxy::streaming::{streaming_requested, tee_stream, StreamCapture};
use crate::proxy::types::{
    DurationMillis, ExchangeId, ProxyConfig, ProxyError, ProxyResult, ResponseId,
    EXCHANGE_ID_HEADER, UNMATCHED_PROVIDER,
};
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use chrono::Utc;
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Request};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared collaborators of the engine
#[derive(Clone)]
pub struct EngineParts {
    pub registry: Arc<ProviderRegistry>,
    pub client: HttpClient,
    pub store: Arc<dyn AuditStore>,
    pub files: Arc<FileStore>,
    pub approvals: Arc<ApprovalGate>,
    pub events: Arc<EventBroadcaster>,
    pub shutdown: ShutdownCoordinator,
}

pub struct ExchangeEngine {
    config: ProxyConfig,
    registry: Arc<ProviderRegistry>,
    client: HttpClient,
    store: Arc<dyn AuditStore>,
    files: Arc<FileStore>,
    approvals: Arc<ApprovalGate>,
    events: Arc<EventBroadcaster>,
    shutdown: ShutdownCoordinator,
}

/// Per-exchange context threaded through the stages
struct Exchange {
    id: ExchangeId,
    provider: Arc<dyn Provider>,
    started: Instant,
    _guard: ExchangeGuard,
}

impl ExchangeEngine {
    pub fn new(config: ProxyConfig, parts: EngineParts) -> Self {
        Self {
            config,
            registry: parts.registry,
            client: parts.client,
            store: parts.store,
            files: parts.files,
            approvals: parts.approvals,
            events: parts.events,
            shutdown: parts.shutdown,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub fn files(&self) -> &Arc<FileStore> {
        &self.files
    }

    pub fn approvals(&self) -> &Arc<ApprovalGate> {
        &self.approvals
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Drive one inbound request to a client response
    pub async fn handle(self: Arc<Self>, request: Request<Body>) -> Response {
        let started = Instant::now();
        let id = ExchangeId::generate();
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();
        let provider = self.registry.resolve(&path);

        let (body, body_error) = match self.collect_request_body(body).await {
            Ok(bytes) => (bytes, None),
            Err(e) => (Bytes::new(), Some(e)),
        };

        self.persist_request(RequestRecord {
            id,
            provider: provider
                .as_ref()
                .map_or_else(|| UNMATCHED_PROVIDER.to_string(), |p| p.id().to_string()),
            endpoint: path.clone(),
            method: parts.method.to_string(),
            headers: first_values(&parts.headers),
            body: body.clone(),
            created_at: Utc::now(),
            approval: None,
        })
        .await;

        if let Some(e) = body_error {
            return self.reject(id, e);
        }
        let Some(provider) = provider else {
            return self.reject(id, ProxyError::NoProvider { path });
        };

        let streaming = if provider.is_streaming(&path) {
            match streaming_requested(parts.uri.query(), &body) {
                Ok(streaming) => streaming,
                Err(e) => return self.reject(id, e),
            }
        } else {
            false
        };

        let exchange = Exchange {
            id,
            provider,
            started,
            _guard: self.shutdown.track(),
        };

        match self.await_approval(&exchange, &path).await {
            Decision::Approved => {}
            Decision::Overridden(action) => return self.respond_canned(&exchange, action).await,
            Decision::TimedOut => {
                let timeout = self.approvals.timeout();
                return self
                    .conclude_with_error(&exchange, ProxyError::ApprovalTimeout(timeout))
                    .await;
            }
        }

        if !self.shutdown.dispatch_allowed() {
            return self.conclude_with_error(&exchange, ProxyError::ShuttingDown).await;
        }

        let outbound = match self.build_upstream_request(&exchange, &parts, body) {
            Ok(outbound) => outbound,
            Err(e) => return self.conclude_with_error(&exchange, e).await,
        };

        info!(
            request_id = %id,
            provider = %exchange.provider.id(),
            method = %parts.method,
            upstream = %outbound.uri(),
            streaming,
            "Dispatching upstream"
        );

        let timeout = self.config.request_timeout;
        let response = match tokio::time::timeout(timeout, self.client.request(outbound)).await {
            Err(_) => {
                return self
                    .conclude_with_error(&exchange, ProxyError::UpstreamTimeout(timeout))
                    .await
            }
            Ok(Err(e)) => {
                return self
                    .conclude_with_error(&exchange, ProxyError::UpstreamUnreachable(describe(&e)))
                    .await
            }
            Ok(Ok(response)) => response,
        };

        if streaming {
            self.relay_streaming(exchange, response)
        } else {
            self.relay_buffered(exchange, response).await
        }
    }

    async fn collect_request_body(&self, body: Body) -> ProxyResult<Bytes> {
        let max_size = self.config.max_request_size;
        Limited::new(body, *max_size.as_ref())
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    ProxyError::RequestTooLarge { max_size }
                } else {
                    ProxyError::Internal(format!("Body collection error: {e}"))
                }
            })
    }

    /// Single admission check. Suspends while a ticket is open.
    async fn await_approval(&self, exchange: &Exchange, path: &str) -> Decision {
        let provider = exchange.provider.id().to_string();
        let pending = match self.approvals.admit(exchange.id, &provider, path) {
            Ok(Some(pending)) => pending,
            Ok(None) => return Decision::Approved,
            Err(e) => {
                // Unreachable with fresh identifiers
                warn!(request_id = %exchange.id, error = %e, "Approval admission failed");
                return Decision::Approved;
            }
        };

        info!(request_id = %exchange.id, provider, "Request waiting for approval");
        self.events.publish(GatewayEvent::RequestPendingApproval {
            request_id: exchange.id,
            provider,
            endpoint: path.to_string(),
        });

        let decision = pending.wait().await;
        if let Err(e) = self.store.record_decision(exchange.id, decision).await {
            warn!(request_id = %exchange.id, error = %e, "Failed to record approval decision");
        }

        let event = match decision {
            Decision::Approved => GatewayEvent::RequestApproved {
                request_id: exchange.id,
            },
            Decision::Overridden(action) => GatewayEvent::RequestOverridden {
                request_id: exchange.id,
                action,
            },
            Decision::TimedOut => GatewayEvent::RequestApprovalTimeout {
                request_id: exchange.id,
            },
        };
        info!(request_id = %exchange.id, decision = decision.as_str(), "Approval resolved");
        self.events.publish(event);
        decision
    }

    fn build_upstream_request(
        &self,
        exchange: &Exchange,
        parts: &Parts,
        body: Bytes,
    ) -> ProxyResult<Request<Full<Bytes>>> {
        let uri = exchange
            .provider
            .rewrite(parts.uri.path(), parts.uri.query())?;

        let mut headers = parts.headers.clone();
        headers.remove(HOST);
        exchange.provider.prepare(&mut headers)?;

        let mut outbound = Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .body(Full::new(body))?;
        *outbound.headers_mut() = headers;
        Ok(outbound)
    }

    async fn relay_buffered(&self, exchange: Exchange, response: http::Response<Incoming>) -> Response {
        let (mut head, body) = response.into_parts();
        let max_size = self.config.max_response_size;
        let timeout = self.config.request_timeout;

        let raw = match tokio::time::timeout(timeout, Limited::new(body, *max_size.as_ref()).collect()).await
        {
            Err(_) => {
                return self
                    .conclude_with_error(&exchange, ProxyError::UpstreamTimeout(timeout))
                    .await
            }
            Ok(Err(e)) if e.is::<LengthLimitError>() => {
                return self
                    .conclude_with_error(&exchange, ProxyError::ResponseTooLarge { max_size })
                    .await
            }
            Ok(Err(e)) => {
                return self
                    .conclude_with_error(&exchange, ProxyError::UpstreamUnreachable(e.to_string()))
                    .await
            }
            Ok(Ok(collected)) => collected.to_bytes(),
        };

        let duration = DurationMillis::from_duration(exchange.started.elapsed());
        let encoding = header_str(&head.headers, CONTENT_ENCODING.as_str());
        let stored_body = decode_for_storage(&raw, encoding.as_deref(), *max_size.as_ref());
        let response_id = ResponseId::generate();

        let recorded = self
            .persist_response(ResponseRecord {
                id: response_id,
                request_id: exchange.id,
                status_code: head.status.as_u16(),
                headers: first_values(&head.headers),
                body: stored_body.clone(),
                duration_ms: duration,
                is_error: false,
                error_message: None,
                created_at: Utc::now(),
            })
            .await;

        let media = media_type(&head.headers);
        if recorded && is_binary_media(media.as_deref()) {
            self.save_artifact(&exchange, response_id, media.as_deref(), &raw)
                .await;
        }

        if recorded && head.status.is_success() {
            self.spawn_post_process(&exchange, response_id, stored_body);
        }

        strip_hop_by_hop(&mut head.headers);
        set_exchange_header(&mut head.headers, exchange.id);
        Response::from_parts(head, Body::from(raw))
    }

    /// Hand the client a live body; capture and persistence finish in the
    /// background while the exchange guard stays held.
    fn relay_streaming(self: Arc<Self>, exchange: Exchange, response: http::Response<Incoming>) -> Response {
        let (mut head, body) = response.into_parts();
        let status = head.status.as_u16();
        let stored_headers = first_values(&head.headers);
        let encoding = header_str(&head.headers, CONTENT_ENCODING.as_str());
        let id = exchange.id;
        let capture_limit = *self.config.max_response_size.as_ref();
        let (client_body, capture) = tee_stream(body, capture_limit);

        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            let outcome = capture.await.unwrap_or_else(|e| StreamCapture {
                body: Bytes::new(),
                upstream_error: Some(format!("capture task failed: {e}")),
                client_disconnected: true,
                truncated: false,
            });
            if outcome.client_disconnected {
                debug!(request_id = %exchange.id, "Stream captured after client disconnect");
            }

            let stored_body =
                decode_for_storage(&outcome.body, encoding.as_deref(), capture_limit);
            let is_error = outcome.upstream_error.is_some();
            let error_message = outcome.upstream_error.or_else(|| {
                outcome
                    .truncated
                    .then(|| format!("Stream capture truncated at {capture_limit} bytes"))
            });
            engine
                .persist_response(ResponseRecord {
                    id: ResponseId::generate(),
                    request_id: exchange.id,
                    status_code: status,
                    headers: stored_headers,
                    body: stored_body,
                    duration_ms: DurationMillis::from_duration(exchange.started.elapsed()),
                    is_error,
                    error_message,
                    created_at: Utc::now(),
                })
                .await;
            drop(exchange);
        });

        strip_hop_by_hop(&mut head.headers);
        if !head.headers.contains_key(CACHE_CONTROL) {
            head.headers
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }
        set_exchange_header(&mut head.headers, id);
        Response::from_parts(head, client_body)
    }

    async fn respond_canned(&self, exchange: &Exchange, action: OverrideAction) -> Response {
        let canned = exchange.provider.canned_error(action);
        let body = Bytes::from(canned.body_bytes());

        let mut headers = StoredHeaders::new();
        headers.insert(CONTENT_TYPE.to_string(), "application/json".to_string());
        self.persist_response(ResponseRecord {
            id: ResponseId::generate(),
            request_id: exchange.id,
            status_code: canned.status.as_u16(),
            headers,
            body: body.clone(),
            duration_ms: DurationMillis::from_duration(exchange.started.elapsed()),
            is_error: false,
            error_message: None,
            created_at: Utc::now(),
        })
        .await;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = canned.status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        set_exchange_header(response.headers_mut(), exchange.id);
        response
    }

    /// Terminal failure of an admitted exchange: one response record, then
    /// the JSON error body.
    async fn conclude_with_error(&self, exchange: &Exchange, error: ProxyError) -> Response {
        let status = error.status_code();
        if error.is_gateway_failure() {
            warn!(request_id = %exchange.id, error = %error, "Exchange failed");
        } else {
            info!(request_id = %exchange.id, error = %error, "Exchange rejected");
        }

        self.persist_response(ResponseRecord {
            id: ResponseId::generate(),
            request_id: exchange.id,
            status_code: status.as_u16(),
            headers: StoredHeaders::new(),
            body: Bytes::new(),
            duration_ms: DurationMillis::from_duration(exchange.started.elapsed()),
            is_error: error.is_gateway_failure(),
            error_message: Some(error.to_string()),
            created_at: Utc::now(),
        })
        .await;

        error
            .to_error_response()
            .with_request_id(exchange.id.to_string())
            .into_response_with_status(status)
    }

    /// Client-side rejection before admission. The request record is all
    /// that gets stored.
    fn reject(&self, id: ExchangeId, error: ProxyError) -> Response {
        let status = error.status_code();
        info!(request_id = %id, error = %error, "Request rejected");
        error
            .to_error_response()
            .with_request_id(id.to_string())
            .into_response_with_status(status)
    }

    async fn persist_request(&self, record: RequestRecord) {
        let event = GatewayEvent::RequestCreated {
            request_id: record.id,
            provider: record.provider.clone(),
            endpoint: record.endpoint.clone(),
            method: record.method.clone(),
            created_at: record.created_at,
        };
        match self.store.store_request(record).await {
            Ok(()) => self.events.publish(event),
            Err(e) => warn!(error = %e, "Failed to persist request record"),
        }
    }

    /// Returns whether the record was written
    async fn persist_response(&self, record: ResponseRecord) -> bool {
        let event = GatewayEvent::ResponseCreated {
            request_id: record.request_id,
            status_code: record.status_code,
            duration_ms: record.duration_ms,
            is_error: record.is_error,
            error_message: record.error_message.clone(),
        };
        let request_id = record.request_id;
        match self.store.store_response(record).await {
            Ok(()) => {
                self.events.publish(event);
                true
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Failed to persist response record");
                false
            }
        }
    }

    /// Keep a copy of a binary reply exactly as upstream sent it
    async fn save_artifact(
        &self,
        exchange: &Exchange,
        response_id: ResponseId,
        media: Option<&str>,
        raw: &Bytes,
    ) {
        let content_type = media.unwrap_or("application/octet-stream").to_string();
        let provider = exchange.provider.id();
        let stored = match self.files.save(provider.as_ref(), &content_type, raw).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(request_id = %exchange.id, error = %e, "Failed to save binary artifact");
                return;
            }
        };

        let record = BinaryFileRecord {
            id: Uuid::now_v7(),
            request_id: exchange.id,
            response_id: Some(response_id),
            file_path: stored.relative_path,
            content_type,
            size: stored.size,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.store_binary_file(record).await {
            warn!(request_id = %exchange.id, error = %e, "Failed to record binary artifact");
        }
    }

    fn spawn_post_process(&self, exchange: &Exchange, response_id: ResponseId, body: Bytes) {
        let provider = Arc::clone(&exchange.provider);
        let ctx = PostProcessContext {
            request_id: exchange.id,
            response_id,
            client: self.client.clone(),
            files: Arc::clone(&self.files),
            store: Arc::clone(&self.store),
        };
        tokio::spawn(async move {
            if let Err(e) = provider.post_process(&body, &ctx).await {
                warn!(request_id = %ctx.request_id, error = %e, "Post-processing failed");
            }
        });
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn set_exchange_header(headers: &mut HeaderMap, id: ExchangeId) {
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        headers.insert(EXCHANGE_ID_HEADER, value);
    }
}

/// Error text including the underlying cause (connect errors hide it)
fn describe(error: &(dyn StdError + 'static)) -> String {
    match error.source() {
        Some(source) => format!("{error}: {source}"),
        None => error.to_string(),
    }
}
