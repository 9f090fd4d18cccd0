//! Handlers for the operator control surface and read API

use super::models::{
    ApprovalReply, ListQuery, OverrideBody, OverrideReply, OverrideStatus, RequestDetail,
    ToggleReply,
};
use crate::infrastructure::audit_store::{RequestPage, RequestStats};
use crate::infrastructure::file_store::content_type_for;
use crate::infrastructure::StoreError;
use crate::providers::canned::OverrideAction;
use crate::proxy::approval::{ApprovalError, PendingTicket, Verdict};
use crate::proxy::events::GatewayEvent;
use crate::proxy::exchange::ExchangeEngine;
use crate::proxy::headers::CONTENT_TYPE;
use crate::proxy::types::ExchangeId;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::{stream, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Errors surfaced by the operator API as `{"error": "..."}`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) | ApiError::Approval(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::PathTraversal(_)) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(e) => {
                warn!(error = %e, "Operator API storage failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub async fn list_requests(
    State(engine): State<Arc<ExchangeEngine>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<RequestPage>> {
    let page = engine.store().list_requests(&query.into_filter()).await?;
    Ok(Json(page))
}

pub async fn get_request(
    State(engine): State<Arc<ExchangeEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RequestDetail>> {
    let not_found = || ApiError::NotFound("request not found".to_string());
    let id = ExchangeId::parse(&id).ok_or_else(not_found)?;
    let store = engine.store();

    let request = store.get_request(id).await?.ok_or_else(not_found)?;
    let response = store.get_response_for_request(id).await?;
    let binary_files = store.binary_files_for_request(id).await?;

    Ok(Json(RequestDetail {
        request,
        response,
        binary_files,
    }))
}

pub async fn get_file(
    State(engine): State<Arc<ExchangeEngine>>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let full_path = engine.files().resolve(&path)?;
    let bytes = match tokio::fs::read(&full_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("file not found".to_string()))
        }
        Err(e) => return Err(StoreError::Io(e).into()),
    };

    Ok(([(CONTENT_TYPE, content_type_for(&full_path))], bytes).into_response())
}

pub async fn stats(State(engine): State<Arc<ExchangeEngine>>) -> ApiResult<Json<RequestStats>> {
    Ok(Json(engine.store().stats().await?))
}

/// Live lifecycle events. The stream ends when the broadcaster closes.
pub async fn events(
    State(engine): State<Arc<ExchangeEngine>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let observer = engine.events().subscribe();

    let connected = stream::once(async {
        Ok(Event::default().event("connected").data("{}"))
    });
    let updates = stream::unfold(observer, |mut observer| async move {
        let event = observer.recv().await?;
        let sse = Event::default()
            .event(event.name())
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().event(event.name()));
        Some((Ok(sse), observer))
    });

    Sse::new(connected.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    )
}

pub async fn toggle_override(State(engine): State<Arc<ExchangeEngine>>) -> Json<ToggleReply> {
    let enabled = engine.approvals().toggle();
    engine
        .events()
        .publish(GatewayEvent::OverrideModeChanged { enabled });
    Json(ToggleReply { enabled })
}

pub async fn override_status(State(engine): State<Arc<ExchangeEngine>>) -> Json<OverrideStatus> {
    let approvals = engine.approvals();
    Json(OverrideStatus {
        enabled: approvals.is_enabled(),
        pending_count: approvals.pending_count(),
    })
}

pub async fn pending_approvals(
    State(engine): State<Arc<ExchangeEngine>>,
) -> Json<Vec<PendingTicket>> {
    Json(engine.approvals().pending())
}

pub async fn approve_request(
    State(engine): State<Arc<ExchangeEngine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApprovalReply>> {
    let id = ExchangeId::parse(&id).ok_or(ApprovalError::NotPending)?;
    engine.approvals().deliver(id, Verdict::Approve)?;
    info!(request_id = %id, "Request approved by operator");

    Ok(Json(ApprovalReply {
        request_id: id,
        status: "approved".to_string(),
    }))
}

pub async fn override_request(
    State(engine): State<Arc<ExchangeEngine>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<OverrideReply>> {
    let OverrideBody { action } = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid request body".to_string()))?;
    let action = action
        .parse::<OverrideAction>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let id = ExchangeId::parse(&id).ok_or(ApprovalError::NotPending)?;
    engine
        .approvals()
        .deliver(id, Verdict::Override(action))?;
    info!(request_id = %id, %action, "Request overridden by operator");

    Ok(Json(OverrideReply {
        request_id: id,
        action,
    }))
}
