//! Router assembly for the gateway
//!
//! ## Service Lifecycle
//!
//! ```rust,ignore
//! use ai_gateway::proxy::{ExchangeEngine, ProxyService};
//!
//! let service = ProxyService::new(Arc::new(engine));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, service.into_router()).await?;
//! ```
//!
//! `/health` and `/api/*` are served locally; every other path goes to the
//! exchange engine.

use crate::api;
use crate::proxy::exchange::ExchangeEngine;
use crate::proxy::headers::paths;
use crate::proxy::middleware::logging_middleware;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::from_fn,
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// HTTP front of the gateway
#[derive(Clone)]
pub struct ProxyService {
    engine: Arc<ExchangeEngine>,
}

impl ProxyService {
    pub fn new(engine: Arc<ExchangeEngine>) -> Self {
        Self { engine }
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .route(paths::HEALTH, get(health_handler))
            .nest(paths::API_PREFIX, api::router())
            .fallback(proxy_handler)
            .layer(from_fn(logging_middleware))
            .with_state(self.engine)
    }
}

async fn proxy_handler(
    State(engine): State<Arc<ExchangeEngine>>,
    request: Request<Body>,
) -> Response {
    engine.handle(request).await
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{FileStore, InMemoryAuditStore};
    use crate::providers::{OpenAiProvider, ProviderRegistry};
    use crate::proxy::approval::ApprovalGate;
    use crate::proxy::client::build_http_client;
    use crate::proxy::events::EventBroadcaster;
    use crate::proxy::exchange::EngineParts;
    use crate::proxy::shutdown::ShutdownCoordinator;
    use crate::proxy::types::ProxyConfig;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(files: &std::path::Path) -> Router {
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::new(OpenAiProvider::with_base_url("http://127.0.0.1:9")))
            .unwrap();
        let engine = ExchangeEngine::new(
            ProxyConfig::default(),
            EngineParts {
                registry: Arc::new(registry),
                client: build_http_client().unwrap(),
                store: Arc::new(InMemoryAuditStore::new()),
                files: Arc::new(FileStore::new(files)),
                approvals: Arc::new(ApprovalGate::new(Duration::from_secs(1), false)),
                events: Arc::new(EventBroadcaster::spawn()),
                shutdown: ShutdownCoordinator::new(),
            },
        );
        ProxyService::new(Arc::new(engine)).into_router()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_path_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(
                Request::post("/anthropic/v1/messages")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "NO_PROVIDER");
    }
}
