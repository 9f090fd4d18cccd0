//! Shared harness for the black-box gateway suites
//!
//! Mock upstreams are plain axum routers bound to ephemeral ports; the
//! gateway under test runs the real router over TCP with an in-memory store.

#![allow(dead_code)]

use ai_gateway::config::{
    ApplicationSettings, ApprovalSettings, LoggingSettings, ProviderSettings, ProxySettings,
    Settings, ShutdownSettings, StorageSettings,
};
use ai_gateway::infrastructure::InMemoryAuditStore;
use ai_gateway::proxy::client::{build_http_client, HttpClient};
use ai_gateway::proxy::types::{ExchangeId, EXCHANGE_ID_HEADER};
use ai_gateway::proxy::{ExchangeEngine, ProxyService};
use ai_gateway::Application;
use axum::Router;
use bytes::Bytes;
use http::{HeaderMap, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const OPENAI_AUTH: &str = "Bearer sk-test";
pub const REPLICATE_AUTH: &str = "Token r8_test";

/// A 1x1 PNG
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

pub struct TestGateway {
    pub url: String,
    pub engine: Arc<ExchangeEngine>,
    pub store: Arc<InMemoryAuditStore>,
    pub client: HttpClient,
    pub files: TempDir,
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn exchange_id(&self) -> ExchangeId {
        let raw = self.headers[EXCHANGE_ID_HEADER].to_str().unwrap();
        ExchangeId::parse(raw).unwrap()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub fn settings(upstream: &str, files: &TempDir) -> Settings {
    Settings {
        application: ApplicationSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
        },
        storage: StorageSettings {
            database_path: ":memory:".to_string(),
            files_path: files.path().to_string_lossy().into_owned(),
        },
        proxy: ProxySettings {
            request_timeout_secs: 5,
            max_request_size: 1024 * 1024,
            max_response_size: 8 * 1024 * 1024,
        },
        approval: ApprovalSettings {
            timeout_ms: 2_000,
            enabled_at_startup: false,
        },
        shutdown: ShutdownSettings {
            grace_period_secs: 10,
        },
        providers: ProviderSettings {
            openai_base_url: upstream.to_string(),
            replicate_base_url: upstream.to_string(),
        },
        logging: LoggingSettings {
            level: "debug".to_string(),
        },
    }
}

/// Build the application without serving it
pub fn build_app(
    upstream: &str,
    customize: impl FnOnce(&mut Settings),
) -> (Application, Arc<InMemoryAuditStore>, TempDir) {
    let files = TempDir::new().unwrap();
    let mut settings = settings(upstream, &files);
    customize(&mut settings);

    let store = Arc::new(InMemoryAuditStore::new());
    let app = Application::with_store(settings, store.clone()).unwrap();
    (app, store, files)
}

pub async fn start_gateway(upstream: &str, customize: impl FnOnce(&mut Settings)) -> TestGateway {
    let (app, store, files) = build_app(upstream, customize);
    let engine = Arc::clone(app.engine());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let router = ProxyService::new(Arc::clone(&engine)).into_router();
    tokio::spawn(async move { axum::serve(listener, router).await });

    TestGateway {
        url,
        engine,
        store,
        client: build_http_client().unwrap(),
        files,
    }
}

/// Serve `router` on an ephemeral port and return its base URL
pub async fn spawn_upstream(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, router).await });
    url
}

/// Base URL of a port nothing listens on
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}

impl TestGateway {
    pub fn request(&self, method: &str, path: &str) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(format!("{}{path}", self.url))
    }

    pub async fn send(&self, request: http::request::Builder, body: impl Into<Bytes>) -> Reply {
        let response = self
            .client
            .request(request.body(Full::new(body.into())).unwrap())
            .await
            .unwrap();
        let (parts, body) = response.into_parts();
        Reply {
            status: parts.status,
            headers: parts.headers,
            body: body.collect().await.unwrap().to_bytes(),
        }
    }

    pub async fn get(&self, path: &str) -> Reply {
        self.send(self.request("GET", path), Bytes::new()).await
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> Reply {
        self.send(
            self.request("POST", path)
                .header("content-type", "application/json"),
            body.to_string(),
        )
        .await
    }

    pub async fn openai(&self, path: &str, body: serde_json::Value) -> Reply {
        self.send(
            self.request("POST", path)
                .header("authorization", OPENAI_AUTH)
                .header("content-type", "application/json"),
            body.to_string(),
        )
        .await
    }
}

/// Poll `check` until it yields a value or `within` elapses
pub async fn eventually<T, F, Fut>(within: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
