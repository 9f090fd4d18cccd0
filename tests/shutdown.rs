//! Graceful shutdown: in-flight exchanges drain, new ones are refused

mod common;

use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use common::*;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

async fn slow_upstream(delay: Duration) -> String {
    let router = Router::new().route(
        "/v1/embeddings",
        post(move || async move {
            tokio::time::sleep(delay).await;
            axum::Json(json!({ "data": [] }))
        }),
    );
    spawn_upstream(router).await
}

#[tokio::test]
async fn test_drain_waits_for_in_flight_exchange() {
    let upstream = slow_upstream(Duration::from_secs(2)).await;
    let (app, store, _files) = build_app(&upstream, |_| {});
    let engine = std::sync::Arc::clone(app.engine());
    let mut observer = engine.events().subscribe();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(app.run_until(listener, async {
        let _ = stopped.await;
    }));

    let gw = TestGateway {
        url,
        engine: std::sync::Arc::clone(&engine),
        store,
        client: ai_gateway::proxy::client::build_http_client().unwrap(),
        files: tempfile::TempDir::new().unwrap(),
    };

    let held = {
        let client = gw.client.clone();
        let request = gw
            .request("POST", "/openai/v1/embeddings")
            .header("authorization", OPENAI_AUTH)
            .body(http_body_util::Full::new(bytes::Bytes::from_static(b"{}")))
            .unwrap();
        tokio::spawn(async move { client.request(request).await.unwrap().status() })
    };

    let engine_ref = &engine;
    eventually(Duration::from_secs(2), || async move {
        (engine_ref.shutdown().in_flight() == 1).then_some(())
    })
    .await
    .expect("exchange never became in flight");

    let signalled = Instant::now();
    stop.send(()).unwrap();

    eventually(Duration::from_secs(1), || async move {
        (!engine_ref.shutdown().dispatch_allowed()).then_some(())
    })
    .await
    .expect("shutdown never began");

    // New exchanges arriving during the drain are refused and recorded
    let refused = gw
        .openai("/openai/v1/embeddings", json!({ "input": "late" }))
        .await;
    assert_eq!(refused.status, StatusCode::SERVICE_UNAVAILABLE);
    let responses = gw.store.responses_for(refused.exchange_id());
    assert_eq!(responses.len(), 1);
    assert!(responses[0].is_error);

    server.await.unwrap().unwrap();
    let drained_after = signalled.elapsed();
    assert!(drained_after < Duration::from_secs(5), "drain took {drained_after:?}");

    assert_eq!(held.await.unwrap(), StatusCode::OK);
    assert_eq!(engine.shutdown().in_flight(), 0);

    // The event stream is closed before draining starts
    let mut saw_end = false;
    while let Ok(next) = tokio::time::timeout(Duration::from_millis(200), observer.recv()).await {
        if next.is_none() {
            saw_end = true;
            break;
        }
    }
    assert!(saw_end);
}

#[tokio::test]
async fn test_grace_period_bounds_the_drain() {
    let upstream = slow_upstream(Duration::from_secs(5)).await;
    let (app, _store, _files) = build_app(&upstream, |s| s.shutdown.grace_period_secs = 1);
    let engine = std::sync::Arc::clone(app.engine());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(app.run_until(listener, async {
        let _ = stopped.await;
    }));

    let client = ai_gateway::proxy::client::build_http_client().unwrap();
    let request = http::Request::post(format!("{url}/openai/v1/embeddings"))
        .header("authorization", OPENAI_AUTH)
        .body(http_body_util::Full::new(bytes::Bytes::from_static(b"{}")))
        .unwrap();
    let _held = tokio::spawn(async move { client.request(request).await });

    let engine_ref = &engine;
    eventually(Duration::from_secs(2), || async move {
        (engine_ref.shutdown().in_flight() == 1).then_some(())
    })
    .await
    .expect("exchange never became in flight");

    let signalled = Instant::now();
    stop.send(()).unwrap();
    server.await.unwrap().unwrap();

    let elapsed = signalled.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "returned after {elapsed:?}");
}
