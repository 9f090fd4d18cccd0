//! Outbound HTTP client shared by the engine and provider post-processing

use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;

/// Pooled HTTP/1.1 + HTTP/2 client speaking both `http` and `https`
pub type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

#[derive(Debug, thiserror::Error)]
#[error("TLS setup failed: {0}")]
pub struct ClientBuildError(#[from] rustls::Error);

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Build the client with webpki roots. Plain `http` upstreams stay allowed
/// so local mocks and self-hosted gateways work.
pub fn build_http_client() -> Result<HttpClient, ClientBuildError> {
    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(crypto_provider())?
        .https_or_http()
        .enable_all_versions()
        .build();

    Ok(Client::builder(TokioExecutor::new()).build(connector))
}
