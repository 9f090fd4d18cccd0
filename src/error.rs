use crate::infrastructure::StoreError;
use crate::providers::ProviderError;
use crate::proxy::client::ClientBuildError;
use thiserror::Error;

/// Gateway startup and lifecycle errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP client error: {0}")]
    Client(#[from] ClientBuildError),

    #[error("Provider registration failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
