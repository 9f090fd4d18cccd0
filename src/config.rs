use crate::providers::constants::routes;
use crate::proxy::types::{ProxyConfig, RequestSizeLimit, ResponseSizeLimit};
pub use config::ConfigError;
use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub storage: StorageSettings,
    pub proxy: ProxySettings,
    pub approval: ApprovalSettings,
    pub shutdown: ShutdownSettings,
    pub providers: ProviderSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub database_path: String,
    pub files_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxySettings {
    pub request_timeout_secs: u64,
    pub max_request_size: usize,
    pub max_response_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApprovalSettings {
    pub timeout_ms: u64,
    pub enabled_at_startup: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShutdownSettings {
    pub grace_period_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderSettings {
    pub openai_base_url: String,
    pub replicate_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let config = Self::defaults(&environment)?
            // Add configuration file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix
            .add_source(Environment::with_prefix("AI_GATEWAY").separator("__"))
            // Flat variables from earlier deployments win over everything else
            .set_override_option("application.port", env::var("PORT").ok())?
            .set_override_option("storage.database_path", env::var("DB_PATH").ok())?
            .set_override_option("storage.files_path", env::var("FILE_STORAGE_PATH").ok())?
            .build()?;

        config.try_deserialize()
    }

    fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("application.host", "0.0.0.0")?
            .set_default("application.port", 8080)?
            .set_default("application.environment", environment)?
            .set_default("storage.database_path", "./data/gateway.db")?
            .set_default("storage.files_path", "./data/files")?
            .set_default("proxy.request_timeout_secs", 300)?
            .set_default("proxy.max_request_size", 10_u64 * 1024 * 1024)?
            .set_default("proxy.max_response_size", 100_u64 * 1024 * 1024)?
            .set_default("approval.timeout_ms", 300_000)?
            .set_default("approval.enabled_at_startup", false)?
            .set_default("shutdown.grace_period_secs", 10)?
            .set_default("providers.openai_base_url", routes::OPENAI_BASE_URL)?
            .set_default("providers.replicate_base_url", routes::REPLICATE_BASE_URL)?
            .set_default("logging.level", "info")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    pub fn proxy_config(&self) -> Result<ProxyConfig, ConfigError> {
        let max_request_size = RequestSizeLimit::try_new(self.proxy.max_request_size)
            .map_err(|e| ConfigError::Message(format!("proxy.max_request_size: {e}")))?;
        let max_response_size = ResponseSizeLimit::try_new(self.proxy.max_response_size)
            .map_err(|e| ConfigError::Message(format!("proxy.max_response_size: {e}")))?;

        Ok(ProxyConfig {
            max_request_size,
            max_response_size,
            request_timeout: Duration::from_secs(self.proxy.request_timeout_secs),
        })
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval.timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_period_secs)
    }
}
