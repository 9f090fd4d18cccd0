use crate::config::Settings;
use crate::infrastructure::{AuditStore, FileStore, SqliteAuditStore};
use crate::providers::{OpenAiProvider, ProviderRegistry, ReplicateProvider};
use crate::proxy::client::build_http_client;
use crate::proxy::{
    ApprovalGate, DrainResult, EngineParts, EventBroadcaster, ExchangeEngine, ProxyService,
    ShutdownCoordinator,
};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    engine: Arc<ExchangeEngine>,
}

impl Application {
    /// Load settings from the environment and build every component
    pub async fn new() -> Result<Self> {
        let settings = Settings::new()?;
        Self::build(settings).await
    }

    #[instrument(skip(settings))]
    pub async fn build(settings: Settings) -> Result<Self> {
        info!(path = %settings.storage.database_path, "Opening audit database");
        let store: Arc<dyn AuditStore> =
            Arc::new(SqliteAuditStore::open(&settings.storage.database_path).await?);
        Self::with_store(settings, store)
    }

    /// Build against an existing store (tests, ephemeral runs)
    pub fn with_store(settings: Settings, store: Arc<dyn AuditStore>) -> Result<Self> {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiProvider::with_base_url(
            settings.providers.openai_base_url.clone(),
        )))?;
        registry.register(Arc::new(ReplicateProvider::with_base_url(
            settings.providers.replicate_base_url.clone(),
        )))?;

        let approvals = Arc::new(ApprovalGate::new(
            settings.approval_timeout(),
            settings.approval.enabled_at_startup,
        ));

        let engine = ExchangeEngine::new(
            settings.proxy_config()?,
            EngineParts {
                registry: Arc::new(registry),
                client: build_http_client()?,
                store,
                files: Arc::new(FileStore::new(&settings.storage.files_path)),
                approvals,
                events: Arc::new(EventBroadcaster::spawn()),
                shutdown: ShutdownCoordinator::new(),
            },
        );

        Ok(Self {
            settings,
            engine: Arc::new(engine),
        })
    }

    /// Serve until ctrl-c / SIGTERM, then drain
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.settings.listen_addr()).await?;
        self.run_until(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `signal` resolves, then run the shutdown
    /// sequence: close the event stream, refuse new dispatches, wait for
    /// in-flight exchanges up to the grace period.
    pub async fn run_until<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!(
            %addr,
            approval_mode = self.engine.approvals().is_enabled(),
            "AI gateway listening"
        );

        let router = ProxyService::new(Arc::clone(&self.engine)).into_router();
        let server = tokio::spawn(async move { axum::serve(listener, router).await });

        signal.await;
        info!("Shutdown signal received");

        self.engine.events().close();
        let shutdown = self.engine.shutdown();
        shutdown.begin_shutdown();

        match shutdown.drain(self.settings.grace_period()).await {
            DrainResult::Complete => info!("All in-flight exchanges finished"),
            DrainResult::Timeout { remaining } => {
                warn!(remaining, "Grace period elapsed with exchanges still in flight")
            }
        }

        server.abort();
        info!("AI gateway stopped");
        Ok(())
    }

    pub fn engine(&self) -> &Arc<ExchangeEngine> {
        &self.engine
    }

    pub fn grace_period(&self) -> Duration {
        self.settings.grace_period()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
