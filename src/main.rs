use ai_gateway::config::Settings;
use ai_gateway::Application;
use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        environment = %settings.application.environment,
        "Starting AI gateway"
    );

    let app = Application::build(settings).await?;
    app.run().await?;

    Ok(())
}
