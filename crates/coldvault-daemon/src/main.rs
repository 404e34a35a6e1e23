mod app;

use coldvault_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Load configuration
    let config = Config::from_env()?;

    coldvault_infra::init_telemetry();

    let app = app::App::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    app.shutdown().await;

    Ok(())
}
