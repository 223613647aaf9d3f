//! Tollgate orchestrator service binary

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate_common::config::Settings;
use tollgate_orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("starting tollgate orchestrator v{}", tollgate_common::VERSION);

    let settings = Settings::load()?;
    info!(
        period = settings.collect.period,
        wait_periods = settings.collect.wait_periods,
        collector = %settings.collect.collector,
        storage = %settings.storage.backend,
        coordination = %settings.orchestrator.coordination_url,
        "loaded configuration"
    );

    let mut orchestrator = Orchestrator::from_settings(&settings).await?;

    tokio::select! {
        result = orchestrator.process() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    orchestrator.terminate().await?;
    info!("tollgate orchestrator stopped");
    Ok(())
}
