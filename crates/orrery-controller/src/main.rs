//! Orrery controller binary.
//!
//! Runs the workload reconciliation loop until interrupted.

use tracing::info;
use tracing_subscriber::EnvFilter;

use orrery_controller::{ControllerConfig, ControllerService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("orrery_controller=info".parse()?),
        )
        .init();

    info!("orrery controller starting");

    let config = ControllerConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        ControllerConfig::default()
    });

    info!(
        workers = config.workers.count,
        max_retries = config.queue.max_retries,
        "configuration loaded"
    );

    ControllerService::new(config).run().await?;

    Ok(())
}
