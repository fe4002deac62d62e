//! Trade Runner - console fleet service
//!
//! Boot sequence:
//! 1. Install the tracing subscriber
//! 2. Load layered settings (runner.toml + RUNNER_ environment)
//! 3. Build the shared hub and register the configured consoles
//! 4. Run until ctrl-c, then wind the fleet down

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use trade_runner::{FleetSupervisor, RunnerSettings, TradeHub};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Trade Runner...");

    let settings = RunnerSettings::load()?;
    info!(
        bots = settings.bots.len(),
        sync = ?settings.sync.mode,
        "settings loaded"
    );

    let hub = TradeHub::new(settings);
    let fleet = Arc::new(FleetSupervisor::new(Arc::clone(&hub)));
    fleet.register_from_settings()?;
    fleet.start_all();

    // Periodic operator summary until shutdown is requested.
    let summary_fleet = Arc::clone(&fleet);
    let summary_hub = Arc::clone(&hub);
    let summary_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            for line in summary_fleet.summaries() {
                info!("{line}");
            }
            let (specific, clones, dumps, distribution) = summary_hub.counts.snapshot();
            info!(specific, clones, dumps, distribution, "completed trades");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, stopping fleet");
    summary_task.abort();
    fleet.stop_all().await;
    info!("all workers stopped");
    Ok(())
}
