//! Oracle Coordinator Node
//!
//! Loads the node configuration, runs the request coordinator on a cron
//! schedule, and serves a small status API for the last run.

use std::net::SocketAddr;

use anyhow::{anyhow, Context};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;
use tracing_subscriber::EnvFilter;

use oracle_coordinator::app_state::AppState;
use oracle_coordinator::config::Config;
use oracle_coordinator::routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before the config interpolates them
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("failed to load node configuration")?;
    let cron_schedule = config.node_settings.cron_schedule.clone();
    let state = AppState::new(config);

    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow!("failed to create scheduler: {e:?}"))?;
    let job_state = state.clone();
    let job = Job::new_async(cron_schedule.as_str(), move |_id, _scheduler| {
        let state = job_state.clone();
        Box::pin(async move {
            state.run_coordinator().await;
        })
    })
    .map_err(|e| anyhow!("invalid cron schedule {cron_schedule:?}: {e:?}"))?;
    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow!("failed to schedule coordinator: {e:?}"))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow!("failed to start scheduler: {e:?}"))?;
    info!(schedule = %cron_schedule, "coordinator scheduled");

    // Get port from environment or default to 3001
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3001".to_string())
        .parse()
        .context("PORT must be a number")?;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, routes::router(state))
        .await
        .context("server error")?;
    Ok(())
}
