use anyhow::Context;
use reel_scheduler::Scheduler;
use reel_worker::{jobs, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Initialize tracing from RUST_LOG or LOG_LEVEL
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.common.log_level)
                .unwrap_or_else(|_| "reel_worker=debug,reel_scheduler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(environment = %config.environment(), "Starting Reel worker");

    let scheduler = Scheduler::builder(config.scheduler.clone())
        .build()
        .context("Failed to build scheduler")?;

    jobs::register_builtin(&scheduler, config.scheduler.retention);
    jobs::install_default_schedules(&scheduler, &config)
        .await
        .context("Failed to install default schedules")?;

    scheduler.start().await.context("Failed to start scheduler")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    scheduler.stop().await.context("Failed to stop scheduler")?;
    tracing::info!("Reel worker stopped");

    Ok(())
}
