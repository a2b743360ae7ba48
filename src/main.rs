mod config;
mod platform;
mod scheduler;
mod store;
mod sync;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::scheduler::tasks::{self, SyncRunner};
use crate::scheduler::Scheduler;
use crate::store::contentful::ContentfulClient;
use crate::sync::{SyncSettings, TestimonialSync};

#[tokio::main]
async fn main() -> Result<()> {
    // A .env file is optional; real deployments set the environment directly
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,testimonial_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Channel: #{}", config.discord.channel_name);
    info!("  Content type: {}", config.contentful.content_type);
    info!("  Interval: {} min", config.sync.interval_minutes);
    info!("  Quiet period: {} min", config.sync.quiet_period_minutes);
    info!("  Avatar field: {}", config.sync.include_avatar);
    info!("  Duplicate check: {}", config.sync.duplicate_check);

    let store = Arc::new(ContentfulClient::new(config.contentful.clone())?);
    let settings = SyncSettings::new(&config.discord.channel_name, &config.sync)?;
    let interval = config.sync.interval()?;
    let scheduler = Arc::new(Scheduler::new().await?);

    // The sync loop starts once the gateway hands over a ready connection
    let (ready_tx, ready_rx) = oneshot::channel();
    let sync_loop = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            // The gateway went away before it was ever ready
            let Ok(source) = ready_rx.await else {
                return Ok(());
            };
            let job = TestimonialSync::new(Arc::new(source), store, settings);
            let runner = Arc::new(SyncRunner::new(job));
            tasks::start_testimonial_sync(&scheduler, runner, interval)
                .await
                .context("Failed to start testimonial sync")
        })
    };

    info!("Bot is starting...");
    let gateway = platform::discord::run(&config.discord.bot_token, ready_tx);
    let result = run_until_failure(gateway, sync_loop).await;

    if let Err(e) = scheduler.shutdown().await {
        error!("{:#}", e);
    }

    result
}

/// Drive the gateway until it ends, or until the sync task fails to start.
/// The sync task finishing cleanly leaves the gateway running.
async fn run_until_failure<G>(gateway: G, mut sync_loop: JoinHandle<Result<()>>) -> Result<()>
where
    G: Future<Output = Result<()>>,
{
    tokio::pin!(gateway);

    let result = tokio::select! {
        result = &mut gateway => result,
        joined = &mut sync_loop => match joined {
            Ok(Ok(())) => gateway.await,
            Ok(Err(e)) => Err(e),
            Err(e) => Err(e).context("Testimonial sync task panicked"),
        },
    };

    sync_loop.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sync_start_failure_ends_process() {
        let sync_loop = tokio::spawn(async { anyhow::bail!("scheduler refused the job") });
        let gateway = std::future::pending::<Result<()>>();

        let err = run_until_failure(gateway, sync_loop).await.unwrap_err();
        assert!(err.to_string().contains("scheduler refused the job"));
    }

    #[tokio::test]
    async fn test_started_sync_waits_for_gateway() {
        let sync_loop = tokio::spawn(async { Ok(()) });
        let gateway = async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            anyhow::bail!("Discord client error")
        };

        let err = run_until_failure(gateway, sync_loop).await.unwrap_err();
        assert_eq!(err.to_string(), "Discord client error");
    }

    #[tokio::test]
    async fn test_gateway_exit_stops_pending_sync() {
        let sync_loop = tokio::spawn(std::future::pending::<Result<()>>());
        let gateway = async { Ok(()) };

        assert!(run_until_failure(gateway, sync_loop).await.is_ok());
    }

    async fn explode() -> Result<()> {
        panic!("scheduler poisoned")
    }

    #[tokio::test]
    async fn test_panicking_sync_task_is_an_error() {
        let sync_loop = tokio::spawn(explode());
        let gateway = std::future::pending::<Result<()>>();

        assert!(run_until_failure(gateway, sync_loop).await.is_err());
    }
}
