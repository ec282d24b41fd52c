use anyhow::Result;
use booktracker_offline::interceptor::Interceptor;
use booktracker_offline::sync::{self, SyncRegistration};
use booktracker_offline::upstream::{HttpUpstream, UpstreamService};
use booktracker_offline::{config, db};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/offline.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let upstream: Arc<dyn UpstreamService> = Arc::new(HttpUpstream::from_config(&cfg)?);
    let registration = SyncRegistration::new();
    let interceptor = Interceptor::from_config(&cfg, pool.clone(), upstream.clone(), registration.clone())?;

    interceptor.install().await?;
    interceptor.activate().await?;

    // Updates queued before a restart drain on the next reconnect.
    if db::count_pending(&pool).await? > 0 {
        registration.register();
    }

    info!(container = %cfg.cache.container, "offline agent ready");
    sync::run_sync_worker(
        pool,
        upstream,
        registration,
        cfg.sync.tag.clone(),
        Duration::from_millis(cfg.app.poll_interval_ms),
    )
    .await;

    Ok(())
}
