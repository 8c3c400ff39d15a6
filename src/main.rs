use anyhow::Result;
use clap::Parser;
use rollcall::config;
use rollcall::db;
use rollcall::remote::HttpRemoteStore;
use rollcall::sync::SyncCoordinator;
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

    /// Seed the demo roster when the student table is empty
    #[arg(long)]
    seed_demo: bool,
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

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    if args.seed_demo {
        let seeded = db::seed_demo_students(&pool).await?;
        if seeded > 0 {
            info!(seeded, "seeded demo roster");
        }
    }

    let remote = Arc::new(HttpRemoteStore::from_config(&cfg)?);
    let coordinator = Arc::new(SyncCoordinator::new(
        pool.clone(),
        remote,
        Duration::from_secs(cfg.app.sync_interval_seconds),
    ));

    let worker = coordinator.clone();
    tokio::spawn(async move { worker.run().await });

    let pending = db::unsynced_count(&pool).await?;
    info!(pending, "attendance daemon running");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
