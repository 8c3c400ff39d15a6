use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use rollcall::config;
use rollcall::db;
use rollcall::remote::HttpRemoteStore;
use rollcall::sync;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Push all pending attendance rows to the remote store and exit"
)]
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

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let remote = HttpRemoteStore::from_config(&cfg)?;

    let pending = db::unsynced_count(&pool).await?;
    if pending == 0 {
        info!("nothing to sync");
        return Ok(());
    }

    info!(pending, "pushing pending attendance");
    let pushed = sync::push_pending(&pool, &remote).await?;
    info!(pushed, "sync complete");
    Ok(())
}
