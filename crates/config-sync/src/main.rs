mod cli;
mod config;
mod mirror;

use crate::cli::Args;
use crate::config::load_config_sync_config;
use crate::mirror::SettingsMirror;
use anyhow::Context;
use clap::Parser;
use feeder_store::FileStore;
use std::sync::Arc;
use system_utils::logging::init_tracing;
use system_utils::signals::spawn_shutdown_handler;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config_sync_config(&args.config)?;
    let log_dir = args.log_dir.clone().or_else(|| config.log_dir.clone());
    let _log_guard = init_tracing("config-sync", log_dir.as_deref(), args.log_to_stderr)?;

    let store_root = args.store_root.clone().unwrap_or_else(|| config.store_root());
    std::fs::create_dir_all(&store_root)
        .with_context(|| format!("failed to open store at {}", store_root.display()))?;
    let store = Arc::new(FileStore::new(store_root));
    let settings_path = args
        .settings_path
        .clone()
        .unwrap_or_else(|| config.settings_path());

    let shutdown = CancellationToken::new();
    spawn_shutdown_handler(shutdown.clone());

    tracing::info!(event = "config_sync.start", settings_path = %settings_path.display(), "config sync starting");
    mirror::run(store, SettingsMirror::new(settings_path), shutdown).await?;
    tracing::info!(event = "config_sync.exit", "config sync stopped");
    Ok(())
}
