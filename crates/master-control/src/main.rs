mod cli;
mod config;
mod control;
mod heartbeat;
mod service;
mod supervisor;

use crate::cli::Args;
use crate::config::load_master_config;
use crate::supervisor::Supervisor;
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
    let config = load_master_config(&args.config)?;
    let log_dir = args.log_dir.clone().or_else(|| config.log_dir.clone());
    let _log_guard = init_tracing("master-control", log_dir.as_deref(), args.log_to_stderr)?;

    let pid_dir = config.pid_dir();
    std::fs::create_dir_all(&pid_dir)
        .with_context(|| format!("failed to create {}", pid_dir.display()))?;
    let store_root = args.store_root.clone().unwrap_or_else(|| config.store_root());
    std::fs::create_dir_all(&store_root)
        .with_context(|| format!("failed to open store at {}", store_root.display()))?;
    let store = Arc::new(FileStore::new(store_root));

    let supervisor = Arc::new(
        Supervisor::new(config.service_specs()?).context("failed to build supervisor")?,
    );
    let shutdown = CancellationToken::new();
    spawn_shutdown_handler(shutdown.clone());

    tracing::info!(event = "master_control.start", pid_dir = %pid_dir.display(), "master control starting");
    control::run(supervisor, store, config.timing(), shutdown).await?;
    tracing::info!(event = "master_control.exit", "master control stopped");
    Ok(())
}
