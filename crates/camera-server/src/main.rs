mod cli;
mod config;
mod frame_buffer;
mod server;
mod session;
mod snapshot;

use crate::cli::Args;
use crate::config::load_camera_server_config;
use crate::server::StreamingServer;
use anyhow::Context;
use clap::Parser;
use feeder_camera::{load_local_settings, RpicamCamera};
use feeder_store::FileStore;
use std::sync::Arc;
use system_utils::logging::init_tracing;
use system_utils::signals::spawn_shutdown_handler;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_camera_server_config(&args.config)?;
    let log_dir = args.log_dir.clone().or_else(|| config.log_dir.clone());
    let _log_guard = init_tracing("camera-server", log_dir.as_deref(), args.log_to_stderr)?;

    let store_root = args.store_root.clone().unwrap_or_else(|| config.store_root());
    std::fs::create_dir_all(&store_root)
        .with_context(|| format!("failed to open store at {}", store_root.display()))?;
    let store = Arc::new(FileStore::new(store_root));
    let settings = load_local_settings(&config.settings_path());
    let camera = Arc::new(RpicamCamera::new(config.rpicam()));

    let server = StreamingServer::new(
        camera,
        store.clone(),
        store,
        settings,
        config.spool_dir(),
    );
    server
        .start_camera()
        .await
        .context("camera initialization failed")?;

    let listen_addr = args.listen_addr.clone().unwrap_or_else(|| config.listen_addr());
    let listener = match TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            server.stop().await;
            return Err(err).with_context(|| format!("failed to bind {listen_addr}"));
        }
    };
    spawn_shutdown_handler(server.shutdown_token());

    let result = server.listen(listener).await;
    server.stop().await;
    tracing::info!(event = "camera_server.exit", "camera server exited");
    result?;
    if server.stream_failed() {
        anyhow::bail!("camera stream ended unexpectedly");
    }
    Ok(())
}
