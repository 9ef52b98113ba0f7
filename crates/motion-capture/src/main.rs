mod cli;
mod config;
mod instance;
mod queue;
mod requests;
mod sensor;
mod service;
mod uploader;

use crate::cli::Args;
use crate::config::load_motion_capture_config;
use crate::instance::InstanceController;
use crate::queue::UploadQueue;
use crate::requests::TestCapture;
use crate::sensor::GpioMotionSensor;
use crate::service::MotionService;
use crate::uploader::Uploader;
use anyhow::Context;
use clap::Parser;
use feeder_camera::RpicamCamera;
use feeder_store::FileStore;
use std::sync::Arc;
use system_utils::logging::init_tracing;
use system_utils::signals::spawn_shutdown_handler;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_motion_capture_config(&args.config)?;
    let log_dir = args.log_dir.clone().or_else(|| config.log_dir.clone());
    let _log_guard = init_tracing("motion-capture", log_dir.as_deref(), args.log_to_stderr)?;

    let store_root = args.store_root.clone().unwrap_or_else(|| config.store_root());
    std::fs::create_dir_all(&store_root)
        .with_context(|| format!("failed to open store at {}", store_root.display()))?;
    let queue_dir = args.queue_dir.clone().unwrap_or_else(|| config.queue_dir());
    std::fs::create_dir_all(&queue_dir)
        .with_context(|| format!("failed to create {}", queue_dir.display()))?;

    let store = Arc::new(FileStore::new(store_root));
    let camera = Arc::new(RpicamCamera::new(config.rpicam()));
    let queue = UploadQueue::new(queue_dir);
    let queue_dir_display = queue.dir().display().to_string();
    let sensor = GpioMotionSensor::open(config.sensor())
        .await
        .context("motion sensor initialization failed")?;

    let service = MotionService {
        store: store.clone(),
        instances: InstanceController::new(
            camera.clone(),
            queue.clone(),
            config.settings_path(),
            config.warmup(),
        ),
        uploader: Uploader::new(queue, store.clone(), store.clone()),
        test_capture: TestCapture::new(
            camera,
            store.clone(),
            store,
            config.settings_path(),
            config.warmup(),
        ),
        retry_interval: config.retry_interval(),
    };

    let shutdown = CancellationToken::new();
    spawn_shutdown_handler(shutdown.clone());
    tracing::info!(event = "motion_capture.start", queue_dir = %queue_dir_display, "motion capture starting");
    service.run(Box::new(sensor), shutdown).await
}
