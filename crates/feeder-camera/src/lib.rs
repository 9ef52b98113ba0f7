#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod mjpeg;
mod rpicam;
mod settings;

pub use rpicam::{control_flag, RpicamCamera, RpicamConfig};
pub use settings::load_local_settings;

use async_trait::async_trait;
use bytes::Bytes;
use feeder_protocol::{LocalSettings, Resolution};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Receives every encoded low-resolution frame. Called from the encoder's
/// task, so it must return immediately.
pub type FrameSink = Arc<dyn Fn(Bytes) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraMode {
    DualStream,
    Still,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    pub mode: CameraMode,
    pub stream_resolution: Resolution,
    pub still_resolution: Resolution,
    pub framerate: u32,
}

impl CameraConfig {
    pub fn dual_stream(settings: &LocalSettings) -> Self {
        Self {
            mode: CameraMode::DualStream,
            stream_resolution: settings.stream_resolution,
            still_resolution: settings.snapshot_resolution,
            framerate: settings.stream_framerate,
        }
    }

    pub fn still(resolution: Resolution) -> Self {
        Self {
            mode: CameraMode::Still,
            stream_resolution: resolution,
            still_resolution: resolution,
            framerate: 1,
        }
    }
}

#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn configure(&self, config: CameraConfig) -> anyhow::Result<()>;

    async fn apply_control(&self, name: &str, value: &Value) -> anyhow::Result<()>;

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn capture_still(&self) -> anyhow::Result<Bytes>;

    async fn start_encoded_stream(&self, on_frame: FrameSink) -> anyhow::Result<()>;

    /// Resolves once the encoded stream ends without [`CameraDevice::stop`],
    /// e.g. because the encoder died. Stays resolved afterwards.
    async fn stream_lost(&self);
}

pub async fn apply_controls(camera: &dyn CameraDevice, controls: &BTreeMap<String, Value>) -> usize {
    let mut applied = 0;
    for (name, value) in controls {
        match camera.apply_control(name, value).await {
            Ok(()) => applied += 1,
            Err(err) => {
                warn!(control = %name, value = %value, error = %err, "camera control rejected");
            }
        }
    }
    info!(applied, total = controls.len(), "camera controls applied");
    applied
}
