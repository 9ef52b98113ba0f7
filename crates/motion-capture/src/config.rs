use anyhow::Context;
use feeder_camera::RpicamConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETTINGS_PATH: &str = "/var/lib/feeder/camera_settings.json";
const DEFAULT_STORE_ROOT: &str = "/var/lib/feeder/store";
const DEFAULT_QUEUE_DIR: &str = "/var/lib/feeder/upload_queue";
const DEFAULT_GPIO_VALUE_PATH: &str = "/sys/class/gpio/gpio4/value";
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 300;
const DEFAULT_WARMUP_MS: u64 = 1000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 20;
const DEFAULT_DEBOUNCE_MS: u64 = 200;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MotionCaptureConfig {
    pub(crate) settings_path: Option<PathBuf>,
    pub(crate) store_root: Option<PathBuf>,
    pub(crate) queue_dir: Option<PathBuf>,
    pub(crate) log_dir: Option<PathBuf>,
    pub(crate) retry_interval_secs: Option<u64>,
    pub(crate) warmup_ms: Option<u64>,
    #[serde(default)]
    pub(crate) sensor: SensorSection,
    #[serde(default)]
    pub(crate) camera: CameraSection,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SensorSection {
    pub(crate) value_path: Option<PathBuf>,
    pub(crate) poll_interval_ms: Option<u64>,
    pub(crate) debounce_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CameraSection {
    pub(crate) still_binary: Option<String>,
    pub(crate) still_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug)]
pub(crate) struct SensorConfig {
    pub(crate) value_path: PathBuf,
    pub(crate) poll_interval: Duration,
    pub(crate) debounce: Duration,
}

impl MotionCaptureConfig {
    pub(crate) fn settings_path(&self) -> PathBuf {
        self.settings_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH))
    }

    pub(crate) fn store_root(&self) -> PathBuf {
        self.store_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_ROOT))
    }

    pub(crate) fn queue_dir(&self) -> PathBuf {
        self.queue_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_QUEUE_DIR))
    }

    pub(crate) fn retry_interval(&self) -> Duration {
        Duration::from_secs(
            self.retry_interval_secs
                .unwrap_or(DEFAULT_RETRY_INTERVAL_SECS)
                .max(1),
        )
    }

    pub(crate) fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms.unwrap_or(DEFAULT_WARMUP_MS))
    }

    pub(crate) fn sensor(&self) -> SensorConfig {
        SensorConfig {
            value_path: self
                .sensor
                .value_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GPIO_VALUE_PATH)),
            poll_interval: Duration::from_millis(
                self.sensor
                    .poll_interval_ms
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                    .max(1),
            ),
            debounce: Duration::from_millis(self.sensor.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
        }
    }

    pub(crate) fn rpicam(&self) -> RpicamConfig {
        let defaults = RpicamConfig::default();
        RpicamConfig {
            still_binary: self
                .camera
                .still_binary
                .clone()
                .unwrap_or(defaults.still_binary),
            still_timeout: self
                .camera
                .still_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.still_timeout),
            ..defaults
        }
    }
}

pub(crate) fn load_motion_capture_config(path: &Path) -> anyhow::Result<MotionCaptureConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}
