use anyhow::Context;
use feeder_camera::RpicamConfig;
use feeder_protocol::DEFAULT_CAMERA_SERVER_ADDR;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETTINGS_PATH: &str = "/var/lib/feeder/camera_settings.json";
const DEFAULT_STORE_ROOT: &str = "/var/lib/feeder/store";
const DEFAULT_SPOOL_DIR: &str = "/var/lib/feeder/snapshot_spool";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CameraServerConfig {
    pub(crate) listen_addr: Option<String>,
    pub(crate) settings_path: Option<PathBuf>,
    pub(crate) store_root: Option<PathBuf>,
    pub(crate) spool_dir: Option<PathBuf>,
    pub(crate) log_dir: Option<PathBuf>,
    #[serde(default)]
    pub(crate) camera: CameraSection,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CameraSection {
    pub(crate) video_binary: Option<String>,
    pub(crate) still_binary: Option<String>,
    pub(crate) still_timeout_secs: Option<u64>,
}

impl CameraServerConfig {
    pub(crate) fn listen_addr(&self) -> String {
        self.listen_addr
            .clone()
            .unwrap_or_else(|| DEFAULT_CAMERA_SERVER_ADDR.to_string())
    }

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

    pub(crate) fn spool_dir(&self) -> PathBuf {
        self.spool_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SPOOL_DIR))
    }

    pub(crate) fn rpicam(&self) -> RpicamConfig {
        let defaults = RpicamConfig::default();
        RpicamConfig {
            video_binary: self
                .camera
                .video_binary
                .clone()
                .unwrap_or(defaults.video_binary),
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
            max_jpeg_len: defaults.max_jpeg_len,
        }
    }
}

pub(crate) fn load_camera_server_config(path: &Path) -> anyhow::Result<CameraServerConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}
