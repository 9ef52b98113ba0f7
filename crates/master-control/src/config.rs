use crate::service::{ServiceKind, ServiceSpec};
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PID_DIR: &str = "/tmp/feeder";
const DEFAULT_STORE_ROOT: &str = "/var/lib/feeder/store";
const DEFAULT_CRASH_CHECK_SECS: u64 = 5;
const DEFAULT_HEARTBEAT_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MasterConfig {
    pub(crate) pid_dir: Option<PathBuf>,
    pub(crate) store_root: Option<PathBuf>,
    pub(crate) log_dir: Option<PathBuf>,
    pub(crate) crash_check_interval_secs: Option<u64>,
    pub(crate) heartbeat_interval_secs: Option<u64>,
    #[serde(default)]
    pub(crate) services: ServicesConfig,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ServicesConfig {
    pub(crate) camera_streaming: Option<ServiceConfig>,
    pub(crate) config_sync: Option<ServiceConfig>,
    pub(crate) motion_capture: Option<ServiceConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ServiceConfig {
    pub(crate) command: Option<String>,
    pub(crate) process_match: Option<String>,
    pub(crate) pid_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Timing {
    pub(crate) crash_check_interval: Duration,
    pub(crate) heartbeat_interval: Duration,
}

impl MasterConfig {
    pub(crate) fn pid_dir(&self) -> PathBuf {
        self.pid_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_DIR))
    }

    pub(crate) fn store_root(&self) -> PathBuf {
        self.store_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_ROOT))
    }

    pub(crate) fn timing(&self) -> Timing {
        Timing {
            crash_check_interval: Duration::from_secs(
                self.crash_check_interval_secs
                    .unwrap_or(DEFAULT_CRASH_CHECK_SECS)
                    .max(1),
            ),
            heartbeat_interval: Duration::from_secs(
                self.heartbeat_interval_secs
                    .unwrap_or(DEFAULT_HEARTBEAT_SECS)
                    .max(1),
            ),
        }
    }

    pub(crate) fn service_specs(&self) -> anyhow::Result<Vec<ServiceSpec>> {
        let pid_dir = self.pid_dir();
        ServiceKind::ALL
            .iter()
            .map(|kind| {
                let entry = match kind {
                    ServiceKind::CameraStreaming => self.services.camera_streaming.as_ref(),
                    ServiceKind::ConfigSync => self.services.config_sync.as_ref(),
                    ServiceKind::MotionCapture => self.services.motion_capture.as_ref(),
                };
                build_spec(*kind, entry, &pid_dir)
                    .with_context(|| format!("invalid [services.{}] entry", kind.name()))
            })
            .collect()
    }
}

fn default_command(kind: ServiceKind) -> &'static str {
    match kind {
        ServiceKind::CameraStreaming => "camera-server --config config/camera-server.toml",
        ServiceKind::ConfigSync => "config-sync --config config/config-sync.toml",
        ServiceKind::MotionCapture => "motion-capture --config config/motion-capture.toml",
    }
}

fn build_spec(
    kind: ServiceKind,
    entry: Option<&ServiceConfig>,
    pid_dir: &Path,
) -> anyhow::Result<ServiceSpec> {
    let raw = entry
        .and_then(|entry| entry.command.as_deref())
        .unwrap_or_else(|| default_command(kind));
    let mut words = shell_words::split(raw).with_context(|| format!("cannot parse {raw:?}"))?;
    if words.is_empty() {
        anyhow::bail!("command cannot be empty");
    }
    let program = words.remove(0);
    let process_match = entry
        .and_then(|entry| entry.process_match.clone())
        .or_else(|| {
            words
                .iter()
                .rev()
                .find(|word| !word.starts_with('-'))
                .cloned()
        })
        .unwrap_or_else(|| program.clone());
    let pid_file = entry
        .and_then(|entry| entry.pid_file.clone())
        .unwrap_or_else(|| pid_dir.join(format!("{}.pid", kind.name())));
    Ok(ServiceSpec {
        kind,
        program,
        args: words,
        pid_file,
        process_match,
    })
}

pub(crate) fn load_master_config(path: &Path) -> anyhow::Result<MasterConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: MasterConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.service_specs()?;
    Ok(config)
}
