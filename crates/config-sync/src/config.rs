use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_SETTINGS_PATH: &str = "/var/lib/feeder/camera_settings.json";
const DEFAULT_STORE_ROOT: &str = "/var/lib/feeder/store";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConfigSyncConfig {
    pub(crate) settings_path: Option<PathBuf>,
    pub(crate) store_root: Option<PathBuf>,
    pub(crate) log_dir: Option<PathBuf>,
}

impl ConfigSyncConfig {
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
}

pub(crate) fn load_config_sync_config(path: &Path) -> anyhow::Result<ConfigSyncConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_default_locations() {
        let config: ConfigSyncConfig = toml::from_str("").expect("toml");
        assert_eq!(config.settings_path(), PathBuf::from(DEFAULT_SETTINGS_PATH));
        assert_eq!(config.store_root(), PathBuf::from(DEFAULT_STORE_ROOT));
    }
}
