use feeder_protocol::LocalSettings;
use std::path::Path;
use tracing::{info, warn};

pub fn load_local_settings(path: &Path) -> LocalSettings {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no local settings file, using defaults");
            return LocalSettings::default();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read local settings, using defaults");
            return LocalSettings::default();
        }
    };
    match serde_json::from_slice::<LocalSettings>(&raw) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "invalid local settings, using defaults");
            LocalSettings::default()
        }
    }
}
