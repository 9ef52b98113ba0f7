use anyhow::Context;
use feeder_protocol::documents::CONFIG_SETTINGS_PATH;
use feeder_protocol::settings::{merge_settings, normalize_settings};
use feeder_protocol::{Document, DocumentChange, LocalSettings};
use feeder_store::RemoteStateStore;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use system_utils::fs::atomic_write;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHANGE_QUEUE_CAPACITY: usize = 16;

pub(crate) struct SettingsMirror {
    path: PathBuf,
}

impl SettingsMirror {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) async fn apply(&self, remote: &Document) -> anyhow::Result<bool> {
        let normalized = normalize_settings(remote);
        if normalized.is_empty() {
            warn!(fields = remote.len(), "remote settings had no usable fields, ignoring");
            return Ok(false);
        }
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_merged(&path, normalized))
            .await
            .context("settings writer panicked")??;
        info!(event = "settings.synced", path = %self.path.display(), "local settings updated");
        Ok(true)
    }
}

fn write_merged(path: &Path, normalized: Document) -> anyhow::Result<()> {
    let mut base = read_local(path);
    merge_settings(&mut base, normalized);
    let rendered = serde_json::to_vec_pretty(&Value::Object(base))
        .context("failed to encode settings")?;
    atomic_write(path, &rendered)
}

fn read_local(path: &Path) -> Document {
    let parsed = std::fs::read(path)
        .ok()
        .and_then(|raw| serde_json::from_slice::<Value>(&raw).ok());
    match parsed {
        Some(Value::Object(map)) => map,
        _ => LocalSettings::default().to_document(),
    }
}

pub(crate) async fn run(
    store: Arc<dyn RemoteStateStore>,
    mirror: SettingsMirror,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<DocumentChange>(CHANGE_QUEUE_CAPACITY);
    let _subscription = store
        .subscribe(CONFIG_SETTINGS_PATH, tx)
        .await
        .context("failed to subscribe to remote settings")?;
    info!(event = "config_sync.subscribed", path = CONFIG_SETTINGS_PATH, "watching remote settings");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            change = rx.recv() => {
                let Some(change) = change else {
                    warn!("settings subscription ended");
                    break;
                };
                match change.document {
                    Some(document) => {
                        if let Err(err) = mirror.apply(&document).await {
                            warn!(error = %err, "failed to update local settings");
                        }
                    }
                    None => debug!("no remote settings document yet"),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use feeder_protocol::Resolution;
    use feeder_store::{MemoryStore, WriteMode};
    use serde_json::json;
    use std::time::Duration;

    fn temp_settings() -> PathBuf {
        std::env::temp_dir()
            .join(format!("config-sync-{}", uuid::Uuid::new_v4()))
            .join("camera_settings.json")
    }

    fn read_settings(path: &Path) -> LocalSettings {
        let raw = std::fs::read(path).expect("settings file");
        serde_json::from_slice(&raw).expect("settings json")
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn first_sync_fills_in_defaults() {
        let path = temp_settings();
        let mirror = SettingsMirror::new(path.clone());
        let applied = mirror
            .apply(&doc(json!({"resolution": "1280x720", "stream_framerate": 15})))
            .await
            .expect("apply");
        assert!(applied);

        let settings = read_settings(&path);
        assert_eq!(settings.stream_resolution, Resolution::new(1280, 720));
        assert_eq!(settings.snapshot_resolution, Resolution::new(1280, 720));
        assert_eq!(settings.stream_framerate, 15);
        assert_eq!(settings.capture_resolution, LocalSettings::default().capture_resolution);
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[tokio::test]
    async fn later_changes_keep_untouched_fields() {
        let path = temp_settings();
        let mirror = SettingsMirror::new(path.clone());
        mirror
            .apply(&doc(json!({"stream_resolution": [800, 600], "controls": {"Sharpness": 2.0}})))
            .await
            .expect("apply");
        mirror
            .apply(&doc(json!({"exposure_time": 5000})))
            .await
            .expect("apply");

        let settings = read_settings(&path);
        assert_eq!(settings.stream_resolution, Resolution::new(800, 600));
        assert_eq!(settings.exposure_time, Some(5000));
        assert_eq!(settings.camera_controls.get("Sharpness"), Some(&json!(2.0)));
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[tokio::test]
    async fn unusable_document_leaves_the_file_alone() {
        let path = temp_settings();
        let mirror = SettingsMirror::new(path.clone());
        let applied = mirror
            .apply(&doc(json!({"motion_capture_enabled": true, "resolution": "big"})))
            .await
            .expect("apply");
        assert!(!applied);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn run_mirrors_remote_changes_until_shutdown() {
        let path = temp_settings();
        let store = Arc::new(MemoryStore::new());
        store
            .set(CONFIG_SETTINGS_PATH, doc(json!({"stream_framerate": 12})), WriteMode::Replace)
            .await
            .expect("seed");
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(
            store.clone(),
            SettingsMirror::new(path.clone()),
            shutdown.clone(),
        ));

        wait_for(|| path.exists() && read_settings(&path).stream_framerate == 12).await;
        store
            .set(CONFIG_SETTINGS_PATH, doc(json!({"stream_framerate": 24})), WriteMode::Merge)
            .await
            .expect("update");
        wait_for(|| read_settings(&path).stream_framerate == 24).await;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stopped")
            .expect("join")
            .expect("run");
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not met in time");
    }
}
