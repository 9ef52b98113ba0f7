use anyhow::Context;
use bytes::Bytes;
use feeder_camera::CameraDevice;
use feeder_protocol::documents::{child_path, document, SNAPSHOTS_COLLECTION, SNAPSHOTS_STORAGE_PATH};
use feeder_protocol::{Resolution, SnapshotStatus};
use feeder_store::{BlobStore, RemoteStateStore, WriteMode};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use system_utils::fs::atomic_write;
use system_utils::time::{file_stamp, rfc3339};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub(crate) struct SnapshotService {
    camera: Arc<dyn CameraDevice>,
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn RemoteStateStore>,
    resolution: Resolution,
    spool_dir: PathBuf,
    capture_lock: Mutex<()>,
}

impl SnapshotService {
    pub(crate) fn new(
        camera: Arc<dyn CameraDevice>,
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn RemoteStateStore>,
        resolution: Resolution,
        spool_dir: PathBuf,
    ) -> Self {
        Self {
            camera,
            blobs,
            store,
            resolution,
            spool_dir,
            capture_lock: Mutex::new(()),
        }
    }

    pub(crate) async fn take_snapshot(&self) -> SnapshotStatus {
        let _capture = self.capture_lock.lock().await;
        let result = self.capture_and_upload().await;
        match &result {
            Ok(url) => info!(event = "snapshot.uploaded", url = %url, "snapshot captured and uploaded"),
            Err(err) => error!(event = "snapshot.failed", error = %err, "snapshot failed"),
        }
        SnapshotStatus::from_outcome(result.is_ok())
    }

    async fn capture_and_upload(&self) -> anyhow::Result<String> {
        let jpeg = self
            .camera
            .capture_still()
            .await
            .context("high-resolution capture failed")?;
        if jpeg.is_empty() {
            anyhow::bail!("captured frame was empty");
        }

        let now = SystemTime::now();
        let filename = format!("snapshot_{}.jpg", file_stamp(now));
        let storage_path = format!("{SNAPSHOTS_STORAGE_PATH}/{filename}");
        let size_bytes = jpeg.len();

        let image_url = match self
            .blobs
            .upload(&storage_path, jpeg.clone(), "image/jpeg")
            .await
        {
            Ok(url) => url,
            Err(err) => {
                self.spool(&filename, jpeg).await;
                return Err(err).context("snapshot upload failed");
            }
        };

        let metadata = document([
            ("imageUrl", json!(image_url)),
            ("resolution", json!(self.resolution.to_string())),
            ("sizeBytes", json!(size_bytes)),
            ("storagePath", json!(storage_path)),
            ("timestamp", json!(rfc3339(now))),
            ("isIdentified", json!(false)),
            ("catalogBirdId", json!("")),
            ("speciesName", json!("")),
        ]);
        let doc_path = child_path(SNAPSHOTS_COLLECTION, &uuid::Uuid::new_v4().to_string());
        self.store
            .set(&doc_path, metadata, WriteMode::Replace)
            .await
            .context("failed to record snapshot metadata")?;
        Ok(image_url)
    }

    async fn spool(&self, filename: &str, jpeg: Bytes) {
        let path = self.spool_dir.join(filename);
        let result = tokio::task::spawn_blocking({
            let path = path.clone();
            move || atomic_write(&path, &jpeg)
        })
        .await;
        match result {
            Ok(Ok(())) => warn!(path = %path.display(), "snapshot kept locally after failed upload"),
            Ok(Err(err)) => error!(path = %path.display(), error = %err, "failed to spool snapshot"),
            Err(err) => error!(error = %err, "spool task panicked"),
        }
    }
}
