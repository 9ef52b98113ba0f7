use crate::uploader::Uploader;
use anyhow::Context;
use bytes::Bytes;
use feeder_camera::{apply_controls, load_local_settings, CameraConfig, CameraDevice};
use feeder_protocol::documents::{
    child_path, document, BATCH_UPLOAD_REQUEST_PATH, REQUESTED_FIELD, TEST_CAPTURES_COLLECTION,
    TEST_CAPTURES_STORAGE_PATH, TEST_CAPTURE_STATUS_PATH,
};
use feeder_protocol::LocalSettings;
use feeder_store::{BlobStore, RemoteStateStore, WriteMode};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use system_utils::time::{file_stamp, rfc3339};
use tracing::{error, info, warn};

pub(crate) async fn handle_batch_upload(store: &dyn RemoteStateStore, uploader: &Uploader) {
    info!(event = "batch_upload.requested", "batch upload requested");
    let summary = uploader.upload_pending().await;
    let result = document([
        (REQUESTED_FIELD, json!(false)),
        ("uploaded", json!(summary.uploaded)),
        ("failed", json!(summary.failed)),
        ("completed_at", json!(rfc3339(SystemTime::now()))),
    ]);
    if let Err(err) = store
        .set(BATCH_UPLOAD_REQUEST_PATH, result, WriteMode::Merge)
        .await
    {
        warn!(error = %err, "failed to report batch upload result");
    }
}

pub(crate) struct TestCapture {
    camera: Arc<dyn CameraDevice>,
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn RemoteStateStore>,
    settings_path: PathBuf,
    warmup: Duration,
}

impl TestCapture {
    pub(crate) fn new(
        camera: Arc<dyn CameraDevice>,
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn RemoteStateStore>,
        settings_path: PathBuf,
        warmup: Duration,
    ) -> Self {
        Self {
            camera,
            blobs,
            store,
            settings_path,
            warmup,
        }
    }

    pub(crate) async fn handle(&self) {
        info!(event = "test_capture.requested", "test capture requested");
        let status = match self.capture_and_upload().await {
            Ok((image_url, resolution, timestamp)) => {
                info!(event = "test_capture.done", url = %image_url, "test capture uploaded");
                document([
                    (REQUESTED_FIELD, json!(false)),
                    ("imageUrl", json!(image_url)),
                    ("resolution", json!(resolution)),
                    ("timestamp", json!(timestamp)),
                ])
            }
            Err(err) => {
                error!(event = "test_capture.failed", error = %err, "test capture failed");
                document([
                    (REQUESTED_FIELD, json!(false)),
                    ("error", json!(format!("{err:#}"))),
                    ("timestamp", json!(rfc3339(SystemTime::now()))),
                ])
            }
        };
        if let Err(err) = self
            .store
            .set(TEST_CAPTURE_STATUS_PATH, status, WriteMode::Replace)
            .await
        {
            warn!(error = %err, "failed to write test capture status");
        }
    }

    async fn capture_and_upload(&self) -> anyhow::Result<(String, String, String)> {
        let settings = load_local_settings(&self.settings_path);
        let resolution = settings.capture_resolution;
        let jpeg = {
            let captured = self.capture(&settings).await;
            if let Err(err) = self.camera.stop().await {
                warn!(error = %err, "failed to power down camera");
            }
            captured?
        };

        let now = SystemTime::now();
        let timestamp = rfc3339(now);
        let storage_path = format!("{TEST_CAPTURES_STORAGE_PATH}/test_{}.jpg", file_stamp(now));
        let size_bytes = jpeg.len();
        let image_url = self
            .blobs
            .upload(&storage_path, jpeg, "image/jpeg")
            .await
            .context("test capture upload failed")?;
        let history = document([
            ("imageUrl", json!(image_url)),
            ("resolution", json!(resolution.to_string())),
            ("sizeBytes", json!(size_bytes)),
            ("storagePath", json!(storage_path)),
            ("timestamp", json!(timestamp)),
        ]);
        self.store
            .set(
                &child_path(TEST_CAPTURES_COLLECTION, &uuid::Uuid::new_v4().to_string()),
                history,
                WriteMode::Replace,
            )
            .await
            .context("failed to record test capture")?;
        Ok((image_url, resolution.to_string(), timestamp))
    }

    async fn capture(&self, settings: &LocalSettings) -> anyhow::Result<Bytes> {
        self.camera
            .configure(CameraConfig::still(settings.capture_resolution))
            .await
            .context("failed to configure camera")?;
        apply_controls(self.camera.as_ref(), &settings.effective_controls()).await;
        self.camera.start().await.context("failed to start camera")?;
        tokio::time::sleep(self.warmup).await;
        self.camera
            .capture_still()
            .await
            .context("test capture failed")
    }
}
