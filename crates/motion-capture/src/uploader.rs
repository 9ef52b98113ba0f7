use crate::queue::{InstanceRecord, UploadQueue};
use anyhow::Context;
use bytes::Bytes;
use feeder_protocol::documents::{
    child_path, document, MOTION_CAPTURES_COLLECTION, SIGHTINGS_STORAGE_PATH,
};
use feeder_store::{BlobStore, RemoteStateStore, WriteMode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::SystemTime;
use system_utils::time::rfc3339;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct UploadSummary {
    pub(crate) uploaded: usize,
    pub(crate) failed: usize,
}

pub(crate) struct Uploader {
    queue: UploadQueue,
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn RemoteStateStore>,
}

impl Uploader {
    pub(crate) fn new(
        queue: UploadQueue,
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn RemoteStateStore>,
    ) -> Self {
        Self {
            queue,
            blobs,
            store,
        }
    }

    pub(crate) async fn upload_pending(&self) -> UploadSummary {
        let pending = match self.queue.pending().await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "failed to scan upload queue");
                return UploadSummary::default();
            }
        };
        let mut summary = UploadSummary::default();
        for record in pending {
            match self.upload_instance(&record).await {
                Ok(()) => {
                    self.queue.remove_instance(&record).await;
                    summary.uploaded += 1;
                    info!(event = "upload.instance_done", instance_id = %record.instance_id, "instance uploaded");
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        event = "upload.instance_failed",
                        instance_id = %record.instance_id,
                        error = %err,
                        "instance upload failed, keeping it queued"
                    );
                }
            }
        }
        if summary.uploaded + summary.failed > 0 {
            info!(uploaded = summary.uploaded, failed = summary.failed, "upload pass finished");
        }
        summary
    }

    /// All files must upload before the remote record is written. Blobs that
    /// did upload stay in place on failure and are overwritten on retry.
    async fn upload_instance(&self, record: &InstanceRecord) -> anyhow::Result<()> {
        let mut images = Vec::with_capacity(record.files.len());
        for name in &record.files {
            let path = self.queue.file_path(name);
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "queued file vanished, leaving it out");
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to read {}", path.display()))
                }
            };
            let storage_path = format!("{SIGHTINGS_STORAGE_PATH}/{}/{name}", record.instance_id);
            let size_bytes = data.len();
            let url = self
                .blobs
                .upload(&storage_path, Bytes::from(data), "image/jpeg")
                .await
                .with_context(|| format!("failed to upload {name}"))?;
            images.push(json!({
                "imageUrl": url,
                "storagePath": storage_path,
                "sizeBytes": size_bytes,
            }));
        }
        if images.is_empty() {
            anyhow::bail!("no files left to upload");
        }

        let metadata = document([
            ("instanceId", json!(record.instance_id)),
            ("startedAt", json!(record.started_at)),
            ("endedAt", json!(record.ended_at)),
            ("activeDurationSecs", json!(record.active_duration_secs)),
            ("captureMode", json!(record.capture_mode)),
            ("resolution", json!(record.resolution)),
            ("imageCount", json!(images.len())),
            ("images", Value::Array(images)),
            ("uploadedAt", json!(rfc3339(SystemTime::now()))),
        ]);
        self.store
            .set(
                &child_path(MOTION_CAPTURES_COLLECTION, &record.instance_id),
                metadata,
                WriteMode::Replace,
            )
            .await
            .context("failed to record instance")
    }
}
