use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use system_utils::fs::atomic_write;
use tracing::warn;

const METADATA_EXTENSION: &str = "json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct InstanceRecord {
    pub(crate) instance_id: String,
    pub(crate) started_at: String,
    pub(crate) ended_at: String,
    pub(crate) active_duration_secs: f64,
    pub(crate) capture_mode: String,
    pub(crate) resolution: String,
    pub(crate) files: Vec<String>,
}

#[derive(Clone, Debug)]
pub(crate) struct UploadQueue {
    dir: PathBuf,
}

impl UploadQueue {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub(crate) async fn write_file(&self, name: &str, data: &[u8]) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.file_path(name);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub(crate) async fn write_record(&self, record: &InstanceRecord) -> anyhow::Result<()> {
        let path = self.record_path(&record.instance_id);
        let rendered = serde_json::to_vec_pretty(record).context("failed to encode instance")?;
        tokio::task::spawn_blocking(move || atomic_write(&path, &rendered))
            .await
            .context("metadata writer panicked")?
    }

    /// Completed instances, oldest first. Unreadable metadata is skipped.
    pub(crate) async fn pending(&self) -> anyhow::Result<Vec<InstanceRecord>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to list {}", self.dir.display()))
            }
        };
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(METADATA_EXTENSION) {
                continue;
            }
            let parsed = tokio::fs::read(&path)
                .await
                .map_err(anyhow::Error::from)
                .and_then(|raw| serde_json::from_slice::<InstanceRecord>(&raw).map_err(Into::into));
            match parsed {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable instance metadata"),
            }
        }
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }

    pub(crate) async fn discard_files(&self, names: &[String]) {
        for name in names {
            let path = self.file_path(name);
            if let Err(err) = tokio::fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to delete queued file");
                }
            }
        }
    }

    pub(crate) async fn remove_instance(&self, record: &InstanceRecord) {
        self.discard_files(&record.files).await;
        let path = self.record_path(&record.instance_id);
        if let Err(err) = tokio::fs::remove_file(&path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to delete instance metadata");
            }
        }
    }

    fn record_path(&self, instance_id: &str) -> PathBuf {
        self.dir.join(format!("{instance_id}.{METADATA_EXTENSION}"))
    }
}

#[cfg(test)]
pub(crate) fn temp_queue() -> UploadQueue {
    UploadQueue::new(std::env::temp_dir().join(format!("upload-queue-{}", uuid::Uuid::new_v4())))
}

#[cfg(test)]
pub(crate) fn record(instance_id: &str, started_at: &str, files: &[&str]) -> InstanceRecord {
    InstanceRecord {
        instance_id: instance_id.to_string(),
        started_at: started_at.to_string(),
        ended_at: started_at.to_string(),
        active_duration_secs: 8.0,
        capture_mode: "single".to_string(),
        resolution: "4608x2592".to_string(),
        files: files.iter().map(|name| name.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_lists_completed_instances_oldest_first() {
        let queue = temp_queue();
        assert!(queue.pending().await.expect("empty").is_empty());

        queue.write_file("b_000.jpg", b"b").await.expect("file");
        queue.write_file("orphan.jpg", b"o").await.expect("file");
        queue
            .write_record(&record("b", "2024-05-02T10:00:00Z", &["b_000.jpg"]))
            .await
            .expect("record");
        queue
            .write_record(&record("a", "2024-05-01T10:00:00Z", &[]))
            .await
            .expect("record");
        std::fs::write(queue.dir().join("broken.json"), b"{").expect("broken");

        let ids: Vec<String> = queue
            .pending()
            .await
            .expect("pending")
            .into_iter()
            .map(|record| record.instance_id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        let _ = std::fs::remove_dir_all(queue.dir());
    }

    #[tokio::test]
    async fn remove_instance_deletes_files_and_metadata() {
        let queue = temp_queue();
        queue.write_file("x_000.jpg", b"x").await.expect("file");
        let instance = record("x", "2024-05-01T10:00:00Z", &["x_000.jpg", "x_001.jpg"]);
        queue.write_record(&instance).await.expect("record");

        queue.remove_instance(&instance).await;
        assert!(queue.pending().await.expect("pending").is_empty());
        assert!(!queue.file_path("x_000.jpg").exists());
        let _ = std::fs::remove_dir_all(queue.dir());
    }
}
