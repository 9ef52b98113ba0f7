use crate::{validate_path, BlobStore, RemoteStateStore, Subscription, WriteMode};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use feeder_protocol::{Document, DocumentChange};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use system_utils::fs::atomic_write;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    poll_interval: Duration,
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, path: &str) -> PathBuf {
        self.root.join("documents").join(format!("{path}.json"))
    }

    fn blob_path(&self, path: &str) -> PathBuf {
        self.root.join("blobs").join(path)
    }
}

async fn read_document(file: &Path) -> anyhow::Result<Option<Document>> {
    let raw = match tokio::fs::read(file).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", file.display()));
        }
    };
    let document = serde_json::from_slice::<Document>(&raw)
        .with_context(|| format!("invalid document in {}", file.display()))?;
    Ok(Some(document))
}

async fn write_atomically(file: PathBuf, contents: Vec<u8>) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || atomic_write(&file, &contents))
        .await
        .context("write task panicked")?
}

#[async_trait]
impl RemoteStateStore for FileStore {
    async fn get(&self, path: &str) -> anyhow::Result<Option<Document>> {
        validate_path(path)?;
        read_document(&self.document_path(path)).await
    }

    async fn set(&self, path: &str, document: Document, mode: WriteMode) -> anyhow::Result<()> {
        validate_path(path)?;
        let file = self.document_path(path);
        let _guard = self.write_lock.lock().await;
        let stored = match mode {
            WriteMode::Replace => document,
            WriteMode::Merge => {
                let mut existing = read_document(&file).await?.unwrap_or_default();
                existing.extend(document);
                existing
            }
        };
        let contents = serde_json::to_vec_pretty(&stored)?;
        write_atomically(file, contents).await
    }

    async fn subscribe(
        &self,
        path: &str,
        sink: mpsc::Sender<DocumentChange>,
    ) -> anyhow::Result<Subscription> {
        validate_path(path)?;
        let file = self.document_path(path);
        let initial = read_document(&file).await?;
        sink.send(DocumentChange {
            path: path.to_string(),
            document: initial.clone(),
        })
        .await
        .map_err(|_| anyhow::anyhow!("subscriber for {path} closed before first delivery"))?;

        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_path = path.to_string();
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut last = initial;
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = sink.closed() => break,
                    _ = ticker.tick() => {}
                }
                let current = match read_document(&file).await {
                    Ok(current) => current,
                    Err(err) => {
                        warn!(path = %task_path, error = %err, "skipping unreadable document");
                        continue;
                    }
                };
                if current == last {
                    continue;
                }
                last = current.clone();
                let change = DocumentChange {
                    path: task_path.clone(),
                    document: current,
                };
                if sink.send(change).await.is_err() {
                    break;
                }
            }
            debug!(path = %task_path, "file subscription ended");
        });
        Ok(Subscription::new(path, token))
    }
}

#[async_trait]
impl BlobStore for FileStore {
    async fn upload(&self, path: &str, data: Bytes, content_type: &str) -> anyhow::Result<String> {
        validate_path(path)?;
        let file = self.blob_path(path);
        write_atomically(file.clone(), data.to_vec()).await?;
        debug!(path, content_type, size = data.len(), "stored blob");
        let absolute = std::fs::canonicalize(&file).unwrap_or(file);
        Ok(format!("file://{}", absolute.display()))
    }
}
