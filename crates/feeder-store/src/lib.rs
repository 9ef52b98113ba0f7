mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use feeder_protocol::{Document, DocumentChange};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Replace,
    Merge,
}

#[async_trait]
pub trait RemoteStateStore: Send + Sync {
    async fn get(&self, path: &str) -> anyhow::Result<Option<Document>>;

    async fn set(&self, path: &str, document: Document, mode: WriteMode) -> anyhow::Result<()>;

    /// Delivers the current state of `path` into `sink`, then every change,
    /// until the returned [`Subscription`] is dropped. Several subscriptions
    /// may share one sink.
    async fn subscribe(
        &self,
        path: &str,
        sink: mpsc::Sender<DocumentChange>,
    ) -> anyhow::Result<Subscription>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, data: Bytes, content_type: &str) -> anyhow::Result<String>;
}

#[derive(Debug)]
pub struct Subscription {
    path: String,
    token: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(path: &str, token: CancellationToken) -> Self {
        Self {
            path: path.to_string(),
            token,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn cancel(self) {
        self.token.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub(crate) fn validate_path(path: &str) -> anyhow::Result<()> {
    if path.trim().is_empty() {
        anyhow::bail!("store path cannot be empty");
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        anyhow::bail!("invalid store path {path:?}");
    }
    Ok(())
}
