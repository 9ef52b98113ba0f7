use crate::{validate_path, BlobStore, RemoteStateStore, Subscription, WriteMode};
use async_trait::async_trait;
use bytes::Bytes;
use feeder_protocol::{Document, DocumentChange};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, Document>,
    subscribers: Vec<Subscriber>,
    blobs: BTreeMap<String, Bytes>,
    failing_prefixes: Vec<String>,
    upload_attempts: usize,
}

struct Subscriber {
    path: String,
    sink: mpsc::Sender<DocumentChange>,
    token: CancellationToken,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, path: &str) -> Option<Document> {
        let state = self.state.lock().expect("memory store lock");
        state.documents.get(path).cloned()
    }

    pub fn document_paths(&self, prefix: &str) -> Vec<String> {
        let state = self.state.lock().expect("memory store lock");
        let mut paths: Vec<String> = state
            .documents
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    pub fn blob(&self, path: &str) -> Option<Bytes> {
        let state = self.state.lock().expect("memory store lock");
        state.blobs.get(path).cloned()
    }

    pub fn blob_paths(&self) -> Vec<String> {
        let state = self.state.lock().expect("memory store lock");
        state.blobs.keys().cloned().collect()
    }

    pub fn upload_attempts(&self) -> usize {
        let state = self.state.lock().expect("memory store lock");
        state.upload_attempts
    }

    pub fn fail_uploads_under(&self, prefix: &str) {
        let mut state = self.state.lock().expect("memory store lock");
        state.failing_prefixes.push(prefix.to_string());
    }

    pub fn clear_upload_failures(&self) {
        let mut state = self.state.lock().expect("memory store lock");
        state.failing_prefixes.clear();
    }

    pub fn subscriber_count(&self, path: &str) -> usize {
        let mut state = self.state.lock().expect("memory store lock");
        state.prune();
        state
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.path == path)
            .count()
    }
}

impl MemoryState {
    fn prune(&mut self) {
        self.subscribers
            .retain(|subscriber| !subscriber.token.is_cancelled() && !subscriber.sink.is_closed());
    }

    fn sinks_for(&mut self, path: &str) -> Vec<mpsc::Sender<DocumentChange>> {
        self.prune();
        self.subscribers
            .iter()
            .filter(|subscriber| subscriber.path == path)
            .map(|subscriber| subscriber.sink.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteStateStore for MemoryStore {
    async fn get(&self, path: &str) -> anyhow::Result<Option<Document>> {
        validate_path(path)?;
        Ok(self.document(path))
    }

    async fn set(&self, path: &str, document: Document, mode: WriteMode) -> anyhow::Result<()> {
        validate_path(path)?;
        let (change, sinks) = {
            let mut state = self.state.lock().expect("memory store lock");
            let stored = state.documents.entry(path.to_string()).or_default();
            match mode {
                WriteMode::Replace => *stored = document,
                WriteMode::Merge => stored.extend(document),
            }
            let change = DocumentChange {
                path: path.to_string(),
                document: Some(stored.clone()),
            };
            (change, state.sinks_for(path))
        };
        for sink in sinks {
            let _ = sink.send(change.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        path: &str,
        sink: mpsc::Sender<DocumentChange>,
    ) -> anyhow::Result<Subscription> {
        validate_path(path)?;
        let token = CancellationToken::new();
        let initial = {
            let mut state = self.state.lock().expect("memory store lock");
            state.subscribers.push(Subscriber {
                path: path.to_string(),
                sink: sink.clone(),
                token: token.clone(),
            });
            DocumentChange {
                path: path.to_string(),
                document: state.documents.get(path).cloned(),
            }
        };
        sink.send(initial)
            .await
            .map_err(|_| anyhow::anyhow!("subscriber for {path} closed before first delivery"))?;
        Ok(Subscription::new(path, token))
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn upload(&self, path: &str, data: Bytes, _content_type: &str) -> anyhow::Result<String> {
        validate_path(path)?;
        let mut state = self.state.lock().expect("memory store lock");
        state.upload_attempts += 1;
        if state
            .failing_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            anyhow::bail!("upload of {path} rejected");
        }
        state.blobs.insert(path.to_string(), data);
        Ok(format!("memory://{path}"))
    }
}
