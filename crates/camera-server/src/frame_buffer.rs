use bytes::Bytes;
use std::time::Duration;
use tokio::sync::watch;

/// Newest encoded frame. `set` never waits on readers.
pub(crate) struct FrameBuffer {
    tx: watch::Sender<Option<Bytes>>,
}

impl FrameBuffer {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub(crate) fn set(&self, frame: Bytes) {
        self.tx.send_replace(Some(frame));
    }

    pub(crate) fn get(&self) -> Option<Bytes> {
        self.tx.borrow().clone()
    }

    pub(crate) fn watch(&self) -> FrameWatcher {
        FrameWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

pub(crate) struct FrameWatcher {
    rx: watch::Receiver<Option<Bytes>>,
}

impl FrameWatcher {
    pub(crate) async fn wait_for_update(&mut self, timeout: Duration) -> bool {
        matches!(tokio::time::timeout(timeout, self.rx.changed()).await, Ok(Ok(())))
    }

    pub(crate) fn take_latest(&mut self) -> Option<Bytes> {
        self.rx.borrow_and_update().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_frame_wins() {
        let buffer = FrameBuffer::new();
        let mut watcher = buffer.watch();
        assert_eq!(buffer.get(), None);

        for frame in ["w1", "w2", "w3"] {
            buffer.set(Bytes::from_static(frame.as_bytes()));
        }
        assert!(watcher.wait_for_update(Duration::from_millis(100)).await);
        assert_eq!(watcher.take_latest(), Some(Bytes::from_static(b"w3")));
        assert_eq!(buffer.get(), Some(Bytes::from_static(b"w3")));
        assert!(!watcher.wait_for_update(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn every_watcher_sees_the_update() {
        let buffer = FrameBuffer::new();
        let mut first = buffer.watch();
        let mut second = buffer.watch();
        buffer.set(Bytes::from_static(b"frame"));
        assert!(first.wait_for_update(Duration::from_millis(100)).await);
        assert!(second.wait_for_update(Duration::from_millis(100)).await);
        assert_eq!(first.take_latest(), second.take_latest());
    }

    #[test]
    fn set_without_watchers_does_not_block_or_fail() {
        let buffer = FrameBuffer::new();
        buffer.set(Bytes::from_static(b"orphan"));
        assert_eq!(buffer.get(), Some(Bytes::from_static(b"orphan")));
    }
}
