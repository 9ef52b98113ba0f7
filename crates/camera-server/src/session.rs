use crate::frame_buffer::FrameWatcher;
use crate::snapshot::SnapshotService;
use bytes::Bytes;
use feeder_protocol::{frame_codec, ClientCommand, CommandBuffer, COMMAND_LEN};
use futures_util::SinkExt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FRAME_WAIT: Duration = Duration::from_millis(250);
const SENDER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);
const REPLY_QUEUE_CAPACITY: usize = 8;

/// Holds at most one outgoing frame; a newer frame replaces an unsent one.
#[derive(Default)]
pub(crate) struct Mailbox {
    slot: Mutex<Option<Bytes>>,
    notify: Notify,
}

impl Mailbox {
    pub(crate) fn put(&self, frame: Bytes) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(frame);
        }
        self.notify.notify_one();
    }

    pub(crate) fn take(&self) -> Option<Bytes> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

pub(crate) struct ClientSession {
    stream: TcpStream,
    peer: SocketAddr,
    frames: FrameWatcher,
    /// Queued first, so a new viewer does not wait for the next encode.
    initial_frame: Option<Bytes>,
    snapshots: Arc<SnapshotService>,
}

impl ClientSession {
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        frames: FrameWatcher,
        initial_frame: Option<Bytes>,
        snapshots: Arc<SnapshotService>,
    ) -> Self {
        Self {
            stream,
            peer,
            frames,
            initial_frame,
            snapshots,
        }
    }

    pub(crate) async fn run(self, shutdown: CancellationToken) {
        let Self {
            stream,
            peer,
            frames,
            initial_frame,
            snapshots,
        } = self;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %err, "failed to set TCP_NODELAY");
        }
        let stop = shutdown.child_token();
        let (read_half, write_half) = stream.into_split();
        let mailbox = Arc::new(Mailbox::default());
        if let Some(frame) = initial_frame {
            mailbox.put(frame);
        }
        let (reply_tx, reply_rx) = mpsc::channel(REPLY_QUEUE_CAPACITY);

        let mut sender = tokio::spawn(send_loop(
            write_half,
            Arc::clone(&mailbox),
            reply_rx,
            stop.clone(),
            peer,
        ));
        read_loop(read_half, frames, &mailbox, reply_tx, snapshots, &stop, peer).await;

        stop.cancel();
        if tokio::time::timeout(SENDER_JOIN_TIMEOUT, &mut sender)
            .await
            .is_err()
        {
            warn!(peer = %peer, "sender did not stop in time, aborting it");
            sender.abort();
        }
        info!(event = "session.closed", peer = %peer, "client disconnected");
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    mut frames: FrameWatcher,
    mailbox: &Mailbox,
    replies: mpsc::Sender<Bytes>,
    snapshots: Arc<SnapshotService>,
    stop: &CancellationToken,
    peer: SocketAddr,
) {
    let mut commands = CommandBuffer::default();
    let mut buf = [0u8; COMMAND_LEN];
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        debug!(peer = %peer, error = %err, "receive failed");
                        break;
                    }
                };
                for command in commands.push(&buf[..n]) {
                    match command {
                        ClientCommand::Snapshot => {
                            spawn_snapshot(Arc::clone(&snapshots), replies.clone(), peer);
                        }
                        ClientCommand::Invalid(raw) => {
                            warn!(peer = %peer, command = ?raw, "unknown command, discarding input");
                        }
                    }
                }
            }
            updated = frames.wait_for_update(FRAME_WAIT) => {
                if updated {
                    if let Some(frame) = frames.take_latest() {
                        mailbox.put(frame);
                    }
                }
            }
        }
    }
}

fn spawn_snapshot(snapshots: Arc<SnapshotService>, replies: mpsc::Sender<Bytes>, peer: SocketAddr) {
    tokio::spawn(async move {
        let status = snapshots.take_snapshot().await;
        let reply = Bytes::copy_from_slice(&[status.as_byte()]);
        if replies.send(reply).await.is_err() {
            warn!(peer = %peer, "client disconnected before snapshot confirmation");
        }
    });
}

async fn send_loop(
    writer: OwnedWriteHalf,
    mailbox: Arc<Mailbox>,
    mut replies: mpsc::Receiver<Bytes>,
    stop: CancellationToken,
    peer: SocketAddr,
) {
    let mut framed = FramedWrite::new(writer, frame_codec());
    let mut replies_open = true;
    loop {
        let payload = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            reply = replies.recv(), if replies_open => match reply {
                Some(reply) => reply,
                None => {
                    replies_open = false;
                    continue;
                }
            },
            _ = mailbox.wait() => match mailbox.take() {
                Some(frame) => frame,
                None => continue,
            },
        };
        if let Err(err) = framed.send(payload).await {
            debug!(peer = %peer, error = %err, "send failed");
            break;
        }
    }
    stop.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_keeps_only_the_newest_frame() {
        let mailbox = Mailbox::default();
        mailbox.put(Bytes::from_static(b"w1"));
        mailbox.put(Bytes::from_static(b"w2"));
        assert_eq!(mailbox.take(), Some(Bytes::from_static(b"w2")));
        assert_eq!(mailbox.take(), None);
    }

    #[tokio::test]
    async fn put_wakes_a_waiting_sender() {
        let mailbox = Arc::new(Mailbox::default());
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(async move {
                mailbox.wait().await;
                mailbox.take()
            })
        };
        tokio::task::yield_now().await;
        mailbox.put(Bytes::from_static(b"frame"));
        let taken = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("woken")
            .expect("join");
        assert_eq!(taken, Some(Bytes::from_static(b"frame")));
    }
}
