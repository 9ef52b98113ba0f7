use crate::frame_buffer::FrameBuffer;
use crate::session::ClientSession;
use crate::snapshot::SnapshotService;
use anyhow::Context;
use bytes::Bytes;
use feeder_camera::{apply_controls, CameraConfig, CameraDevice, FrameSink};
use feeder_protocol::LocalSettings;
use feeder_store::{BlobStore, RemoteStateStore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub(crate) struct StreamingServer {
    camera: Arc<dyn CameraDevice>,
    settings: LocalSettings,
    frames: Arc<FrameBuffer>,
    snapshots: Arc<SnapshotService>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
    stream_failed: Arc<AtomicBool>,
}

impl StreamingServer {
    pub(crate) fn new(
        camera: Arc<dyn CameraDevice>,
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn RemoteStateStore>,
        settings: LocalSettings,
        spool_dir: PathBuf,
    ) -> Self {
        let snapshots = Arc::new(SnapshotService::new(
            Arc::clone(&camera),
            blobs,
            store,
            settings.snapshot_resolution,
            spool_dir,
        ));
        Self {
            camera,
            settings,
            frames: Arc::new(FrameBuffer::new()),
            snapshots,
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            stream_failed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn stream_failed(&self) -> bool {
        self.stream_failed.load(Ordering::SeqCst)
    }

    pub(crate) async fn start_camera(&self) -> anyhow::Result<()> {
        self.camera
            .configure(CameraConfig::dual_stream(&self.settings))
            .await
            .context("failed to configure camera")?;
        apply_controls(self.camera.as_ref(), &self.settings.effective_controls()).await;
        self.camera.start().await.context("failed to start camera")?;

        let frames = Arc::clone(&self.frames);
        let sink: FrameSink = Arc::new(move |frame: Bytes| frames.set(frame));
        self.camera
            .start_encoded_stream(sink)
            .await
            .context("failed to start encoder")?;
        self.watch_stream();
        info!(
            event = "camera.started",
            stream = %self.settings.stream_resolution,
            snapshot = %self.settings.snapshot_resolution,
            framerate = self.settings.stream_framerate,
            "camera streaming"
        );
        Ok(())
    }

    fn watch_stream(&self) {
        let camera = Arc::clone(&self.camera);
        let shutdown = self.shutdown.clone();
        let failed = Arc::clone(&self.stream_failed);
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = camera.stream_lost() => {
                    error!(event = "server.stream_lost", "camera stream lost, shutting down");
                    failed.store(true, Ordering::SeqCst);
                    shutdown.cancel();
                }
            }
        });
    }

    pub(crate) async fn listen(&self, listener: TcpListener) -> anyhow::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(event = "server.listening", addr = %addr, "camera server listening");
        }
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accept = listener.accept() => {
                    let (stream, peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    info!(event = "session.open", peer = %peer, "client connected");
                    let session = ClientSession::new(
                        stream,
                        peer,
                        self.frames.watch(),
                        self.frames.get(),
                        Arc::clone(&self.snapshots),
                    );
                    tokio::spawn(session.run(self.shutdown.child_token()));
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        if let Err(err) = self.camera.stop().await {
            warn!(error = %err, "failed to stop camera");
        }
        info!(event = "server.stopped", "camera server stopped");
    }
}
