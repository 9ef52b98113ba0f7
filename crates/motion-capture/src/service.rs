use crate::instance::InstanceController;
use crate::requests::{handle_batch_upload, TestCapture};
use crate::sensor::{MotionEvent, MotionSensor};
use crate::uploader::Uploader;
use anyhow::Context;
use feeder_protocol::documents::{
    flag, BATCH_UPLOAD_REQUEST_PATH, REQUESTED_FIELD, TEST_CAPTURE_STATUS_PATH,
};
use feeder_protocol::DocumentChange;
use feeder_store::RemoteStateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const REQUEST_QUEUE_CAPACITY: usize = 16;

pub(crate) struct MotionService {
    pub(crate) store: Arc<dyn RemoteStateStore>,
    pub(crate) instances: InstanceController,
    pub(crate) uploader: Uploader,
    pub(crate) test_capture: TestCapture,
    pub(crate) retry_interval: Duration,
}

impl MotionService {
    /// Instances, uploads and requests run one at a time, so the camera is
    /// never used by two of them at once.
    pub(crate) async fn run(
        self,
        mut sensor: Box<dyn MotionSensor>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let (tx, mut requests) = mpsc::channel::<DocumentChange>(REQUEST_QUEUE_CAPACITY);
        let _subscriptions = [
            self.store
                .subscribe(BATCH_UPLOAD_REQUEST_PATH, tx.clone())
                .await
                .context("failed to watch batch upload requests")?,
            self.store
                .subscribe(TEST_CAPTURE_STATUS_PATH, tx)
                .await
                .context("failed to watch test capture requests")?,
        ];

        let mut retry = tokio::time::interval(self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(event = "motion_capture.ready", "waiting for motion");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = sensor.next_event() => match event {
                    Ok(Some(MotionEvent::Started)) => {
                        if self.instances.run_instance(sensor.as_mut(), &shutdown).await.is_some() {
                            self.uploader.upload_pending().await;
                        }
                    }
                    Ok(Some(MotionEvent::Ended)) => {}
                    Ok(None) => {
                        warn!("motion sensor closed");
                        break;
                    }
                    Err(err) => warn!(error = %err, "motion sensor error"),
                },
                change = requests.recv() => {
                    let Some(change) = change else { break };
                    if !flag(change.document.as_ref(), REQUESTED_FIELD) {
                        continue;
                    }
                    match change.path.as_str() {
                        BATCH_UPLOAD_REQUEST_PATH => {
                            handle_batch_upload(self.store.as_ref(), &self.uploader).await;
                        }
                        TEST_CAPTURE_STATUS_PATH => self.test_capture.handle().await,
                        other => warn!(path = %other, "unexpected request path"),
                    }
                }
                _ = retry.tick() => {
                    self.uploader.upload_pending().await;
                }
            }
        }
        info!(event = "motion_capture.stopped", "motion capture stopped");
        Ok(())
    }
}
