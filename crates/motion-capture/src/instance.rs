use crate::queue::{InstanceRecord, UploadQueue};
use crate::sensor::{MotionEvent, MotionSensor};
use feeder_camera::{apply_controls, load_local_settings, CameraConfig, CameraDevice};
use feeder_protocol::{CaptureMode, LocalSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use system_utils::time::{file_stamp, rfc3339};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub(crate) struct InstanceController {
    camera: Arc<dyn CameraDevice>,
    queue: UploadQueue,
    settings_path: PathBuf,
    warmup: Duration,
}

impl InstanceController {
    pub(crate) fn new(
        camera: Arc<dyn CameraDevice>,
        queue: UploadQueue,
        settings_path: PathBuf,
        warmup: Duration,
    ) -> Self {
        Self {
            camera,
            queue,
            settings_path,
            warmup,
        }
    }

    pub(crate) async fn run_instance(
        &self,
        sensor: &mut dyn MotionSensor,
        shutdown: &CancellationToken,
    ) -> Option<InstanceRecord> {
        let started = Instant::now();
        let started_at = SystemTime::now();
        let instance_id = uuid::Uuid::new_v4().to_string();
        // Re-read every time so config-sync changes apply to the next sighting.
        let settings = load_local_settings(&self.settings_path);
        info!(
            event = "instance.start",
            instance_id = %instance_id,
            mode = settings.capture_mode.as_str(),
            "motion started"
        );

        let (files, active) = {
            let stop = CancellationToken::new();
            let capture = self.capture_files(&instance_id, &settings, stop.clone());
            tokio::pin!(capture);
            let mut captured: Option<Vec<String>> = None;
            loop {
                tokio::select! {
                    files = &mut capture, if captured.is_none() => captured = Some(files),
                    event = sensor.next_event() => match event {
                        Ok(Some(MotionEvent::Started)) => continue,
                        Ok(Some(MotionEvent::Ended)) | Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "motion sensor failed during instance");
                            break;
                        }
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
            let active = started.elapsed();
            stop.cancel();
            let files = match captured {
                Some(files) => files,
                None => capture.await,
            };
            (files, active)
        };
        if let Err(err) = self.camera.stop().await {
            warn!(error = %err, "failed to power down camera");
        }

        let min_active = settings.min_active_duration();
        if active < min_active {
            info!(
                event = "instance.discarded",
                instance_id = %instance_id,
                active_secs = active.as_secs_f64(),
                "motion too short, discarding captures"
            );
            self.queue.discard_files(&files).await;
            return None;
        }
        if files.is_empty() {
            warn!(instance_id = %instance_id, "instance ended without any capture");
            return None;
        }

        let record = InstanceRecord {
            instance_id,
            started_at: rfc3339(started_at),
            ended_at: rfc3339(started_at + active),
            active_duration_secs: active.as_secs_f64(),
            capture_mode: settings.capture_mode.as_str().to_string(),
            resolution: settings.capture_resolution.to_string(),
            files,
        };
        match self.queue.write_record(&record).await {
            Ok(()) => {
                info!(
                    event = "instance.queued",
                    instance_id = %record.instance_id,
                    files = record.files.len(),
                    "instance queued for upload"
                );
                Some(record)
            }
            Err(err) => {
                error!(instance_id = %record.instance_id, error = %err, "failed to write instance metadata");
                None
            }
        }
    }

    async fn capture_files(
        &self,
        instance_id: &str,
        settings: &LocalSettings,
        stop: CancellationToken,
    ) -> Vec<String> {
        let mut files = Vec::new();
        if let Err(err) = self.power_up(settings).await {
            error!(error = %err, "failed to power up camera");
            return files;
        }
        tokio::select! {
            _ = stop.cancelled() => return files,
            _ = tokio::time::sleep(self.warmup) => {}
        }

        let budget = match settings.capture_mode {
            CaptureMode::Single => 1,
            CaptureMode::Burst => settings.max_files_per_instance.max(1) as usize,
        };
        let interval = settings.burst_interval();
        while files.len() < budget {
            match self.camera.capture_still().await {
                Ok(jpeg) => {
                    let name = format!(
                        "{instance_id}_{:03}_{}.jpg",
                        files.len(),
                        file_stamp(SystemTime::now())
                    );
                    match self.queue.write_file(&name, &jpeg).await {
                        Ok(()) => files.push(name),
                        Err(err) => error!(error = %err, "failed to save capture"),
                    }
                }
                Err(err) => warn!(error = %err, "capture failed"),
            }
            if files.len() >= budget {
                break;
            }
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        files
    }

    async fn power_up(&self, settings: &LocalSettings) -> anyhow::Result<()> {
        self.camera
            .configure(CameraConfig::still(settings.capture_resolution))
            .await?;
        apply_controls(self.camera.as_ref(), &settings.effective_controls()).await;
        self.camera.start().await
    }
}
