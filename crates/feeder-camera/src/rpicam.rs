use crate::mjpeg::{MjpegDecoder, DEFAULT_MAX_JPEG_LEN};
use crate::{CameraConfig, CameraDevice, CameraMode, FrameSink};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use system_utils::process::run_command_stdout;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const VIDEO_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct RpicamConfig {
    pub video_binary: String,
    pub still_binary: String,
    pub still_timeout: Duration,
    pub max_jpeg_len: usize,
}

impl Default for RpicamConfig {
    fn default() -> Self {
        Self {
            video_binary: "rpicam-vid".to_string(),
            still_binary: "rpicam-still".to_string(),
            still_timeout: Duration::from_secs(15),
            max_jpeg_len: DEFAULT_MAX_JPEG_LEN,
        }
    }
}

/// The sensor can only be opened by one process, so the video pipeline is
/// stopped while a still is taken and restarted afterwards.
pub struct RpicamCamera {
    config: RpicamConfig,
    inner: Mutex<RpicamState>,
    lost: CancellationToken,
}

#[derive(Default)]
struct RpicamState {
    camera: Option<CameraConfig>,
    flags: BTreeMap<&'static str, String>,
    started: bool,
    sink: Option<FrameSink>,
    video: Option<VideoPipeline>,
}

struct VideoPipeline {
    child: Child,
    reader: JoinHandle<()>,
    stopping: CancellationToken,
}

impl RpicamCamera {
    pub fn new(config: RpicamConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(RpicamState::default()),
            lost: CancellationToken::new(),
        }
    }

    fn spawn_video(
        &self,
        camera: &CameraConfig,
        flags: &BTreeMap<&'static str, String>,
        sink: FrameSink,
    ) -> anyhow::Result<VideoPipeline> {
        let mut cmd = Command::new(&self.config.video_binary);
        cmd.args(["--nopreview", "-t", "0", "--codec", "mjpeg"])
            .arg("--width")
            .arg(camera.stream_resolution.width.to_string())
            .arg("--height")
            .arg(camera.stream_resolution.height.to_string())
            .arg("--framerate")
            .arg(camera.framerate.to_string())
            .args(flag_args(flags))
            .args(["-o", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.config.video_binary))?;
        let stdout = child
            .stdout
            .take()
            .context("video pipeline stdout was not captured")?;
        let max_jpeg_len = self.config.max_jpeg_len;
        let stopping = CancellationToken::new();
        let reader = tokio::spawn({
            let stopping = stopping.clone();
            let lost = self.lost.clone();
            async move {
                let mut frames = FramedRead::new(stdout, MjpegDecoder::new(max_jpeg_len));
                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(frame) => sink(frame),
                        Err(err) => {
                            warn!(error = %err, "video pipeline read failed");
                            break;
                        }
                    }
                }
                if stopping.is_cancelled() {
                    debug!("video pipeline output closed");
                } else {
                    error!(event = "camera.video_lost", "video pipeline exited unexpectedly");
                    lost.cancel();
                }
            }
        });
        info!(
            event = "camera.video_started",
            resolution = %camera.stream_resolution,
            framerate = camera.framerate,
            "video pipeline started"
        );
        Ok(VideoPipeline {
            child,
            reader,
            stopping,
        })
    }
}

async fn stop_video(mut pipeline: VideoPipeline) {
    pipeline.stopping.cancel();
    if let Err(err) = pipeline.child.start_kill() {
        debug!(error = %err, "video pipeline already exited");
    }
    if tokio::time::timeout(VIDEO_STOP_TIMEOUT, pipeline.child.wait())
        .await
        .is_err()
    {
        warn!("video pipeline did not exit in time");
    }
    pipeline.reader.abort();
}

fn flag_args(flags: &BTreeMap<&'static str, String>) -> Vec<String> {
    flags
        .iter()
        .flat_map(|(flag, value)| [flag.to_string(), value.clone()])
        .collect()
}

fn as_f64(name: &str, value: &Value) -> anyhow::Result<f64> {
    value
        .as_f64()
        .with_context(|| format!("{name} expects a number, got {value}"))
}

fn as_u64(name: &str, value: &Value) -> anyhow::Result<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
        .with_context(|| format!("{name} expects a non-negative integer, got {value}"))
}

fn enum_name(name: &str, value: &Value, names: &[&'static str]) -> anyhow::Result<String> {
    if let Some(raw) = value.as_str() {
        let lowered = raw.trim().to_ascii_lowercase();
        if names.contains(&lowered.as_str()) {
            return Ok(lowered);
        }
    } else if let Some(index) = value.as_u64() {
        if let Some(found) = usize::try_from(index).ok().and_then(|i| names.get(i)) {
            return Ok(found.to_string());
        }
    }
    anyhow::bail!("{name} does not accept {value}")
}

const AWB_MODES: &[&str] = &[
    "auto",
    "incandescent",
    "tungsten",
    "fluorescent",
    "indoor",
    "daylight",
    "cloudy",
    "custom",
];
const AF_MODES: &[&str] = &["manual", "auto", "continuous"];
const DENOISE_MODES: &[&str] = &["off", "cdn_fast", "cdn_hq"];

pub fn control_flag(name: &str, value: &Value) -> anyhow::Result<Option<(&'static str, String)>> {
    let flag = match name {
        "Sharpness" => ("--sharpness", as_f64(name, value)?.to_string()),
        "Contrast" => ("--contrast", as_f64(name, value)?.to_string()),
        "Saturation" => ("--saturation", as_f64(name, value)?.to_string()),
        "Brightness" => {
            let brightness = as_f64(name, value)?;
            if !(-1.0..=1.0).contains(&brightness) {
                anyhow::bail!("Brightness must be within -1.0..=1.0, got {brightness}");
            }
            ("--brightness", brightness.to_string())
        }
        "AnalogueGain" => ("--gain", as_f64(name, value)?.to_string()),
        "ExposureTime" => ("--shutter", as_u64(name, value)?.to_string()),
        "AwbMode" => ("--awb", enum_name(name, value, AWB_MODES)?),
        "AfMode" => ("--autofocus-mode", enum_name(name, value, AF_MODES)?),
        "NoiseReductionMode" => ("--denoise", enum_name(name, value, DENOISE_MODES)?),
        "AeEnable" | "AwbEnable" => {
            if !value.is_boolean() {
                anyhow::bail!("{name} expects a boolean, got {value}");
            }
            return Ok(None);
        }
        _ => anyhow::bail!("unsupported control {name}"),
    };
    Ok(Some(flag))
}

#[async_trait]
impl CameraDevice for RpicamCamera {
    async fn configure(&self, config: CameraConfig) -> anyhow::Result<()> {
        let mut state = self.inner.lock().await;
        if state.started {
            anyhow::bail!("camera must be stopped before it is reconfigured");
        }
        state.camera = Some(config);
        state.flags.clear();
        Ok(())
    }

    async fn apply_control(&self, name: &str, value: &Value) -> anyhow::Result<()> {
        let Some((flag, arg)) = control_flag(name, value)? else {
            return Ok(());
        };
        let mut state = self.inner.lock().await;
        state.flags.insert(flag, arg);
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let mut state = self.inner.lock().await;
        if state.camera.is_none() {
            anyhow::bail!("camera not configured");
        }
        state.started = true;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let video = {
            let mut state = self.inner.lock().await;
            state.started = false;
            state.sink = None;
            state.video.take()
        };
        if let Some(video) = video {
            stop_video(video).await;
            info!(event = "camera.video_stopped", "video pipeline stopped");
        }
        Ok(())
    }

    async fn capture_still(&self) -> anyhow::Result<Bytes> {
        let mut state = self.inner.lock().await;
        let camera = state.camera.context("camera not configured")?;
        if !state.started {
            anyhow::bail!("camera not started");
        }
        if let Some(video) = state.video.take() {
            stop_video(video).await;
        }

        let mut cmd = Command::new(&self.config.still_binary);
        cmd.args(["--nopreview", "--immediate", "-e", "jpg"])
            .arg("--width")
            .arg(camera.still_resolution.width.to_string())
            .arg("--height")
            .arg(camera.still_resolution.height.to_string())
            .args(flag_args(&state.flags))
            .args(["-o", "-"]);
        let result = run_command_stdout(&mut cmd, self.config.still_timeout, "rpicam-still").await;

        if camera.mode == CameraMode::DualStream {
            if let Some(sink) = state.sink.clone() {
                match self.spawn_video(&camera, &state.flags, sink) {
                    Ok(video) => state.video = Some(video),
                    Err(err) => warn!(error = %err, "failed to resume video after still"),
                }
            }
        }

        let jpeg = result?;
        if jpeg.is_empty() {
            anyhow::bail!("rpicam-still produced an empty image");
        }
        Ok(Bytes::from(jpeg))
    }

    async fn start_encoded_stream(&self, on_frame: FrameSink) -> anyhow::Result<()> {
        let mut state = self.inner.lock().await;
        let camera = state.camera.context("camera not configured")?;
        if !state.started {
            anyhow::bail!("camera not started");
        }
        if camera.mode != CameraMode::DualStream {
            anyhow::bail!("camera is configured for stills only");
        }
        if let Some(video) = state.video.take() {
            stop_video(video).await;
        }
        let video = self.spawn_video(&camera, &state.flags, on_frame.clone())?;
        state.sink = Some(on_frame);
        state.video = Some(video);
        Ok(())
    }

    async fn stream_lost(&self) {
        self.lost.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feeder_protocol::Resolution;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn numeric_controls_map_to_flags() {
        assert_eq!(
            control_flag("Sharpness", &json!(1.5)).expect("ok"),
            Some(("--sharpness", "1.5".to_string()))
        );
        assert_eq!(
            control_flag("ExposureTime", &json!(20000)).expect("ok"),
            Some(("--shutter", "20000".to_string()))
        );
        assert!(control_flag("Brightness", &json!(3.0)).is_err());
        assert!(control_flag("Contrast", &json!("high")).is_err());
    }

    #[test]
    fn enum_controls_accept_index_or_name() {
        assert_eq!(
            control_flag("AfMode", &json!(2)).expect("ok"),
            Some(("--autofocus-mode", "continuous".to_string()))
        );
        assert_eq!(
            control_flag("AwbMode", &json!("Daylight")).expect("ok"),
            Some(("--awb", "daylight".to_string()))
        );
        assert!(control_flag("NoiseReductionMode", &json!(9)).is_err());
    }

    #[test]
    fn unknown_controls_are_rejected_and_toggles_have_no_flag() {
        assert!(control_flag("ScalerCrop", &json!([0, 0, 10, 10])).is_err());
        assert_eq!(control_flag("AeEnable", &json!(false)).expect("ok"), None);
        assert!(control_flag("AwbEnable", &json!(1)).is_err());
    }

    fn shell_camera(video: &str, still: &str) -> RpicamCamera {
        RpicamCamera::new(RpicamConfig {
            video_binary: video.to_string(),
            still_binary: still.to_string(),
            still_timeout: Duration::from_secs(5),
            max_jpeg_len: DEFAULT_MAX_JPEG_LEN,
        })
    }

    fn script(dir: &std::path::Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        let mut perms = std::fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path.display().to_string()
    }

    #[tokio::test]
    async fn video_frames_reach_the_sink_and_stills_come_from_stdout() {
        let dir = std::env::temp_dir().join(format!("rpicam-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        let video = script(
            &dir,
            "fake-vid",
            "printf '\\377\\330one\\377\\331\\377\\330two\\377\\331'; exec sleep 30",
        );
        let still = script(&dir, "fake-still", "printf '\\377\\330still\\377\\331'");
        let camera = shell_camera(&video, &still);

        let config = CameraConfig {
            mode: CameraMode::DualStream,
            stream_resolution: Resolution::new(640, 360),
            still_resolution: Resolution::new(2560, 1440),
            framerate: 10,
        };
        camera.configure(config).await.expect("configure");
        camera
            .apply_control("Contrast", &json!(1.2))
            .await
            .expect("control");
        camera.start().await.expect("start");

        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);
        camera
            .start_encoded_stream(Arc::new(move |_frame| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .expect("stream");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while frames.load(Ordering::SeqCst) < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(frames.load(Ordering::SeqCst) >= 2);

        let jpeg = camera.capture_still().await.expect("still");
        assert_eq!(&jpeg[..], b"\xff\xd8still\xff\xd9");

        camera.stop().await.expect("stop");
        let lost = tokio::time::timeout(Duration::from_millis(200), camera.stream_lost()).await;
        assert!(lost.is_err(), "intentional restarts and stops are not a lost stream");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn encoder_exit_is_reported_as_lost_stream() {
        let dir = std::env::temp_dir().join(format!("rpicam-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        let video = script(&dir, "dying-vid", "printf '\\377\\330one\\377\\331'");
        let camera = shell_camera(&video, "true");
        camera
            .configure(CameraConfig {
                mode: CameraMode::DualStream,
                stream_resolution: Resolution::new(640, 360),
                still_resolution: Resolution::new(2560, 1440),
                framerate: 10,
            })
            .await
            .expect("configure");
        camera.start().await.expect("start");
        camera
            .start_encoded_stream(Arc::new(|_frame| {}))
            .await
            .expect("stream");

        tokio::time::timeout(Duration::from_secs(5), camera.stream_lost())
            .await
            .expect("lost stream reported");
        camera.stop().await.expect("stop");
        let _ = std::fs::remove_dir_all(dir);
    }
}
