use crate::{CameraConfig, CameraDevice, FrameSink};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct FakeCamera {
    state: Mutex<FakeState>,
    capture_delay: Duration,
    captures: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    lost: CancellationToken,
}

#[derive(Default)]
struct FakeState {
    config: Option<CameraConfig>,
    applied: Vec<(String, Value)>,
    rejected: HashSet<String>,
    started: bool,
    stops: usize,
    fail_captures: bool,
    sink: Option<FrameSink>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn reject_control(&self, name: &str) {
        self.lock().rejected.insert(name.to_string());
    }

    pub fn fail_captures(&self, fail: bool) {
        self.lock().fail_captures = fail;
    }

    pub fn emit_frame(&self, frame: Bytes) -> bool {
        let sink = self.lock().sink.clone();
        match sink {
            Some(sink) => {
                sink(frame);
                true
            }
            None => false,
        }
    }

    pub fn lose_stream(&self) {
        self.lock().sink = None;
        self.lost.cancel();
    }

    pub fn config(&self) -> Option<CameraConfig> {
        self.lock().config
    }

    pub fn applied_controls(&self) -> Vec<(String, Value)> {
        self.lock().applied.clone()
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn stop_count(&self) -> usize {
        self.lock().stops
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_captures(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake camera lock")
    }
}

#[async_trait]
impl CameraDevice for FakeCamera {
    async fn configure(&self, config: CameraConfig) -> anyhow::Result<()> {
        self.lock().config = Some(config);
        Ok(())
    }

    async fn apply_control(&self, name: &str, value: &Value) -> anyhow::Result<()> {
        let mut state = self.lock();
        if state.rejected.contains(name) {
            anyhow::bail!("control {name} not supported");
        }
        state.applied.push((name.to_string(), value.clone()));
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let mut state = self.lock();
        if state.config.is_none() {
            anyhow::bail!("camera not configured");
        }
        state.started = true;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let mut state = self.lock();
        state.started = false;
        state.sink = None;
        state.stops += 1;
        Ok(())
    }

    async fn capture_still(&self) -> anyhow::Result<Bytes> {
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);
        if !self.capture_delay.is_zero() {
            tokio::time::sleep(self.capture_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.lock().fail_captures {
            anyhow::bail!("sensor timeout");
        }
        let index = self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(format!("still-{index}")))
    }

    async fn start_encoded_stream(&self, on_frame: FrameSink) -> anyhow::Result<()> {
        let mut state = self.lock();
        if !state.started {
            anyhow::bail!("camera not started");
        }
        state.sink = Some(on_frame);
        Ok(())
    }

    async fn stream_lost(&self) {
        self.lost.cancelled().await;
    }
}
