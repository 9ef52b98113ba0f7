use crate::config::SensorConfig;
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MotionEvent {
    Started,
    Ended,
}

#[async_trait]
pub(crate) trait MotionSensor: Send {
    async fn next_event(&mut self) -> anyhow::Result<Option<MotionEvent>>;
}

#[derive(Debug)]
pub(crate) struct Debouncer {
    threshold: Duration,
    active: bool,
    pending: Option<(bool, Instant)>,
}

impl Debouncer {
    pub(crate) fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            active: false,
            pending: None,
        }
    }

    pub(crate) fn observe(&mut self, level: bool, now: Instant) -> Option<MotionEvent> {
        if level == self.active {
            self.pending = None;
            return None;
        }
        let since = match self.pending {
            Some((pending, since)) if pending == level => since,
            _ => {
                self.pending = Some((level, now));
                now
            }
        };
        if now.duration_since(since) < self.threshold {
            return None;
        }
        self.active = level;
        self.pending = None;
        Some(if level {
            MotionEvent::Started
        } else {
            MotionEvent::Ended
        })
    }
}

pub(crate) struct GpioMotionSensor {
    config: SensorConfig,
    debouncer: Debouncer,
    ticker: tokio::time::Interval,
}

impl GpioMotionSensor {
    pub(crate) async fn open(config: SensorConfig) -> anyhow::Result<Self> {
        read_level(&config)
            .await
            .with_context(|| format!("motion sensor not readable at {}", config.value_path.display()))?;
        let mut ticker = tokio::time::interval(config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Ok(Self {
            debouncer: Debouncer::new(config.debounce),
            config,
            ticker,
        })
    }
}

#[async_trait]
impl MotionSensor for GpioMotionSensor {
    async fn next_event(&mut self) -> anyhow::Result<Option<MotionEvent>> {
        loop {
            self.ticker.tick().await;
            let level = match read_level(&self.config).await {
                Ok(level) => level,
                Err(err) => {
                    warn!(error = %err, "motion sensor read failed");
                    continue;
                }
            };
            if let Some(event) = self.debouncer.observe(level, Instant::now()) {
                debug!(event = ?event, "motion edge");
                return Ok(Some(event));
            }
        }
    }
}

async fn read_level(config: &SensorConfig) -> anyhow::Result<bool> {
    let raw = tokio::fs::read_to_string(&config.value_path).await?;
    match raw.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => anyhow::bail!("unexpected gpio value {other:?}"),
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use tokio::sync::mpsc;

    pub(crate) struct ScriptedSensor {
        events: mpsc::UnboundedReceiver<MotionEvent>,
    }

    impl ScriptedSensor {
        pub(crate) fn new() -> (mpsc::UnboundedSender<MotionEvent>, Self) {
            let (tx, events) = mpsc::unbounded_channel();
            (tx, Self { events })
        }
    }

    #[async_trait]
    impl MotionSensor for ScriptedSensor {
        async fn next_event(&mut self) -> anyhow::Result<Option<MotionEvent>> {
            Ok(self.events.recv().await)
        }
    }
}
