use crate::config::Timing;
use crate::heartbeat::{send_offline, spawn_heartbeat};
use crate::supervisor::{Supervisor, WATCHED_PATHS};
use anyhow::Context;
use feeder_store::RemoteStateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OUTPUT_DRAIN_INTERVAL: Duration = Duration::from_millis(100);
const CHANGE_QUEUE_CAPACITY: usize = 64;

pub(crate) async fn run(
    supervisor: Arc<Supervisor>,
    store: Arc<dyn RemoteStateStore>,
    timing: Timing,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    supervisor.reconcile_on_startup().await;

    let (tx, mut changes) = mpsc::channel(CHANGE_QUEUE_CAPACITY);
    let mut subscriptions = Vec::with_capacity(WATCHED_PATHS.len());
    for path in WATCHED_PATHS {
        let subscription = store
            .subscribe(path, tx.clone())
            .await
            .with_context(|| format!("failed to subscribe to {path}"))?;
        subscriptions.push(subscription);
    }
    drop(tx);
    info!(event = "supervisor.ready", paths = ?WATCHED_PATHS, "watching remote state");

    let mut crash_check = tokio::time::interval(timing.crash_check_interval);
    crash_check.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let heartbeat_stop = shutdown.child_token();
    let heartbeat = spawn_heartbeat(
        Arc::clone(&store),
        timing.heartbeat_interval,
        heartbeat_stop.clone(),
    );
    let mut drain = tokio::time::interval(OUTPUT_DRAIN_INTERVAL);
    drain.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            change = changes.recv() => {
                let Some(change) = change else {
                    warn!("remote state subscriptions closed");
                    break;
                };
                supervisor.on_remote_change(&change).await;
            }
            _ = crash_check.tick() => {
                supervisor.check_crashed().await;
                let services = supervisor.status().await;
                debug!(services = ?services, "service status");
            }
            _ = drain.tick() => {
                supervisor.drain_output().await;
            }
        }
    }

    drop(subscriptions);
    heartbeat_stop.cancel();
    if let Err(err) = heartbeat.await {
        warn!(error = %err, "heartbeat task failed");
    }
    supervisor.drain_output().await;
    supervisor.shutdown_all().await;
    send_offline(store.as_ref()).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServiceKind, ServiceSpec};
    use feeder_protocol::documents::{
        document, CONFIG_SETTINGS_PATH, HEARTBEAT_STATUS_PATH, STREAMING_STATUS_PATH,
    };
    use feeder_store::{MemoryStore, WriteMode};
    use serde_json::json;

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check().await {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn remote_changes_drive_services_until_shutdown() {
        let dir = std::env::temp_dir().join(format!("control-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        let specs = ServiceKind::ALL
            .iter()
            .map(|kind| ServiceSpec {
                kind: *kind,
                program: "sleep".to_string(),
                args: vec!["30".to_string()],
                pid_file: dir.join(format!("{}.pid", kind.name())),
                process_match: "sleep".to_string(),
            })
            .collect();
        let supervisor = Arc::new(Supervisor::new(specs).expect("supervisor"));
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let timing = Timing {
            crash_check_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
        };
        let task = tokio::spawn(run(
            Arc::clone(&supervisor),
            store.clone() as Arc<dyn RemoteStateStore>,
            timing,
            shutdown.clone(),
        ));

        let watched = Arc::clone(&store);
        wait_until(move || {
            let watched = Arc::clone(&watched);
            async move { watched.subscriber_count(CONFIG_SETTINGS_PATH) == 1 }
        })
        .await;
        store
            .set(
                CONFIG_SETTINGS_PATH,
                document([("motion_capture_enabled", json!(true))]),
                WriteMode::Merge,
            )
            .await
            .expect("set");
        store
            .set(
                STREAMING_STATUS_PATH,
                document([("enabled", json!(true))]),
                WriteMode::Replace,
            )
            .await
            .expect("set");

        let sup = Arc::clone(&supervisor);
        wait_until(move || {
            let sup = Arc::clone(&sup);
            async move {
                sup.status().await.iter().any(|status| {
                    status.kind == ServiceKind::CameraStreaming && status.pid.is_some()
                })
            }
        })
        .await;

        shutdown.cancel();
        task.await.expect("join").expect("run");
        assert!(supervisor.status().await.iter().all(|status| status.pid.is_none()));
        let heartbeat = store.document(HEARTBEAT_STATUS_PATH).expect("heartbeat");
        assert_eq!(heartbeat["status"], json!("offline"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
