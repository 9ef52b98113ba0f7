use feeder_protocol::documents::{document, HEARTBEAT_STATUS_PATH};
use feeder_protocol::Document;
use feeder_store::{RemoteStateStore, WriteMode};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use system_utils::process::run_command_stdout;
use system_utils::time::rfc3339;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const IP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const FALLBACK_IP: &str = "127.0.0.1";

fn online_document(now: SystemTime, ip_address: &str) -> Document {
    document([
        ("last_seen", json!(rfc3339(now))),
        ("ip_address", json!(ip_address)),
        ("status", json!("online")),
    ])
}

fn first_address(output: &str) -> Option<String> {
    output.split_whitespace().next().map(str::to_string)
}

async fn local_ip_address() -> String {
    let mut cmd = Command::new("hostname");
    cmd.arg("-I");
    match run_command_stdout(&mut cmd, IP_LOOKUP_TIMEOUT, "hostname -I").await {
        Ok(stdout) => first_address(&String::from_utf8_lossy(&stdout))
            .unwrap_or_else(|| FALLBACK_IP.to_string()),
        Err(err) => {
            debug!(error = %err, "ip lookup failed");
            FALLBACK_IP.to_string()
        }
    }
}

pub(crate) async fn send_heartbeat(store: &dyn RemoteStateStore) {
    let ip_address = local_ip_address().await;
    let heartbeat = online_document(SystemTime::now(), &ip_address);
    match store
        .set(HEARTBEAT_STATUS_PATH, heartbeat, WriteMode::Merge)
        .await
    {
        Ok(()) => debug!(ip_address = %ip_address, "heartbeat sent"),
        Err(err) => warn!(error = %err, "failed to send heartbeat"),
    }
}

pub(crate) fn spawn_heartbeat(
    store: Arc<dyn RemoteStateStore>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticks.tick() => send_heartbeat(store.as_ref()).await,
            }
        }
    })
}

pub(crate) async fn send_offline(store: &dyn RemoteStateStore) {
    let offline = document([
        ("last_seen", json!(rfc3339(SystemTime::now()))),
        ("status", json!("offline")),
    ]);
    if let Err(err) = store
        .set(HEARTBEAT_STATUS_PATH, offline, WriteMode::Merge)
        .await
    {
        warn!(error = %err, "failed to mark device offline");
    }
}
