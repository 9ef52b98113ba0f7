//! Streaming and motion capture share the camera and never run together.
//! Motion capture paused by streaming resumes once streaming stops.

use crate::service::{stop_untracked, OutputStream, ProcessHandle, ServiceKind, ServiceSpec};
use feeder_protocol::documents::{
    flag, APP_OPEN_FIELD, APP_OPEN_STATUS_PATH, CONFIG_SETTINGS_PATH,
    MOTION_CAPTURE_ENABLED_FIELD, STREAMING_ENABLED_FIELD, STREAMING_STATUS_PATH,
};
use feeder_protocol::DocumentChange;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub(crate) const WATCHED_PATHS: [&str; 3] =
    [STREAMING_STATUS_PATH, APP_OPEN_STATUS_PATH, CONFIG_SETTINGS_PATH];

const MAX_OUTPUT_LINES_PER_DRAIN: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DesiredState {
    Running,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ServiceStatus {
    pub(crate) kind: ServiceKind,
    pub(crate) desired: DesiredState,
    pub(crate) pid: Option<i32>,
    pub(crate) paused_by_conflict: bool,
}

struct ManagedService {
    spec: ServiceSpec,
    desired: DesiredState,
    handle: Option<ProcessHandle>,
    paused_by_conflict: bool,
}

impl ManagedService {
    fn wants_running(&self) -> bool {
        self.desired == DesiredState::Running
    }

    async fn start(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            if handle.is_alive() {
                return;
            }
        }
        if let Some(dead) = self.handle.take() {
            dead.discard();
        }
        stop_untracked(&self.spec).await;
        match ProcessHandle::start(&self.spec) {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => {
                error!(service = %self.spec.kind, error = %err, "failed to start service");
            }
        }
    }

    async fn stop(&mut self) {
        match self.handle.take() {
            Some(handle) => handle.stop().await,
            None => stop_untracked(&self.spec).await,
        }
    }
}

struct SupervisorState {
    camera_streaming: ManagedService,
    config_sync: ManagedService,
    motion_capture: ManagedService,
}

impl SupervisorState {
    fn service(&mut self, kind: ServiceKind) -> &mut ManagedService {
        match kind {
            ServiceKind::CameraStreaming => &mut self.camera_streaming,
            ServiceKind::ConfigSync => &mut self.config_sync,
            ServiceKind::MotionCapture => &mut self.motion_capture,
        }
    }

    fn wants_running(&mut self, kind: ServiceKind) -> bool {
        self.service(kind).wants_running()
    }
}

pub(crate) struct Supervisor {
    state: Mutex<SupervisorState>,
}

impl Supervisor {
    pub(crate) fn new(specs: Vec<ServiceSpec>) -> anyhow::Result<Self> {
        let mut specs: HashMap<ServiceKind, ServiceSpec> = specs
            .into_iter()
            .map(|spec| (spec.kind, spec))
            .collect();
        let mut take = |kind: ServiceKind| -> anyhow::Result<ManagedService> {
            let spec = specs
                .remove(&kind)
                .ok_or_else(|| anyhow::anyhow!("missing service {kind}"))?;
            Ok(ManagedService {
                spec,
                desired: DesiredState::Stopped,
                handle: None,
                paused_by_conflict: false,
            })
        };
        let state = SupervisorState {
            camera_streaming: take(ServiceKind::CameraStreaming)?,
            config_sync: take(ServiceKind::ConfigSync)?,
            motion_capture: take(ServiceKind::MotionCapture)?,
        };
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    pub(crate) async fn reconcile_on_startup(&self) {
        let mut state = self.state.lock().await;
        for kind in ServiceKind::ALL {
            state.service(kind).stop().await;
        }
        info!(event = "supervisor.reconciled", "stopped leftover services");
    }

    pub(crate) async fn on_remote_change(&self, change: &DocumentChange) {
        let document = change.document.as_ref();
        match change.path.as_str() {
            STREAMING_STATUS_PATH => {
                self.set_streaming(flag(document, STREAMING_ENABLED_FIELD)).await
            }
            APP_OPEN_STATUS_PATH => self.set_app_open(flag(document, APP_OPEN_FIELD)).await,
            CONFIG_SETTINGS_PATH => {
                self.set_motion_capture(flag(document, MOTION_CAPTURE_ENABLED_FIELD))
                    .await
            }
            other => debug!(path = other, "ignoring change on unwatched path"),
        }
    }

    async fn set_streaming(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        if state.wants_running(ServiceKind::CameraStreaming) == enabled {
            return;
        }
        if enabled {
            let motion = state.service(ServiceKind::MotionCapture);
            if motion.wants_running() && !motion.paused_by_conflict {
                info!(
                    event = "supervisor.motion_paused",
                    "pausing motion capture while streaming"
                );
                motion.paused_by_conflict = true;
                motion.stop().await;
            }
            let streaming = state.service(ServiceKind::CameraStreaming);
            streaming.desired = DesiredState::Running;
            streaming.start().await;
        } else {
            let streaming = state.service(ServiceKind::CameraStreaming);
            streaming.desired = DesiredState::Stopped;
            streaming.stop().await;
            let motion = state.service(ServiceKind::MotionCapture);
            if motion.paused_by_conflict {
                info!(
                    event = "supervisor.motion_resumed",
                    "streaming stopped, resuming motion capture"
                );
                motion.paused_by_conflict = false;
                motion.start().await;
            }
        }
    }

    async fn set_app_open(&self, open: bool) {
        let mut state = self.state.lock().await;
        let sync = state.service(ServiceKind::ConfigSync);
        if sync.wants_running() == open {
            return;
        }
        if open {
            sync.desired = DesiredState::Running;
            sync.start().await;
        } else {
            sync.desired = DesiredState::Stopped;
            sync.stop().await;
        }
    }

    async fn set_motion_capture(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        let streaming = state.wants_running(ServiceKind::CameraStreaming);
        let motion = state.service(ServiceKind::MotionCapture);
        if motion.wants_running() == enabled {
            return;
        }
        if enabled {
            if streaming {
                warn!(
                    event = "supervisor.motion_refused",
                    "motion capture requested while streaming, ignoring; toggle it again once streaming stops"
                );
                return;
            }
            motion.desired = DesiredState::Running;
            motion.start().await;
        } else {
            motion.paused_by_conflict = false;
            motion.desired = DesiredState::Stopped;
            motion.stop().await;
        }
    }

    pub(crate) async fn check_crashed(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut restarted = 0;
        for kind in ServiceKind::ALL {
            let service = state.service(kind);
            if !service.wants_running() || service.paused_by_conflict {
                continue;
            }
            let alive = service
                .handle
                .as_mut()
                .is_some_and(ProcessHandle::is_alive);
            if alive {
                continue;
            }
            match service.handle.take() {
                Some(dead) => {
                    let status = dead.discard();
                    error!(
                        event = "service.crashed",
                        service = %kind,
                        status = ?status,
                        "service exited unexpectedly, restarting"
                    );
                }
                None => warn!(service = %kind, "service is not running, starting it"),
            }
            service.start().await;
            restarted += 1;
        }
        restarted
    }

    pub(crate) async fn drain_output(&self) {
        let mut state = self.state.lock().await;
        for kind in ServiceKind::ALL {
            let Some(handle) = state.service(kind).handle.as_mut() else {
                continue;
            };
            for _ in 0..MAX_OUTPUT_LINES_PER_DRAIN {
                let Some(output) = handle.try_read_line() else {
                    break;
                };
                match output.stream {
                    OutputStream::Stdout => info!(service = %kind, "{}", output.line),
                    OutputStream::Stderr => warn!(service = %kind, "{}", output.line),
                }
            }
        }
    }

    pub(crate) async fn shutdown_all(&self) {
        let mut state = self.state.lock().await;
        for kind in ServiceKind::ALL {
            state.service(kind).stop().await;
        }
        info!(event = "supervisor.shutdown", "all services stopped");
    }

    pub(crate) async fn status(&self) -> Vec<ServiceStatus> {
        let mut state = self.state.lock().await;
        ServiceKind::ALL
            .iter()
            .map(|kind| {
                let service = state.service(*kind);
                ServiceStatus {
                    kind: *kind,
                    desired: service.desired,
                    pid: service
                        .handle
                        .as_mut()
                        .and_then(|handle| handle.is_alive().then(|| handle.pid())),
                    paused_by_conflict: service.paused_by_conflict,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feeder_protocol::documents::document;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use system_utils::process::signal_process;

    struct Fixture {
        dir: PathBuf,
        supervisor: Arc<Supervisor>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn sleep_spec(dir: &Path, kind: ServiceKind) -> ServiceSpec {
        ServiceSpec {
            kind,
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
            pid_file: dir.join(format!("{}.pid", kind.name())),
            process_match: "sleep".to_string(),
        }
    }

    fn fixture() -> Fixture {
        let dir = std::env::temp_dir().join(format!("supervisor-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        let specs = ServiceKind::ALL
            .iter()
            .map(|kind| sleep_spec(&dir, *kind))
            .collect();
        Fixture {
            supervisor: Arc::new(Supervisor::new(specs).expect("supervisor")),
            dir,
        }
    }

    fn change(path: &str, field: &str, value: bool) -> DocumentChange {
        DocumentChange {
            path: path.to_string(),
            document: Some(document([(field, json!(value))])),
        }
    }

    fn streaming(value: bool) -> DocumentChange {
        change(STREAMING_STATUS_PATH, STREAMING_ENABLED_FIELD, value)
    }

    fn motion(value: bool) -> DocumentChange {
        change(CONFIG_SETTINGS_PATH, MOTION_CAPTURE_ENABLED_FIELD, value)
    }

    async fn status_of(supervisor: &Supervisor, kind: ServiceKind) -> ServiceStatus {
        supervisor
            .status()
            .await
            .into_iter()
            .find(|status| status.kind == kind)
            .expect("status")
    }

    async fn assert_exclusive(supervisor: &Supervisor) {
        let stream = status_of(supervisor, ServiceKind::CameraStreaming).await;
        let motion = status_of(supervisor, ServiceKind::MotionCapture).await;
        assert!(
            !(stream.pid.is_some() && motion.pid.is_some()),
            "streaming and motion capture running together"
        );
        if motion.desired == DesiredState::Running {
            assert!(stream.desired == DesiredState::Stopped || motion.paused_by_conflict);
        }
    }

    #[tokio::test]
    async fn streaming_pauses_and_resumes_motion_capture() {
        let fx = fixture();
        let sup = &fx.supervisor;

        sup.on_remote_change(&motion(true)).await;
        assert!(status_of(sup, ServiceKind::MotionCapture).await.pid.is_some());

        sup.on_remote_change(&streaming(true)).await;
        assert_exclusive(sup).await;
        let motion_status = status_of(sup, ServiceKind::MotionCapture).await;
        assert!(motion_status.paused_by_conflict);
        assert_eq!(motion_status.pid, None);
        assert!(status_of(sup, ServiceKind::CameraStreaming).await.pid.is_some());

        sup.on_remote_change(&streaming(false)).await;
        assert_exclusive(sup).await;
        let motion_status = status_of(sup, ServiceKind::MotionCapture).await;
        assert!(!motion_status.paused_by_conflict);
        assert!(motion_status.pid.is_some());
        assert_eq!(status_of(sup, ServiceKind::CameraStreaming).await.pid, None);

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn explicit_disable_while_paused_does_not_resume() {
        let fx = fixture();
        let sup = &fx.supervisor;

        sup.on_remote_change(&motion(true)).await;
        sup.on_remote_change(&streaming(true)).await;
        sup.on_remote_change(&motion(false)).await;
        assert!(!status_of(sup, ServiceKind::MotionCapture).await.paused_by_conflict);

        sup.on_remote_change(&streaming(false)).await;
        let motion_status = status_of(sup, ServiceKind::MotionCapture).await;
        assert_eq!(motion_status.desired, DesiredState::Stopped);
        assert_eq!(motion_status.pid, None);

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn motion_enable_during_streaming_is_dropped() {
        let fx = fixture();
        let sup = &fx.supervisor;

        sup.on_remote_change(&streaming(true)).await;
        sup.on_remote_change(&motion(true)).await;
        assert_exclusive(sup).await;
        let motion_status = status_of(sup, ServiceKind::MotionCapture).await;
        assert_eq!(motion_status.desired, DesiredState::Stopped);
        assert!(!motion_status.paused_by_conflict);

        sup.on_remote_change(&streaming(false)).await;
        assert_eq!(status_of(sup, ServiceKind::MotionCapture).await.pid, None);

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn streaming_toggle_scenario_ends_with_motion_running() {
        let fx = fixture();
        let sup = &fx.supervisor;

        for change in [
            motion(true),
            streaming(true),
            streaming(true),
            streaming(false),
            streaming(true),
            streaming(false),
        ] {
            sup.on_remote_change(&change).await;
            assert_exclusive(sup).await;
        }
        let stream = status_of(sup, ServiceKind::CameraStreaming).await;
        let motion_status = status_of(sup, ServiceKind::MotionCapture).await;
        assert_eq!(stream.desired, DesiredState::Stopped);
        assert_eq!(stream.pid, None);
        assert_eq!(motion_status.desired, DesiredState::Running);
        assert!(motion_status.pid.is_some());

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn missing_document_counts_as_disabled() {
        let fx = fixture();
        let sup = &fx.supervisor;

        sup.on_remote_change(&change(APP_OPEN_STATUS_PATH, APP_OPEN_FIELD, true))
            .await;
        assert!(status_of(sup, ServiceKind::ConfigSync).await.pid.is_some());
        sup.on_remote_change(&DocumentChange {
            path: APP_OPEN_STATUS_PATH.to_string(),
            document: None,
        })
        .await;
        assert_eq!(status_of(sup, ServiceKind::ConfigSync).await.pid, None);
    }

    #[tokio::test]
    async fn crashed_service_is_restarted_exactly_once() {
        let fx = fixture();
        let sup = &fx.supervisor;

        sup.on_remote_change(&change(APP_OPEN_STATUS_PATH, APP_OPEN_FIELD, true))
            .await;
        assert_eq!(sup.check_crashed().await, 0);

        let pid = status_of(sup, ServiceKind::ConfigSync)
            .await
            .pid
            .expect("running");
        signal_process(pid, libc::SIGKILL).expect("kill");
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert_eq!(sup.check_crashed().await, 1);
        let restarted = status_of(sup, ServiceKind::ConfigSync).await.pid.expect("restarted");
        assert_ne!(restarted, pid);
        assert_eq!(sup.check_crashed().await, 0);

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn paused_motion_capture_is_not_restarted() {
        let fx = fixture();
        let sup = &fx.supervisor;

        sup.on_remote_change(&motion(true)).await;
        sup.on_remote_change(&streaming(true)).await;
        assert_eq!(sup.check_crashed().await, 0);
        assert_eq!(status_of(sup, ServiceKind::MotionCapture).await.pid, None);

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn concurrent_changes_keep_services_exclusive() {
        let fx = fixture();
        let sup = &fx.supervisor;
        sup.on_remote_change(&motion(true)).await;

        let mut tasks = Vec::new();
        for round in 0..6 {
            let sup = Arc::clone(sup);
            tasks.push(tokio::spawn(async move {
                sup.on_remote_change(&streaming(round % 2 == 0)).await;
                sup.check_crashed().await;
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }
        assert_exclusive(sup).await;

        sup.shutdown_all().await;
        for status in sup.status().await {
            assert_eq!(status.pid, None);
        }
    }
}
