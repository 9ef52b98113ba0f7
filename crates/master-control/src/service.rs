use anyhow::Context;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use system_utils::pidfile::{pid_matches_command, read_pid_file, remove_pid_file, write_pid_file};
use system_utils::process::{apply_process_group, process_exists, signal_process, SignalOutcome};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub(crate) const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(1);
const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(1);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const OUTPUT_QUEUE_CAPACITY: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ServiceKind {
    CameraStreaming,
    ConfigSync,
    MotionCapture,
}

impl ServiceKind {
    pub(crate) const ALL: [ServiceKind; 3] = [
        ServiceKind::CameraStreaming,
        ServiceKind::ConfigSync,
        ServiceKind::MotionCapture,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::CameraStreaming => "camera_streaming",
            Self::ConfigSync => "config_sync",
            Self::MotionCapture => "motion_capture",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ServiceSpec {
    pub(crate) kind: ServiceKind,
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) pid_file: PathBuf,
    pub(crate) process_match: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct OutputLine {
    pub(crate) stream: OutputStream,
    pub(crate) line: String,
}

pub(crate) struct ProcessHandle {
    kind: ServiceKind,
    child: Child,
    pid: i32,
    pid_file: PathBuf,
    output: mpsc::Receiver<OutputLine>,
}

impl ProcessHandle {
    pub(crate) fn start(spec: &ServiceSpec) -> anyhow::Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        apply_process_group(&mut cmd);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {} ({})", spec.kind, spec.program))?;
        let pid = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .context("spawned child has no pid")?;

        if let Err(err) = write_pid_file(&spec.pid_file, pid as u32) {
            let _ = child.start_kill();
            return Err(err);
        }

        let (tx, output) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, OutputStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, OutputStream::Stderr, tx);
        }

        info!(event = "service.started", service = %spec.kind, pid, "service started");
        Ok(Self {
            kind: spec.kind,
            child,
            pid,
            pid_file: spec.pid_file.clone(),
            output,
        })
    }

    pub(crate) fn pid(&self) -> i32 {
        self.pid
    }

    pub(crate) fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub(crate) fn try_read_line(&mut self) -> Option<OutputLine> {
        self.output.try_recv().ok()
    }

    pub(crate) async fn stop(mut self) {
        let pid = self.pid;
        if matches!(self.child.try_wait(), Ok(None)) {
            deliver(self.kind, pid, libc::SIGTERM);
            let exited = tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, self.child.wait())
                .await
                .is_ok();
            if !exited {
                warn!(service = %self.kind, pid, "service ignored SIGTERM, killing");
                deliver(self.kind, pid, libc::SIGKILL);
                if tokio::time::timeout(KILL_WAIT_TIMEOUT, self.child.wait())
                    .await
                    .is_err()
                {
                    warn!(service = %self.kind, pid, "service did not exit after SIGKILL");
                }
            }
        }
        release_pid_file(self.kind, &self.pid_file);
        info!(event = "service.stopped", service = %self.kind, pid, "service stopped");
    }

    pub(crate) fn discard(mut self) -> Option<std::process::ExitStatus> {
        let status = self.child.try_wait().ok().flatten();
        release_pid_file(self.kind, &self.pid_file);
        status
    }
}

fn spawn_line_reader<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode_line(&buf);
                    if tx.send(OutputLine { stream, line }).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(stream = stream.as_str(), error = %err, "child output read failed");
                    break;
                }
            }
        }
    });
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn deliver(kind: ServiceKind, pid: i32, signal: i32) {
    match signal_process(pid, signal) {
        Ok(SignalOutcome::Delivered) => {}
        Ok(SignalOutcome::NoSuchProcess) => {
            debug!(service = %kind, pid, signal, "process already gone");
        }
        Err(err) => {
            warn!(service = %kind, pid, signal, error = %err, "failed to signal service");
        }
    }
}

fn release_pid_file(kind: ServiceKind, pid_file: &Path) {
    if let Err(err) = remove_pid_file(pid_file) {
        warn!(service = %kind, path = %pid_file.display(), error = %err, "failed to remove pid file");
    }
}

/// Stops a process known only through its pid file. The pid is signalled
/// only while its cmdline still matches the service.
pub(crate) async fn stop_untracked(spec: &ServiceSpec) {
    let pid = match read_pid_file(&spec.pid_file) {
        Ok(pid) => pid,
        Err(err) => {
            warn!(service = %spec.kind, error = %err, "ignoring unreadable pid file");
            None
        }
    };
    if let Some(pid) = pid {
        if !process_exists(pid) {
            debug!(service = %spec.kind, pid, "stale pid file, process already gone");
        } else if !pid_matches_command(pid, &spec.process_match) {
            warn!(
                service = %spec.kind,
                pid,
                expected = %spec.process_match,
                "pid file points at an unrelated process, not signalling it"
            );
        } else {
            info!(event = "service.stale_stop", service = %spec.kind, pid, "stopping leftover service process");
            deliver(spec.kind, pid, libc::SIGTERM);
            if !wait_for_exit(pid, GRACEFUL_STOP_TIMEOUT).await {
                deliver(spec.kind, pid, libc::SIGKILL);
                wait_for_exit(pid, KILL_WAIT_TIMEOUT).await;
            }
        }
    }
    release_pid_file(spec.kind, &spec.pid_file);
}

async fn wait_for_exit(pid: i32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if !process_exists(pid) || pid_is_zombie(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

fn pid_is_zombie(pid: i32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next().map(|state| state == "Z"))
        })
        .unwrap_or(false)
}
