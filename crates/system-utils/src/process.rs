use std::io;
use std::process::{Output, Stdio};

use anyhow::Context;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

/// Runs `cmd` to completion, draining both pipes while it runs. The child
/// is killed if it outlives `command_timeout`.
pub async fn run_command_with_timeout(
    cmd: &mut Command,
    command_timeout: Duration,
    label: &str,
) -> anyhow::Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    match timeout(command_timeout, cmd.output()).await {
        Ok(result) => result.with_context(|| format!("{label} failed")),
        Err(_) => anyhow::bail!("{label} timed out after {}s", command_timeout.as_secs()),
    }
}

pub async fn run_command_stdout(
    cmd: &mut Command,
    command_timeout: Duration,
    label: &str,
) -> anyhow::Result<Vec<u8>> {
    let output = run_command_with_timeout(cmd, command_timeout, label).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{label} exited with {}: {}", output.status, stderr.trim());
    }
    Ok(output.stdout)
}

#[cfg(unix)]
pub fn apply_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn apply_process_group(_cmd: &mut Command) {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    NoSuchProcess,
}

/// Sends `signal` to the process group led by `pid`, falling back to the
/// single process when it is not a group leader.
#[cfg(unix)]
pub fn signal_process(pid: i32, signal: i32) -> io::Result<SignalOutcome> {
    if pid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        ));
    }
    if unsafe { libc::kill(-pid, signal) } == 0 {
        return Ok(SignalOutcome::Delivered);
    }
    if unsafe { libc::kill(pid, signal) } == 0 {
        return Ok(SignalOutcome::Delivered);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(SignalOutcome::NoSuchProcess)
    } else {
        Err(err)
    }
}

#[cfg(unix)]
pub fn process_exists(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_large_stdout_without_stalling() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("head -c 1048576 /dev/zero");
        let stdout = run_command_stdout(&mut cmd, Duration::from_secs(10), "head")
            .await
            .expect("output");
        assert_eq!(stdout.len(), 1_048_576);
    }

    #[tokio::test]
    async fn times_out_long_running_commands() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_command_with_timeout(&mut cmd, Duration::from_millis(100), "sleep")
            .await
            .expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo boom >&2; exit 3");
        let err = run_command_stdout(&mut cmd, Duration::from_secs(5), "fail")
            .await
            .expect_err("failure");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn signalling_a_missing_process_reports_no_such_process() {
        let outcome = signal_process(i32::MAX - 1, 0).expect("signal");
        assert_eq!(outcome, SignalOutcome::NoSuchProcess);
        assert!(!process_exists(i32::MAX - 1));
        assert!(process_exists(std::process::id() as i32));
    }
}
