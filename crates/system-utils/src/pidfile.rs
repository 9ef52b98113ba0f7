use anyhow::Context;
use std::io;
use std::path::Path;

pub fn read_pid_file(path: &Path) -> anyhow::Result<Option<i32>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };
    let pid = raw
        .trim()
        .parse::<i32>()
        .with_context(|| format!("invalid pid {:?} in {}", raw.trim(), path.display()))?;
    Ok(Some(pid))
}

pub fn write_pid_file(path: &Path, pid: u32) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, pid.to_string())
        .with_context(|| format!("failed to write {}", path.display()))
}

pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// True if `/proc/<pid>/cmdline` mentions `expected` or its file name.
pub fn pid_matches_command(pid: i32, expected: &str) -> bool {
    let Ok(raw) = std::fs::read(format!("/proc/{pid}/cmdline")) else {
        return false;
    };
    let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
    if cmdline.contains(expected) {
        return true;
    }
    Path::new(expected)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| !name.is_empty() && cmdline.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pidfile-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("scratch dir");
        dir
    }

    #[test]
    fn pid_file_roundtrip_and_removal() {
        let dir = scratch_dir();
        let path = dir.join("svc.pid");
        assert_eq!(read_pid_file(&path).expect("read"), None);
        write_pid_file(&path, 4242).expect("write");
        assert_eq!(read_pid_file(&path).expect("read"), Some(4242));
        remove_pid_file(&path).expect("remove");
        remove_pid_file(&path).expect("remove twice");
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn garbage_pid_file_is_an_error() {
        let dir = scratch_dir();
        let path = dir.join("svc.pid");
        std::fs::write(&path, "not-a-pid").expect("write");
        assert!(read_pid_file(&path).is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn own_cmdline_matches_test_binary_name() {
        let pid = std::process::id() as i32;
        let exe = std::env::current_exe().expect("exe");
        let name = exe.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(pid_matches_command(pid, name));
        assert!(!pid_matches_command(pid, "definitely-not-this-binary.py"));
    }
}
