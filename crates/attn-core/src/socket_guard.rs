//! Socket collision handling for the Unix domain command socket.
//!
//! When the daemon starts, it binds a Unix stream socket at the configured
//! path. If a stale socket file is left behind by a crashed daemon, binding
//! fails with `AddrInUse`. `guard_socket_path` checks whether the previous
//! owner (identified by an adjacent PID file) is still alive via
//! `kill(pid, 0)`; if not, the stale socket is unlinked and the bind is
//! retried once, per §7 ("socket collision / stale socket").

use std::io;
use std::path::{Path, PathBuf};

/// What `guard_socket_path` found before the caller attempts to bind.
#[derive(Debug, PartialEq, Eq)]
pub enum SocketGuardOutcome {
    /// No existing socket or pid file; safe to bind directly.
    Clear,
    /// A stale socket (and pid file, if present) was removed; safe to bind.
    StaleRemoved,
    /// Another daemon process is alive and holding the socket.
    AlreadyRunning(u32),
}

/// The pid-file path adjacent to a socket path, e.g. `attn.sock` ->
/// `attn.sock.pid`.
fn pid_path(socket_path: &Path) -> PathBuf {
    let mut name = socket_path.as_os_str().to_owned();
    name.push(".pid");
    PathBuf::from(name)
}

/// Write the current process id to the pid file next to `socket_path`.
/// Call this immediately after a successful bind.
pub fn write_pid_file(socket_path: &Path) -> io::Result<()> {
    std::fs::write(pid_path(socket_path), std::process::id().to_string())
}

/// Remove the socket file and its pid file, if present.
pub fn remove_socket(socket_path: &Path) {
    let _ = std::fs::remove_file(socket_path);
    let _ = std::fs::remove_file(pid_path(socket_path));
}

/// Inspect `socket_path` before binding: if no socket exists, or the
/// previous owner process is dead, clean up so the bind can proceed. If a
/// live process still owns the socket, report it instead of unlinking.
pub fn guard_socket_path(socket_path: &Path) -> SocketGuardOutcome {
    if !socket_path.exists() {
        return SocketGuardOutcome::Clear;
    }

    let owner_pid = std::fs::read_to_string(pid_path(socket_path))
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok());

    match owner_pid {
        Some(pid) if pid_alive(pid) => SocketGuardOutcome::AlreadyRunning(pid),
        _ => {
            tracing::info!(path = %socket_path.display(), "removing stale command socket");
            remove_socket(socket_path);
            SocketGuardOutcome::StaleRemoved
        }
    }
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_dead() {
        assert!(!pid_alive(4_000_000));
    }

    #[test]
    fn missing_socket_is_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attn.sock");
        assert_eq!(guard_socket_path(&path), SocketGuardOutcome::Clear);
    }

    #[test]
    fn stale_socket_with_dead_pid_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attn.sock");
        std::fs::write(&path, b"").unwrap();
        std::fs::write(pid_path(&path), "4000000").unwrap();

        assert_eq!(guard_socket_path(&path), SocketGuardOutcome::StaleRemoved);
        assert!(!path.exists());
    }

    #[test]
    fn socket_owned_by_live_process_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attn.sock");
        std::fs::write(&path, b"").unwrap();
        write_pid_file(&path).unwrap();

        assert_eq!(
            guard_socket_path(&path),
            SocketGuardOutcome::AlreadyRunning(std::process::id())
        );
        assert!(path.exists());
    }
}
