//! Session lock files: daemon discovery for CLI and editor clients.
//!
//! One file per daemon under `<state_dir>/sessions/`, mode 0600, holding
//! `{pid, socket_or_port, auth_token}`. Stale files for dead PIDs are
//! removed on daemon start.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use zeke::{ZekeError, ZekeResult};

/// Contents of one `<name>.lock`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionLock {
    pub pid: u32,
    pub socket_or_port: String,
    pub auth_token: String,
}

fn sessions_dir() -> ZekeResult<PathBuf> {
    env_config::sessions_dir()
        .map_err(|e| ZekeError::InvalidArgument(format!("sessions dir: {e}")))
}

/// Writes the lock for this daemon; `name` is the port or a UUID.
pub fn write_lock(name: &str, lock: &SessionLock) -> ZekeResult<PathBuf> {
    let dir = sessions_dir()?;
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{name}.lock"));
    let body = serde_json::to_vec_pretty(lock)
        .map_err(|e| ZekeError::InvalidResponse(format!("lock encode: {e}")))?;
    std::fs::write(&path, body)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(path)
}

pub fn remove_lock(name: &str) {
    if let Ok(dir) = sessions_dir() {
        let _ = std::fs::remove_file(dir.join(format!("{name}.lock")));
    }
}

fn pid_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        // Without procfs, assume alive; a failed connect will weed it out.
        let _ = pid;
        true
    }
}

/// Newest lock whose daemon still runs, if any.
pub fn find_live_lock() -> ZekeResult<Option<SessionLock>> {
    let dir = sessions_dir()?;
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Ok(None);
    };
    let mut locks: Vec<(std::time::SystemTime, SessionLock)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("lock") {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(lock) = serde_json::from_str::<SessionLock>(&content) else {
            continue;
        };
        if !pid_alive(lock.pid) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::UNIX_EPOCH);
        locks.push((modified, lock));
    }
    locks.sort_by_key(|(t, _)| *t);
    Ok(locks.pop().map(|(_, l)| l))
}

/// Deletes lock files whose PIDs are gone. Called at daemon start.
pub fn cleanup_dead_locks() -> ZekeResult<usize> {
    let dir = sessions_dir()?;
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Ok(0);
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("lock") {
            continue;
        }
        let dead = std::fs::read_to_string(&path)
            .ok()
            .and_then(|c| serde_json::from_str::<SessionLock>(&c).ok())
            .map(|l| !pid_alive(l.pid))
            // Unreadable lock files are garbage too.
            .unwrap_or(true);
        if dead && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_state_dir<R>(f: impl FnOnce() -> R) -> R {
        let dir = tempfile::tempdir().unwrap();
        let prev = std::env::var("ZEKE_STATE_DIR").ok();
        std::env::set_var("ZEKE_STATE_DIR", dir.path());
        let out = f();
        match prev {
            Some(v) => std::env::set_var("ZEKE_STATE_DIR", v),
            None => std::env::remove_var("ZEKE_STATE_DIR"),
        }
        out
    }

    #[test]
    fn write_and_find_live_lock() {
        with_state_dir(|| {
            let lock = SessionLock {
                pid: std::process::id(),
                socket_or_port: "127.0.0.1:7777".into(),
                auth_token: "tok".into(),
            };
            write_lock("7777", &lock).unwrap();
            let found = find_live_lock().unwrap().unwrap();
            assert_eq!(found.socket_or_port, "127.0.0.1:7777");
            assert_eq!(found.auth_token, "tok");
            remove_lock("7777");
            assert!(find_live_lock().unwrap().is_none());
        });
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dead_pid_locks_are_cleaned() {
        with_state_dir(|| {
            let dead = SessionLock {
                pid: u32::MAX - 1,
                socket_or_port: "gone".into(),
                auth_token: "t".into(),
            };
            write_lock("stale", &dead).unwrap();
            assert!(find_live_lock().unwrap().is_none());
            assert_eq!(cleanup_dead_locks().unwrap(), 1);
        });
    }

    #[cfg(unix)]
    #[test]
    fn lock_file_is_0600() {
        with_state_dir(|| {
            use std::os::unix::fs::PermissionsExt;
            let lock = SessionLock {
                pid: std::process::id(),
                socket_or_port: "s".into(),
                auth_token: "t".into(),
            };
            let path = write_lock("perm", &lock).unwrap();
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        });
    }
}
