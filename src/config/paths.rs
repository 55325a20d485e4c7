use std::path::PathBuf;

/// Default control directory when `VIBETUNNEL_CONTROL_DIR` is unset: `/tmp/vt-<pid>`.
pub fn default_control_dir() -> PathBuf {
    std::env::temp_dir().join(format!("vt-{}", std::process::id()))
}

/// Directory for one session: `{controlDir}/{sessionId}/`.
pub fn session_dir(control_dir: &std::path::Path, session_id: &str) -> PathBuf {
    control_dir.join(session_id)
}

/// IPC socket path: `{controlDir}/{sessionId}/ipc.sock`.
///
/// Callers must check the returned path's byte length against the platform's
/// `sockaddr_un` budget before binding; see `ensure_socket_path_fits`.
pub fn socket_path(control_dir: &std::path::Path, session_id: &str) -> PathBuf {
    session_dir(control_dir, session_id).join("ipc.sock")
}

/// Stream (append-only recording) file path: `{controlDir}/{sessionId}/stdout`.
pub fn stream_path(control_dir: &std::path::Path, session_id: &str) -> PathBuf {
    session_dir(control_dir, session_id).join("stdout")
}

/// Metadata file path: `{controlDir}/{sessionId}/meta.json`.
pub fn meta_path(control_dir: &std::path::Path, session_id: &str) -> PathBuf {
    session_dir(control_dir, session_id).join("meta.json")
}

/// Maximum byte length of a `sockaddr_un` path on Linux (104 minus the NUL).
pub const MAX_SOCKET_PATH_LEN: usize = 103;

pub fn ensure_socket_path_fits(path: &std::path::Path) -> anyhow::Result<()> {
    let len = path.as_os_str().len();
    if len > MAX_SOCKET_PATH_LEN {
        anyhow::bail!(
            "socket path {} is {} bytes, exceeds the {}-byte sockaddr_un budget",
            path.display(),
            len,
            MAX_SOCKET_PATH_LEN
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_deterministic_from_session_id() {
        let dir = PathBuf::from("/tmp/vt-1");
        assert_eq!(
            socket_path(&dir, "abc"),
            PathBuf::from("/tmp/vt-1/abc/ipc.sock")
        );
        assert_eq!(stream_path(&dir, "abc"), PathBuf::from("/tmp/vt-1/abc/stdout"));
        assert_eq!(meta_path(&dir, "abc"), PathBuf::from("/tmp/vt-1/abc/meta.json"));
    }

    #[test]
    fn rejects_overlong_socket_path() {
        let dir = PathBuf::from("/tmp").join("x".repeat(200));
        let path = socket_path(&dir, "abc");
        assert!(ensure_socket_path_fits(&path).is_err());
    }
}
