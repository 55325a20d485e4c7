//! Session store (C2, §4.2): the on-disk layout for one session's control
//! directory, plus startup orphan reaping.

use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::config::paths;
use crate::session::SessionMeta;

#[derive(Clone)]
pub struct SessionStore {
    control_dir: PathBuf,
}

impl SessionStore {
    pub fn new(control_dir: PathBuf) -> Self {
        Self { control_dir }
    }

    pub fn control_dir(&self) -> &Path {
        &self.control_dir
    }

    /// Creates `{controlDir}/{sessionId}/` and checks the socket path fits
    /// the platform's `sockaddr_un` budget before any other session state is
    /// created (§3 socket-path hard limit).
    pub fn create_session_dir(&self, session_id: &str) -> anyhow::Result<PathBuf> {
        let dir = paths::session_dir(&self.control_dir, session_id);
        let socket = paths::socket_path(&self.control_dir, session_id);
        paths::ensure_socket_path_fits(&socket)?;
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Atomically writes `meta.json`: write to a temp file in the same
    /// directory, then rename over the target, so readers never observe a
    /// partially-written file.
    pub fn write_meta(&self, meta: &SessionMeta) -> anyhow::Result<()> {
        let dir = paths::session_dir(&self.control_dir, &meta.session_id);
        let target = dir.join("meta.json");
        let tmp = dir.join(format!("meta.json.tmp.{}", std::process::id()));
        let json = serde_json::to_vec_pretty(meta)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    pub fn read_meta(&self, session_id: &str) -> anyhow::Result<SessionMeta> {
        let path = paths::meta_path(&self.control_dir, session_id);
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Removes a session's entire control directory (§4.8 `cleanup`).
    pub fn remove_session_dir(&self, session_id: &str) -> anyhow::Result<()> {
        let dir = paths::session_dir(&self.control_dir, session_id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Scans the control directory for session directories whose recorded
    /// `pid` is no longer alive, per the startup orphan-reaping requirement
    /// in §4.2. Returns the ids of directories removed.
    pub fn reap_orphans(&self) -> anyhow::Result<Vec<String>> {
        let mut reaped = Vec::new();
        if !self.control_dir.exists() {
            return Ok(reaped);
        }
        for entry in std::fs::read_dir(&self.control_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let session_id = entry.file_name().to_string_lossy().to_string();
            let meta = match self.read_meta(&session_id) {
                Ok(meta) => meta,
                Err(_) => {
                    // Unreadable metadata means a partially-created session;
                    // treat it the same as a dead one.
                    std::fs::remove_dir_all(entry.path()).ok();
                    reaped.push(session_id);
                    continue;
                }
            };
            // Only a `running` session can be an orphan: `exited` sessions
            // are left for an explicit cleanup call (§4.8), and `starting`
            // sessions are assumed to still be mid-spawn elsewhere.
            let is_dead_orphan = match meta.status {
                crate::session::SessionStatus::Running { pid } => {
                    kill(Pid::from_raw(pid), None).is_err()
                }
                _ => false,
            };
            if is_dead_orphan {
                std::fs::remove_dir_all(entry.path()).ok();
                reaped.push(session_id);
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{GitContext, SessionStatus, WireTitleMode};

    fn sample_meta(id: &str, status: SessionStatus) -> SessionMeta {
        SessionMeta {
            session_id: id.to_string(),
            command: vec!["sh".into()],
            working_dir: "/tmp".into(),
            name: None,
            cols: 80,
            rows: 24,
            status,
            started_at: "2026-01-01T00:00:00Z".into(),
            last_modified: "2026-01-01T00:00:00Z".into(),
            title_mode: WireTitleMode::None,
            git: GitContext::default(),
        }
    }

    #[test]
    fn write_then_read_meta_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        store.create_session_dir("abc").unwrap();
        let meta = sample_meta("abc", SessionStatus::Running { pid: 123 });
        store.write_meta(&meta).unwrap();
        let back = store.read_meta("abc").unwrap();
        assert_eq!(back.session_id, "abc");
        assert_eq!(back.status, SessionStatus::Running { pid: 123 });
    }

    #[test]
    fn reap_orphans_removes_dead_session_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        store.create_session_dir("dead").unwrap();
        // pid 1 is typically alive (init); use an implausible pid instead.
        let meta = sample_meta("dead", SessionStatus::Running { pid: 999_999 });
        store.write_meta(&meta).unwrap();

        let reaped = store.reap_orphans().unwrap();
        assert_eq!(reaped, vec!["dead".to_string()]);
        assert!(!paths::session_dir(tmp.path(), "dead").exists());
    }

    #[test]
    fn reap_orphans_keeps_exited_sessions_for_explicit_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        store.create_session_dir("exited").unwrap();
        let meta = sample_meta("exited", SessionStatus::Exited { code: 0 });
        store.write_meta(&meta).unwrap();

        let reaped = store.reap_orphans().unwrap();
        assert!(reaped.is_empty());
        assert!(paths::session_dir(tmp.path(), "exited").exists());
    }
}
