//! Shared scaffolding for the end-to-end tests: a registry backed by a
//! throwaway control directory, plus a retrying IPC-socket connector (the
//! listener binds in a spawned task, so it isn't guaranteed ready the
//! instant `create` returns).

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixStream;

use vtd::broadcast::hub::BufferHub;
use vtd::session::registry::{CreateSessionRequest, SessionRegistry};
use vtd::session::store::SessionStore;
use vtd::session::WireTitleMode;

pub struct TestHarness {
    pub registry: Arc<SessionRegistry>,
    pub control_dir: std::path::PathBuf,
    _tmp: tempfile::TempDir,
}

pub fn harness() -> TestHarness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let control_dir = tmp.path().to_path_buf();
    let store = SessionStore::new(control_dir.clone());
    let hub = Arc::new(BufferHub::new());
    let registry = Arc::new(SessionRegistry::new(store, hub));
    TestHarness {
        registry,
        control_dir,
        _tmp: tmp,
    }
}

pub fn request(command: &[&str]) -> CreateSessionRequest {
    CreateSessionRequest {
        command: command.iter().map(|s| s.to_string()).collect(),
        working_dir: "/tmp".to_string(),
        name: None,
        cols: Some(80),
        rows: Some(24),
        title_mode: WireTitleMode::None,
    }
}

/// Connects to a just-created session's IPC socket, retrying briefly while
/// the listener's accept loop is still spinning up.
pub async fn connect_ipc(control_dir: &std::path::Path, session_id: &str) -> UnixStream {
    let path = vtd::config::paths::socket_path(control_dir, session_id);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match UnixStream::connect(&path).await {
            Ok(stream) => return stream,
            Err(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => panic!("failed to connect to {}: {e}", path.display()),
        }
    }
}

/// Reads the session's recorded stream file and returns the decoded
/// `[time, kind, payload]` events after the header line.
pub async fn read_stream_events(control_dir: &std::path::Path, session_id: &str) -> Vec<serde_json::Value> {
    let path = vtd::config::paths::stream_path(control_dir, session_id);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    contents
        .lines()
        .skip(1)
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Polls `read_stream_events` until `predicate` matches one event or the
/// timeout elapses.
pub async fn wait_for_event(
    control_dir: &std::path::Path,
    session_id: &str,
    timeout: Duration,
    predicate: impl Fn(&serde_json::Value) -> bool,
) -> Option<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let events = read_stream_events(control_dir, session_id).await;
        if let Some(found) = events.into_iter().find(|e| predicate(e)) {
            return Some(found);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
