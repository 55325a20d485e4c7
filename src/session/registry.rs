//! Session registry (C8, §4.8): the process-wide catalog of live sessions.
//! Grounded on `SessionManager`'s `RwLock<HashMap<...>>` + broadcast-channel
//! ownership pattern elsewhere in the corpus, generalized to this spec's
//! plain (non-sandboxed) session shape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::sync::{Mutex, RwLock};

use crate::broadcast::hub::BufferHub;
use crate::error::CoreError;
use crate::pty::supervisor::{PtySupervisor, SupervisorStatus, TitleMode};
use crate::session::store::SessionStore;
use crate::session::{GitContext, SessionMeta, SessionStatus, WireTitleMode};

pub const SCROLLBACK_MAX: usize = 256 * 1024;
pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 30;

pub struct CreateSessionRequest {
    pub command: Vec<String>,
    pub working_dir: String,
    pub name: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub title_mode: WireTitleMode,
}

pub struct LiveSession {
    pub id: String,
    pub supervisor: Arc<PtySupervisor>,
    pub recorder: crate::session::recorder::StreamRecorder,
    pub scrollback: Arc<Mutex<Vec<u8>>>,
    pub local_clients: AtomicUsize,
    pub web_clients: AtomicUsize,
    meta: Mutex<SessionMeta>,
}

impl LiveSession {
    pub async fn snapshot_meta(&self) -> SessionMeta {
        self.meta.lock().await.clone()
    }
}

pub struct SessionRegistry {
    store: SessionStore,
    hub: Arc<BufferHub>,
    sessions: RwLock<HashMap<String, Arc<LiveSession>>>,
}

impl SessionRegistry {
    pub fn new(store: SessionStore, hub: Arc<BufferHub>) -> Self {
        Self {
            store,
            hub,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &Arc<BufferHub> {
        &self.hub
    }

    /// Scans the control directory for dead sessions at startup and removes
    /// them, per §4.2/§5 ("on next start, the registry scans control dirs").
    pub fn reap_orphans_at_startup(&self) -> anyhow::Result<Vec<String>> {
        self.store.reap_orphans()
    }

    /// `create` (§4.8): allocates the control dir, starts the supervisor,
    /// recorder, screen, and IPC listener; tears everything down if any step
    /// fails. Takes `Arc<Self>` because the spawned IPC listener dispatches
    /// control commands back through the registry.
    pub async fn create(self: &Arc<Self>, req: CreateSessionRequest) -> anyhow::Result<String> {
        if req.command.is_empty() {
            anyhow::bail!("command must be a non-empty argv");
        }
        if !std::path::Path::new(&req.working_dir).exists() {
            anyhow::bail!("workingDir does not exist: {}", req.working_dir);
        }

        let cols = req.cols.unwrap_or(DEFAULT_COLS);
        let rows = req.rows.unwrap_or(DEFAULT_ROWS);
        let session_id = uuid::Uuid::new_v4().to_string();

        let dir = match self.store.create_session_dir(&session_id) {
            Ok(dir) => dir,
            Err(e) => return Err(e),
        };

        let title_mode: TitleMode = req.title_mode.into();

        let spawn_result = PtySupervisor::spawn(
            &req.command,
            std::path::Path::new(&req.working_dir),
            cols,
            rows,
            &session_id,
            title_mode,
            req.name.as_deref(),
        );

        let (supervisor, mut status_rx) = match spawn_result {
            Ok(pair) => pair,
            Err(e) => {
                self.store.remove_session_dir(&session_id).ok();
                return Err(e);
            }
        };

        let stream_path = crate::config::paths::stream_path(self.store.control_dir(), &session_id);
        let title = if title_mode == TitleMode::Static {
            Some(crate::pty::resolve::generate_title(
                &req.working_dir,
                &req.command,
                req.name.as_deref(),
            ))
        } else {
            None
        };

        let recorder = match crate::session::recorder::StreamRecorder::open(&stream_path, cols, rows, title).await {
            Ok(r) => r,
            Err(e) => {
                self.store.remove_session_dir(&session_id).ok();
                return Err(e);
            }
        };

        let screen = self.hub.register(&session_id, cols, rows).await;

        let now = now_rfc3339();
        let meta = SessionMeta {
            session_id: session_id.clone(),
            command: req.command.clone(),
            working_dir: req.working_dir.clone(),
            name: req.name.clone(),
            cols,
            rows,
            status: SessionStatus::Running { pid: supervisor.pid() },
            started_at: now.clone(),
            last_modified: now,
            title_mode: req.title_mode,
            git: GitContext::default(),
        };
        self.store.write_meta(&meta)?;

        let supervisor = Arc::new(supervisor);
        let live = Arc::new(LiveSession {
            id: session_id.clone(),
            supervisor: supervisor.clone(),
            recorder: recorder.clone(),
            scrollback: Arc::new(Mutex::new(Vec::new())),
            local_clients: AtomicUsize::new(0),
            web_clients: AtomicUsize::new(0),
            meta: Mutex::new(meta),
        });

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), live.clone());

        let ipc_status_rx = status_rx.clone();
        let socket_path = crate::config::paths::socket_path(self.store.control_dir(), &session_id);
        crate::ipc_server::spawn_listener(session_id.clone(), socket_path, self.clone(), ipc_status_rx);

        spawn_output_pump(live.clone(), screen, self.hub.clone());
        spawn_exit_watcher(live.clone(), self.hub.clone(), self.store.clone(), status_rx);

        Ok(session_id)
    }

    pub async fn list(&self) -> Vec<SessionMeta> {
        let sessions = self.sessions.read().await;
        let mut metas = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            metas.push(session.snapshot_meta().await);
        }
        metas.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        metas
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<LiveSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), CoreError> {
        let session = self.get(session_id).await.ok_or(CoreError::SessionNotFound)?;
        if cols == 0 || rows == 0 {
            return Err(CoreError::InvalidOperation);
        }
        if matches!(session.supervisor.exit_code(), Some(_)) {
            return Err(CoreError::InvalidOperation);
        }
        session.supervisor.resize(cols, rows)?;
        session.recorder.record_resize(cols, rows);
        let mut meta = session.meta.lock().await;
        meta.cols = cols;
        meta.rows = rows;
        meta.last_modified = now_rfc3339();
        let _ = self.store.write_meta(&meta);
        Ok(())
    }

    pub async fn reset_size(&self, session_id: &str) -> Result<(), CoreError> {
        let session = self.get(session_id).await.ok_or(CoreError::SessionNotFound)?;
        session.supervisor.reset_size()
    }

    pub async fn write_stdin(&self, session_id: &str, bytes: &[u8]) -> Result<(), CoreError> {
        let session = self.get(session_id).await.ok_or(CoreError::SessionNotFound)?;
        if session.supervisor.exit_code().is_some() {
            return Err(CoreError::InvalidOperation);
        }
        session.supervisor.write_stdin(bytes)
    }

    /// `kill` (§4.8): a no-op success when the session is already exited.
    pub async fn kill(&self, session_id: &str, signal: Signal) -> Result<(), CoreError> {
        let session = self.get(session_id).await.ok_or(CoreError::SessionNotFound)?;
        session.supervisor.kill(signal).await
    }

    /// `cleanup` (§4.8): only valid when the session has exited.
    pub async fn cleanup(&self, session_id: &str) -> Result<(), CoreError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(session_id)
        };
        let Some(session) = session else {
            return Err(CoreError::SessionNotFound);
        };
        if session.supervisor.exit_code().is_none() {
            // put it back; cleanup is invalid while still running.
            self.sessions
                .write()
                .await
                .insert(session_id.to_string(), session);
            return Err(CoreError::InvalidOperation);
        }
        self.store
            .remove_session_dir(session_id)
            .map_err(|e| CoreError::ControlMessageFailed(e.to_string()))
    }

}

/// Feeds PTY output into the screen, the recorder, and the bounded
/// scrollback buffer (§3: scrollback capped, here at `SCROLLBACK_MAX`).
fn spawn_output_pump(
    session: Arc<LiveSession>,
    screen: Arc<Mutex<crate::terminal::screen::Screen>>,
    hub: Arc<BufferHub>,
) {
    let mut rx = session.supervisor.subscribe_output();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(chunk) => {
                    session.recorder.record_output(&chunk);
                    {
                        let mut scrollback = session.scrollback.lock().await;
                        scrollback.extend_from_slice(&chunk);
                        if scrollback.len() > SCROLLBACK_MAX {
                            let overflow = scrollback.len() - SCROLLBACK_MAX;
                            scrollback.drain(0..overflow);
                        }
                    }
                    screen.lock().await.feed(&chunk);
                    hub.notify_changed(&session.id).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Watches the supervisor's status channel; on exit, records the `x` event,
/// updates `meta.json`, and tells the hub to emit a final snapshot (§4.7).
fn spawn_exit_watcher(
    session: Arc<LiveSession>,
    hub: Arc<BufferHub>,
    store: SessionStore,
    mut status_rx: tokio::sync::watch::Receiver<SupervisorStatus>,
) {
    tokio::spawn(async move {
        loop {
            if status_rx.changed().await.is_err() {
                break;
            }
            if let SupervisorStatus::Exited { code } = *status_rx.borrow() {
                session.recorder.record_exit(code);
                {
                    let mut meta = session.meta.lock().await;
                    meta.status = SessionStatus::Exited { code };
                    meta.last_modified = now_rfc3339();
                    let _ = store.write_meta(&meta);
                }
                hub.close_session(&session.id).await;
                break;
            }
        }
    });
}

fn now_rfc3339() -> String {
    crate::session::time::now_rfc3339()
}
