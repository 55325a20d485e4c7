//! IPC socket server (C5, §4.5): one Unix-domain listener per session,
//! parsing §4.1 IPC frames and routing them to the PTY supervisor via the
//! session registry.
//!
//! Grounded on the daemon's per-client `Framed<UnixStream, _>` accept loop
//! elsewhere in the corpus, generalized here to speak typed IPC frames
//! instead of length-delimited JSON blobs, and to enforce the per-session
//! connection limit and heartbeat timeout from §4.1/§5.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use nix::sys::signal::Signal;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;

use crate::error::CoreError;
use crate::ipc::codec::{IpcFrame, IpcFrameCodec};
use crate::ipc::messages::{frame_type, ControlCommand, ErrorPayload};
use crate::ipc::{DEFAULT_CONNECTION_LIMIT, DEFAULT_MAX_FRAME_LEN, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_MISSED_LIMIT};
use crate::pty::supervisor::SupervisorStatus;
use crate::session::registry::SessionRegistry;

type ClientFramed = Framed<UnixStream, IpcFrameCodec>;

/// Spawns the accept loop for one session's `ipc.sock`. Stops accepting new
/// clients and lets existing ones observe the exit once the session's
/// supervisor reports `Exited`.
pub fn spawn_listener(
    session_id: String,
    socket_path: PathBuf,
    registry: Arc<SessionRegistry>,
    status_rx: watch::Receiver<SupervisorStatus>,
) {
    tokio::spawn(async move {
        if let Err(e) = run_listener(&session_id, &socket_path, registry, status_rx).await {
            tracing::error!(session = %session_id, error = %e, "IPC listener error");
        }
    });
}

async fn run_listener(
    session_id: &str,
    socket_path: &Path,
    registry: Arc<SessionRegistry>,
    mut status_rx: watch::Receiver<SupervisorStatus>,
) -> anyhow::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o666))?;

    tracing::info!(session = %session_id, socket = %socket_path.display(), "IPC listener bound");

    let client_count = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                if client_count.load(Ordering::SeqCst) >= DEFAULT_CONNECTION_LIMIT {
                    tokio::spawn(reject_over_limit(stream));
                    continue;
                }
                client_count.fetch_add(1, Ordering::SeqCst);
                let registry = registry.clone();
                let session_id = session_id.to_string();
                let client_count = client_count.clone();
                let exit_rx = status_rx.clone();
                tokio::spawn(async move {
                    handle_client(stream, session_id, registry, exit_rx).await;
                    client_count.fetch_sub(1, Ordering::SeqCst);
                });
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if matches!(*status_rx.borrow(), SupervisorStatus::Exited { .. }) {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// A connection opened while the session was already saturated: tell it why
/// and close, per §4.5's `CONNECTION_LIMIT` error.
async fn reject_over_limit(stream: UnixStream) {
    let mut framed = Framed::new(stream, IpcFrameCodec::new(DEFAULT_MAX_FRAME_LEN));
    send_error(&mut framed, CoreError::ConnectionLimit).await;
}

async fn handle_client(
    stream: UnixStream,
    session_id: String,
    registry: Arc<SessionRegistry>,
    mut exit_rx: watch::Receiver<SupervisorStatus>,
) {
    // The IPC socket is local-only and access-controlled by directory
    // permissions (§1 non-goals); still refuse a different-uid peer when we
    // can tell.
    if let Ok(cred) = stream.peer_cred() {
        if cred.uid() != nix::unistd::getuid().as_raw() {
            tracing::warn!(session = %session_id, peer_uid = cred.uid(), "rejecting IPC client from a different uid");
            return;
        }
    }

    let mut framed = Framed::new(stream, IpcFrameCodec::new(DEFAULT_MAX_FRAME_LEN));
    let heartbeat_timeout = Duration::from_secs(HEARTBEAT_INTERVAL_SECS * HEARTBEAT_MISSED_LIMIT as u64);

    loop {
        tokio::select! {
            frame = tokio::time::timeout(heartbeat_timeout, framed.next()) => {
                let Ok(frame) = frame else {
                    tracing::debug!(session = %session_id, "IPC client missed its heartbeat window");
                    break;
                };
                match frame {
                    Some(Ok(frame)) => {
                        if !dispatch_frame(&mut framed, &session_id, &registry, frame).await {
                            break;
                        }
                    }
                    Some(Err(e @ CoreError::PayloadTooLarge)) => {
                        send_error(&mut framed, e).await;
                        break;
                    }
                    Some(Err(_)) | None => break,
                }
            }
            changed = exit_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if matches!(*exit_rx.borrow(), SupervisorStatus::Exited { .. }) {
                    // Graceful EOF: dropping `framed` closes the stream.
                    break;
                }
            }
        }
    }
}

/// Dispatches one decoded frame; returns `false` when the connection should
/// close (§4.5: only `PAYLOAD_TOO_LARGE` closes, everything else continues).
async fn dispatch_frame(
    framed: &mut ClientFramed,
    session_id: &str,
    registry: &SessionRegistry,
    frame: IpcFrame,
) -> bool {
    match frame.frame_type {
        frame_type::STDIN_DATA => {
            if let Err(e) = registry.write_stdin(session_id, &frame.payload).await {
                send_error(framed, e).await;
            }
        }
        frame_type::CONTROL_CMD => {
            dispatch_control_cmd(framed, session_id, registry, &frame.payload).await;
        }
        frame_type::HEARTBEAT => {
            let _ = framed.send(IpcFrame::new(frame_type::HEARTBEAT, Bytes::new())).await;
        }
        frame_type::STATUS_UPDATE => {
            // Reserved; the server only ever receives, never sends (§4.1).
        }
        _ => {
            send_error(framed, CoreError::InvalidMessageType).await;
        }
    }
    true
}

async fn dispatch_control_cmd(
    framed: &mut ClientFramed,
    session_id: &str,
    registry: &SessionRegistry,
    payload: &[u8],
) {
    let cmd: ControlCommand = match serde_json::from_slice(payload) {
        Ok(cmd) => cmd,
        Err(e) => {
            send_error(framed, CoreError::MessageProcessingError(e.to_string())).await;
            return;
        }
    };

    let result = match cmd {
        ControlCommand::Resize { cols, rows } => registry.resize(session_id, cols, rows).await,
        ControlCommand::ResetSize => registry.reset_size(session_id).await,
        ControlCommand::Kill { signal } => match parse_signal(&signal) {
            Some(sig) => registry.kill(session_id, sig).await,
            None => Err(CoreError::InvalidOperation),
        },
    };

    if let Err(e) = result {
        send_error(framed, e).await;
    }
}

async fn send_error(framed: &mut ClientFramed, err: CoreError) {
    let payload = ErrorPayload::from_error(&err);
    if let Ok(json) = serde_json::to_vec(&payload) {
        let _ = framed.send(IpcFrame::new(frame_type::ERROR, Bytes::from(json))).await;
    }
}

/// Accepts POSIX signal names only (§9 open question); anything else is
/// `INVALID_OPERATION`.
fn parse_signal(name: &str) -> Option<Signal> {
    match name {
        "SIGTERM" => Some(Signal::SIGTERM),
        "SIGKILL" => Some(Signal::SIGKILL),
        "SIGINT" => Some(Signal::SIGINT),
        "SIGHUP" => Some(Signal::SIGHUP),
        "SIGQUIT" => Some(Signal::SIGQUIT),
        "SIGUSR1" => Some(Signal::SIGUSR1),
        "SIGUSR2" => Some(Signal::SIGUSR2),
        "SIGSTOP" => Some(Signal::SIGSTOP),
        "SIGCONT" => Some(Signal::SIGCONT),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_signal_accepts_known_posix_names() {
        assert_eq!(parse_signal("SIGTERM"), Some(Signal::SIGTERM));
        assert_eq!(parse_signal("SIGKILL"), Some(Signal::SIGKILL));
    }

    #[test]
    fn parse_signal_rejects_unknown_names() {
        assert_eq!(parse_signal("SIGBOGUS"), None);
        assert_eq!(parse_signal("9"), None);
    }
}
