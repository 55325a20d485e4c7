//! WebSocket buffer-broadcast endpoint (§4.7, §6): clients subscribe to
//! sessions and receive snapshot/delta/bell buffer frames; §4.1 framing
//! only, no text frames after the handshake.
//!
//! Grounded on `web/websocket.rs`'s split-socket `tokio::select!` bridge,
//! generalized from single-session raw PTY bytes to multi-session typed
//! buffer frames, with a bounded per-client queue standing in for the
//! teacher's unbounded broadcast fan-out so §4.7's backpressure requirement
//! actually bites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};

use super::AppState;
use crate::broadcast::hub::HubEvent;
use crate::broadcast::{HIGH_WATER_MARK, PING_INTERVAL_SECS, PING_MISSED_LIMIT};
use crate::ipc::buffer_codec::{buffer_type, BufferFrame, BufferFrameCodec};
use crate::session::registry::SessionRegistry;

const PING_INTERVAL: Duration = Duration::from_secs(PING_INTERVAL_SECS);
const MISSED_PONG_LIMIT: u32 = PING_MISSED_LIMIT;
const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_INTERNAL: u16 = 1011;

pub fn ws_routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

/// Auth happens post-upgrade (§6): a bad token closes with 1008 and no data,
/// which is only expressible as a WebSocket close frame, not an HTTP status.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    let authorized = token.as_deref().map(|t| state.auth.verify(t)).unwrap_or(false);
    if !authorized {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "".into(),
            })))
            .await;
        return;
    }

    let (ws_sink, ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel::<Bytes>(HIGH_WATER_MARK);
    let missed_pongs = Arc::new(AtomicU32::new(0));

    let writer = tokio::spawn(run_writer(ws_sink, rx, missed_pongs.clone()));
    run_reader(ws_stream, tx, state, missed_pongs).await;
    writer.abort();
}

async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
    missed_pongs: Arc<AtomicU32>,
) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(bytes) => {
                        if sink.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                let missed = missed_pongs.fetch_add(1, Ordering::SeqCst) + 1;
                if missed >= MISSED_PONG_LIMIT {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_INTERNAL,
                            reason: "ping timeout".into(),
                        })))
                        .await;
                    break;
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_reader(
    mut stream: SplitStream<WebSocket>,
    tx: mpsc::Sender<Bytes>,
    state: Arc<AppState>,
    missed_pongs: Arc<AtomicU32>,
) {
    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();
    let mut codec = BufferFrameCodec::default();
    let mut buf = BytesMut::new();

    while let Some(msg) = stream.next().await {
        let Ok(msg) = msg else { break };
        match msg {
            Message::Binary(data) => {
                buf.extend_from_slice(&data);
                loop {
                    match codec.decode(&mut buf) {
                        Ok(Some(frame)) => {
                            handle_inbound_frame(frame, &tx, &state, &mut subscriptions).await
                        }
                        Ok(None) => break,
                        Err(_) => {
                            buf.clear();
                            break;
                        }
                    }
                }
            }
            Message::Pong(_) => missed_pongs.store(0, Ordering::SeqCst),
            Message::Close(_) => break,
            _ => {}
        }
    }

    for (_, handle) in subscriptions {
        handle.abort();
    }
}

async fn handle_inbound_frame(
    frame: BufferFrame,
    tx: &mpsc::Sender<Bytes>,
    state: &Arc<AppState>,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
) {
    match frame.frame_type {
        buffer_type::SUBSCRIBE => {
            if subscriptions.contains_key(&frame.session_id) {
                return;
            }
            if let Some((snapshot, rx)) = state.registry.hub().subscribe(&frame.session_id).await {
                let handle = tokio::spawn(forward_session_events(
                    frame.session_id.clone(),
                    snapshot,
                    rx,
                    tx.clone(),
                    state.registry.clone(),
                ));
                subscriptions.insert(frame.session_id, handle);
            }
        }
        buffer_type::UNSUBSCRIBE => {
            if let Some(handle) = subscriptions.remove(&frame.session_id) {
                handle.abort();
            }
        }
        _ => {}
    }
}

enum SendOutcome {
    Sent,
    Dropped,
    Closed,
}

async fn send_blocking(
    tx: &mpsc::Sender<Bytes>,
    codec: &mut BufferFrameCodec,
    frame_type: u8,
    session_id: &str,
    payload: Bytes,
) -> bool {
    let mut out = BytesMut::new();
    if codec.encode(BufferFrame::new(frame_type, session_id, payload), &mut out).is_err() {
        return false;
    }
    tx.send(out.freeze()).await.is_ok()
}

fn send_or_coalesce(
    tx: &mpsc::Sender<Bytes>,
    codec: &mut BufferFrameCodec,
    frame_type: u8,
    session_id: &str,
    payload: Bytes,
) -> SendOutcome {
    let mut out = BytesMut::new();
    if codec.encode(BufferFrame::new(frame_type, session_id, payload), &mut out).is_err() {
        return SendOutcome::Dropped;
    }
    match tx.try_send(out.freeze()) {
        Ok(()) => SendOutcome::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Dropped,
        Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
    }
}

/// Per-subscription forwarder: pushes SNAPSHOT once, then DELTA/BELL as the
/// session changes. When the client's queue is saturated, queued deltas are
/// dropped and the next available slot instead carries a fresh coalesced
/// SNAPSHOT (§4.7) rather than a delta the client may have already missed
/// context for.
async fn forward_session_events(
    session_id: String,
    initial_snapshot: Bytes,
    mut rx: broadcast::Receiver<HubEvent>,
    tx: mpsc::Sender<Bytes>,
    registry: Arc<SessionRegistry>,
) {
    let mut codec = BufferFrameCodec::default();
    if !send_blocking(&tx, &mut codec, buffer_type::SNAPSHOT, &session_id, initial_snapshot).await {
        return;
    }

    let mut needs_resync = false;

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => {
                needs_resync = true;
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if needs_resync {
            let Some((snapshot, _)) = registry.hub().subscribe(&session_id).await else {
                break;
            };
            needs_resync = !send_blocking(&tx, &mut codec, buffer_type::SNAPSHOT, &session_id, snapshot).await;
            continue;
        }

        let is_final = matches!(event, HubEvent::FinalSnapshot(_));
        let (frame_type, payload) = match event {
            HubEvent::Delta(bytes) => (buffer_type::DELTA, bytes),
            HubEvent::Bell => (buffer_type::BELL, Bytes::new()),
            HubEvent::FinalSnapshot(bytes) => (buffer_type::SNAPSHOT, bytes),
        };

        match send_or_coalesce(&tx, &mut codec, frame_type, &session_id, payload) {
            SendOutcome::Sent => {}
            SendOutcome::Dropped => needs_resync = true,
            SendOutcome::Closed => break,
        }

        if is_final {
            break;
        }
    }
}
