//! Buffer broadcaster (C7, §4.7): per-session screen state plus a fan-out
//! channel of deltas/bells for subscribed WebSocket clients.
//!
//! Grounded on the broadcast-channel fan-out used for PTY output elsewhere
//! in the corpus, generalized here to broadcast terminal deltas (derived
//! from the screen model, C6) instead of raw bytes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};

use crate::terminal::screen::Screen;
use crate::terminal::snapshot_codec::{encode_delta, encode_snapshot, Delta};

const DEBOUNCE: Duration = Duration::from_millis(8);

#[derive(Debug, Clone)]
pub enum HubEvent {
    Delta(Bytes),
    Bell,
    /// Emitted once when the session exits; subscribers get this and then
    /// the channel closes (§4.7: "on session exited, emit one final
    /// SNAPSHOT then stop").
    FinalSnapshot(Bytes),
}

struct SessionChannel {
    screen: Arc<Mutex<Screen>>,
    last_rows: Arc<Mutex<Vec<String>>>,
    tx: broadcast::Sender<HubEvent>,
    notify: Arc<Notify>,
}

pub struct BufferHub {
    sessions: RwLock<HashMap<String, SessionChannel>>,
}

impl BufferHub {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates the screen model for a session and starts its delta-tick
    /// task. Returns the shared screen so the caller can feed PTY output
    /// into it directly (§4.6: the emulator consumes the stream in-memory,
    /// not by re-reading the recorder's file).
    pub async fn register(&self, session_id: &str, cols: u16, rows: u16) -> Arc<Mutex<Screen>> {
        let screen = Arc::new(Mutex::new(Screen::new(cols, rows)));
        let (tx, _) = broadcast::channel(256);
        let notify = Arc::new(Notify::new());
        let last_rows = Arc::new(Mutex::new(Vec::new()));

        let channel = SessionChannel {
            screen: screen.clone(),
            last_rows: last_rows.clone(),
            tx: tx.clone(),
            notify: notify.clone(),
        };

        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), channel);

        tokio::spawn(run_tick_loop(screen.clone(), last_rows, tx, notify));

        screen
    }

    /// Wakes the tick task for this session; call after feeding new output
    /// into its screen.
    pub async fn notify_changed(&self, session_id: &str) {
        if let Some(channel) = self.sessions.read().await.get(session_id) {
            channel.notify.notify_one();
        }
    }

    /// Subscribes a client: returns the current snapshot plus a receiver for
    /// subsequent deltas/bells. Per §4.7, the snapshot always precedes any
    /// delta the caller will see from the returned receiver.
    pub async fn subscribe(&self, session_id: &str) -> Option<(Bytes, broadcast::Receiver<HubEvent>)> {
        let sessions = self.sessions.read().await;
        let channel = sessions.get(session_id)?;
        let rx = channel.tx.subscribe();
        let screen = channel.screen.lock().await;
        let snapshot = encode_snapshot(&screen, 0, 0);
        Some((snapshot, rx))
    }

    /// Called when a session transitions to `exited`: broadcasts a final
    /// snapshot and tears down the session's channel.
    pub async fn close_session(&self, session_id: &str) {
        let channel = self.sessions.write().await.remove(session_id);
        if let Some(channel) = channel {
            let screen = channel.screen.lock().await;
            let snapshot = encode_snapshot(&screen, 0, 0);
            let _ = channel.tx.send(HubEvent::FinalSnapshot(snapshot));
        }
    }
}

impl Default for BufferHub {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_tick_loop(
    screen: Arc<Mutex<Screen>>,
    last_rows: Arc<Mutex<Vec<String>>>,
    tx: broadcast::Sender<HubEvent>,
    notify: Arc<Notify>,
) {
    loop {
        notify.notified().await;
        tokio::time::sleep(DEBOUNCE).await;

        let (bell, changed, rows, cursor) = {
            let mut screen = screen.lock().await;
            let bell = screen.take_bell();
            let changed = screen.take_changed();
            let rows = screen.rows_text();
            let cursor = screen.cursor();
            (bell, changed, rows, cursor)
        };

        if bell {
            if tx.send(HubEvent::Bell).is_err() {
                // no subscribers right now; keep running, a future
                // subscriber still wants deltas.
            }
        }

        if !changed {
            continue;
        }

        let mut previous = last_rows.lock().await;
        let changed_rows: Vec<(u32, String)> = rows
            .iter()
            .enumerate()
            .filter(|(i, row)| previous.get(*i).map(|p| p != *row).unwrap_or(true))
            .map(|(i, row)| (i as u32, row.clone()))
            .collect();
        *previous = rows;

        if changed_rows.is_empty() {
            continue;
        }

        let delta = Delta {
            cursor: Some((cursor.0 as i32, cursor.1 as i32)),
            changed_rows,
        };
        let _ = tx.send(HubEvent::Delta(encode_delta(&delta)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_returns_snapshot_before_any_delta() {
        let hub = BufferHub::new();
        let screen = hub.register("s1", 10, 3).await;
        screen.lock().await.feed(b"hi");
        hub.notify_changed("s1").await;

        let (snapshot, mut rx) = hub.subscribe("s1").await.unwrap();
        assert!(!snapshot.is_empty());

        // a delta should eventually arrive after the debounce window
        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("delta should arrive")
            .unwrap();
        assert!(matches!(event, HubEvent::Delta(_)));
    }

    #[tokio::test]
    async fn close_session_emits_final_snapshot() {
        let hub = BufferHub::new();
        hub.register("s1", 10, 3).await;
        let (_, mut rx) = hub.subscribe("s1").await.unwrap();
        hub.close_session("s1").await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, HubEvent::FinalSnapshot(_)));
    }
}
