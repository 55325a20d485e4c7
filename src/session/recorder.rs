//! Stream recorder (C4, §4.4): appends timestamped events to a session's
//! `stdout` file in the canonical recording format described in §3.
//!
//! Grounded on the asciinema-style `[time, kind, payload]` event stream used
//! by the reference `tty_spawn` port in the retrieval pack, which is itself
//! a faithful re-implementation of this exact on-disk format.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

use crate::session::time::now_rfc3339;

const IDLE_FLUSH: Duration = Duration::from_millis(100);
const SIZE_FLUSH_THRESHOLD: usize = 8 * 1024;

#[derive(Debug, Serialize)]
struct StreamHeader {
    version: u32,
    width: u16,
    height: u16,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

enum RecorderMsg {
    Output(Vec<u8>),
    Resize(u16, u16),
    Exit(i32),
}

/// Handle to the recorder's background writer task. Cloning shares the same
/// underlying channel; the writer task itself owns the single file handle.
#[derive(Clone)]
pub struct StreamRecorder {
    tx: mpsc::UnboundedSender<RecorderMsg>,
}

impl StreamRecorder {
    pub async fn open(
        path: &std::path::Path,
        cols: u16,
        rows: u16,
        title: Option<String>,
    ) -> anyhow::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let mut writer = BufWriter::new(file);

        let header = StreamHeader {
            version: 1,
            width: cols,
            height: rows,
            timestamp: now_rfc3339(),
            title,
        };
        let mut line = serde_json::to_vec(&header)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(writer, rx));

        Ok(Self { tx })
    }

    pub fn record_output(&self, chunk: &[u8]) {
        let _ = self.tx.send(RecorderMsg::Output(chunk.to_vec()));
    }

    pub fn record_resize(&self, cols: u16, rows: u16) {
        let _ = self.tx.send(RecorderMsg::Resize(cols, rows));
    }

    pub fn record_exit(&self, code: i32) {
        let _ = self.tx.send(RecorderMsg::Exit(code));
    }
}

async fn run_writer(
    mut writer: BufWriter<tokio::fs::File>,
    mut rx: mpsc::UnboundedReceiver<RecorderMsg>,
) {
    let start = Instant::now();
    let mut unflushed = 0usize;
    let mut idle = tokio::time::interval(IDLE_FLUSH);
    idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let mut ends_session = false;
                let line = match msg {
                    RecorderMsg::Output(bytes) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        encode_event(start.elapsed(), "o", &text)
                    }
                    RecorderMsg::Resize(cols, rows) => {
                        encode_event(start.elapsed(), "r", &format!("{cols}x{rows}"))
                    }
                    RecorderMsg::Exit(code) => {
                        ends_session = true;
                        encode_event(start.elapsed(), "x", &code.to_string())
                    }
                };
                let has_newline = line.ends_with(b"\n");
                unflushed += line.len();
                if writer.write_all(&line).await.is_err() {
                    break;
                }
                if ends_session || has_newline || unflushed >= SIZE_FLUSH_THRESHOLD {
                    let _ = writer.flush().await;
                    unflushed = 0;
                }
                if ends_session {
                    break;
                }
            }
            _ = idle.tick() => {
                if unflushed > 0 {
                    let _ = writer.flush().await;
                    unflushed = 0;
                }
            }
        }
    }
    let _ = writer.flush().await;
}

fn encode_event(elapsed: Duration, kind: &str, payload: &str) -> Vec<u8> {
    let seconds = elapsed.as_secs_f64();
    let value = serde_json::json!([seconds, kind, payload]);
    let mut line = serde_json::to_vec(&value).expect("event encodes to JSON");
    line.push(b'\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_header_then_events_and_flushes_on_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stdout");
        let recorder = StreamRecorder::open(&path, 80, 24, None).await.unwrap();
        recorder.record_output(b"hello\n");
        recorder.record_resize(120, 40);
        recorder.record_exit(0);

        // give the writer task a moment to drain and exit
        tokio::time::sleep(Duration::from_millis(50)).await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let mut lines = contents.lines();
        let header: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(header["width"], 80);

        let output_line: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(output_line[1], "o");
        assert_eq!(output_line[2], "hello\n");

        let resize_line: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(resize_line[2], "120x40");

        let exit_line: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(exit_line[2], "0");
    }

}
