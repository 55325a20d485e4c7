//! `fwd`: the reference CLI (§6), connecting to an existing session's IPC
//! socket and proxying the caller's tty to STDIN_DATA / CONTROL_CMD frames,
//! with output tailed from the session's stream file (§4.4) — the IPC
//! protocol itself carries no server-to-client PTY output frame (§4.1).
//!
//! Grounded on `daemon/client.rs`'s `enter_stream_mode`/`run_stream_bridge`
//! (raw-mode terminal, SIGWINCH forwarding, bidirectional select! bridge),
//! adapted from the teacher's tagged, bidirectional `StreamFrame` to this
//! spec's input-only IPC frames plus a tailed recording file for output.

use std::process::ExitCode;

use bytes::Bytes;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use vtd::config::paths;
use vtd::ipc::codec::{IpcFrame, IpcFrameCodec};
use vtd::ipc::messages::{frame_type, ControlCommand, ErrorPayload};

const EXIT_OK: u8 = 0;
const EXIT_ARGS: u8 = 1;
const EXIT_SESSION_NOT_FOUND: u8 = 2;
const EXIT_PROTOCOL: u8 = 64;

const TAIL_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "fwd", about = "Attach a local tty to a running session")]
struct Args {
    /// Session id to attach to.
    session_id: String,

    /// Control directory the server was started with.
    #[arg(long)]
    control_dir: Option<std::path::PathBuf>,
}

enum Error {
    SessionNotFound,
    Protocol(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_ARGS);
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(Error::SessionNotFound) => {
            eprintln!("fwd: session not found");
            ExitCode::from(EXIT_SESSION_NOT_FOUND)
        }
        Err(Error::Protocol(msg)) => {
            eprintln!("fwd: protocol error: {msg}");
            ExitCode::from(EXIT_PROTOCOL)
        }
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let control_dir = args
        .control_dir
        .or_else(|| std::env::var("VIBETUNNEL_CONTROL_DIR").ok().map(Into::into))
        .unwrap_or_else(paths::default_control_dir);

    let socket_path = paths::socket_path(&control_dir, &args.session_id);
    let stream_path = paths::stream_path(&control_dir, &args.session_id);

    let stream = UnixStream::connect(&socket_path)
        .await
        .map_err(|_| Error::SessionNotFound)?;
    let framed = Framed::new(stream, IpcFrameCodec::default());

    enter_stream_mode(framed, stream_path).await
}

/// Raw mode on, bidirectional bridge, original termios restored on any exit
/// path (including a panic unwind past this point would skip restoration,
/// matching the teacher's own best-effort behavior here).
async fn enter_stream_mode(
    framed: Framed<UnixStream, IpcFrameCodec>,
    stream_path: std::path::PathBuf,
) -> Result<(), Error> {
    let stdin_handle = std::io::stdin();
    let orig_termios = nix::sys::termios::tcgetattr(&stdin_handle).ok();

    if let Some(orig) = &orig_termios {
        let mut raw = orig.clone();
        nix::sys::termios::cfmakeraw(&mut raw);
        let _ = nix::sys::termios::tcsetattr(&stdin_handle, nix::sys::termios::SetArg::TCSANOW, &raw);
    }

    let tail_task = tokio::spawn(tail_stream_file(stream_path));
    let (mut sink, mut stream) = framed.split();
    let result = run_bridge(&mut sink, &mut stream).await;
    tail_task.abort();

    if let Some(orig) = &orig_termios {
        let _ = nix::sys::termios::tcsetattr(&stdin_handle, nix::sys::termios::SetArg::TCSANOW, orig);
    }

    result
}

/// Tails the session's stream file (§4.4), writing `"o"` event payloads to
/// local stdout as they're appended; stops at an `"x"` (exit) event.
async fn tail_stream_file(path: std::path::PathBuf) {
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(_) => return,
    };
    let mut stdout = tokio::io::stdout();
    let mut pending = Vec::new();
    let mut skipped_header = false;

    loop {
        let mut chunk = [0u8; 4096];
        match file.read(&mut chunk).await {
            Ok(0) => {
                tokio::time::sleep(TAIL_POLL_INTERVAL).await;
                let pos = file.stream_position().await.unwrap_or(0);
                let _ = file.seek(std::io::SeekFrom::Start(pos)).await;
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                while let Some(newline_at) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=newline_at).collect();
                    if !skipped_header {
                        skipped_header = true;
                        continue;
                    }
                    if apply_event_line(&mut stdout, &line).await {
                        return;
                    }
                }
            }
            Err(_) => return,
        }
    }
}

/// Returns `true` once an exit event has been observed.
async fn apply_event_line(stdout: &mut tokio::io::Stdout, line: &[u8]) -> bool {
    let Ok(value) = serde_json::from_slice::<Value>(line) else {
        return false;
    };
    let Some(kind) = value.get(1).and_then(Value::as_str) else {
        return false;
    };
    match kind {
        "o" => {
            if let Some(text) = value.get(2).and_then(Value::as_str) {
                let _ = stdout.write_all(text.as_bytes()).await;
                let _ = stdout.flush().await;
            }
            false
        }
        "x" => {
            let code = value.get(2).and_then(Value::as_str).unwrap_or("?");
            let msg = format!("\r\n\x1b[2m[process exited (code {code})]\x1b[0m\r\n");
            let _ = stdout.write_all(msg.as_bytes()).await;
            let _ = stdout.flush().await;
            true
        }
        _ => false,
    }
}

async fn run_bridge(
    sink: &mut futures_util::stream::SplitSink<Framed<UnixStream, IpcFrameCodec>, IpcFrame>,
    stream: &mut futures_util::stream::SplitStream<Framed<UnixStream, IpcFrameCodec>>,
) -> Result<(), Error> {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 4096];

    let mut sigwinch = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
        .map_err(|e| Error::Protocol(e.to_string()))?;
    let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(10));

    loop {
        tokio::select! {
            n = stdin.read(&mut buf) => {
                let n = n.map_err(|e| Error::Protocol(e.to_string()))?;
                if n == 0 {
                    break;
                }
                let frame = IpcFrame::new(frame_type::STDIN_DATA, Bytes::copy_from_slice(&buf[..n]));
                sink.send(frame).await.map_err(|e| Error::Protocol(e.to_string()))?;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(frame)) => handle_server_frame(frame),
                    Some(Err(e)) => return Err(Error::Protocol(e.to_string())),
                    None => break,
                }
            }

            _ = sigwinch.recv() => {
                let (cols, rows) = terminal_size();
                let cmd = ControlCommand::Resize { cols, rows };
                if let Ok(payload) = serde_json::to_vec(&cmd) {
                    let _ = sink.send(IpcFrame::new(frame_type::CONTROL_CMD, Bytes::from(payload))).await;
                }
            }

            _ = heartbeat.tick() => {
                let _ = sink.send(IpcFrame::new(frame_type::HEARTBEAT, Bytes::new())).await;
            }
        }
    }

    Ok(())
}

fn handle_server_frame(frame: IpcFrame) {
    if frame.frame_type == frame_type::ERROR {
        if let Ok(payload) = serde_json::from_slice::<ErrorPayload>(&frame.payload) {
            eprintln!("\r\n[server error: {} - {}]\r", payload.code, payload.message);
        }
    }
}

fn terminal_size() -> (u16, u16) {
    let mut ws = nix::libc::winsize {
        ws_row: 24,
        ws_col: 80,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    unsafe {
        nix::libc::ioctl(0, nix::libc::TIOCGWINSZ, &mut ws);
    }
    (ws.ws_col, ws.ws_row)
}
