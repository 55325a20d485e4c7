//! PTY supervisor (C3, §4.3): spawns a child under a pseudo-terminal, owns
//! its lifecycle, and surfaces output, exit, resize, and kill.
//!
//! Grounded on the non-blocking `AsyncFd`-based PTY read loop used for
//! session output elsewhere in the corpus, generalized here to also own
//! command resolution, environment setup, and title injection, none of
//! which the teacher's sandboxed-PTY model needed.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use nix::libc;
use nix::pty::openpty;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::unix::AsyncFd;
use tokio::sync::{broadcast, watch};

use crate::error::CoreError;
use crate::pty::resolve::{generate_title, resolve_command};

pub const DEFAULT_TERM: &str = "xterm-256color";
const KILL_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleMode {
    None,
    Filter,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStatus {
    Starting,
    Running { pid: i32 },
    Exited { code: i32 },
}

/// Owns one child process running under a PTY.
pub struct PtySupervisor {
    master: Arc<OwnedFd>,
    pid: Pid,
    cols: AtomicU32,
    rows: AtomicU32,
    original_cols: u16,
    original_rows: u16,
    exit_code: Arc<AtomicI32>,
    status_tx: watch::Sender<SupervisorStatus>,
    pub output_rx_factory: broadcast::Sender<Bytes>,
}

const NO_EXIT: i32 = i32::MIN;

impl PtySupervisor {
    /// Spawns `argv` under a fresh PTY sized `cols`x`rows` in `working_dir`.
    /// Returns the supervisor plus a status watch channel subscribers can
    /// use to observe the Starting → Running → Exited transition.
    pub fn spawn(
        argv: &[String],
        working_dir: &Path,
        cols: u16,
        rows: u16,
        session_id: &str,
        title_mode: TitleMode,
        session_name: Option<&str>,
    ) -> anyhow::Result<(Self, watch::Receiver<SupervisorStatus>)> {
        let resolved = resolve_command(argv)?;

        let pty = openpty(
            Some(&nix::pty::Winsize {
                ws_row: rows,
                ws_col: cols,
                ws_xpixel: 0,
                ws_ypixel: 0,
            }),
            None,
        )?;

        let slave_fd = pty.slave.as_raw_fd();
        let mut command = std::process::Command::new(&resolved.binary);
        command
            .args(&resolved.args)
            .current_dir(working_dir)
            .stdin(Stdio::from(pty.slave.try_clone()?))
            .stdout(Stdio::from(pty.slave.try_clone()?))
            .stderr(Stdio::from(pty.slave))
            .env("TERM", DEFAULT_TERM)
            .env("COLORTERM", "truecolor")
            .env("VIBETUNNEL_SESSION_ID", session_id);

        let title = if title_mode == TitleMode::Static {
            Some(generate_title(
                working_dir.to_string_lossy().as_ref(),
                &resolved.args,
                session_name,
            ))
        } else {
            None
        };

        unsafe {
            command.pre_exec(move || {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                if libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn();

        let master: Arc<OwnedFd> = Arc::new(pty.master);
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::Starting);
        let (output_tx, _) = broadcast::channel(1024);
        let exit_code = Arc::new(AtomicI32::new(NO_EXIT));

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                let _ = status_tx.send(SupervisorStatus::Exited { code: 127 });
                exit_code.store(127, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let pid = Pid::from_raw(child.id() as i32);
        let _ = status_tx.send(SupervisorStatus::Running { pid: pid.as_raw() });

        let supervisor = Self {
            master: master.clone(),
            pid,
            cols: AtomicU32::new(cols as u32),
            rows: AtomicU32::new(rows as u32),
            original_cols: cols,
            original_rows: rows,
            exit_code: exit_code.clone(),
            status_tx: status_tx.clone(),
            output_rx_factory: output_tx.clone(),
        };

        spawn_reader_task(master, output_tx, title, title_mode, status_tx, exit_code, child);

        Ok((supervisor, status_rx))
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<Bytes> {
        self.output_rx_factory.subscribe()
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    pub fn cols(&self) -> u16 {
        self.cols.load(Ordering::SeqCst) as u16
    }

    pub fn rows(&self) -> u16 {
        self.rows.load(Ordering::SeqCst) as u16
    }

    /// The child's exit code, once it has exited; `None` while still running.
    pub fn exit_code(&self) -> Option<i32> {
        match self.exit_code.load(Ordering::SeqCst) {
            NO_EXIT => None,
            code => Some(code),
        }
    }

    pub fn write_stdin(&self, bytes: &[u8]) -> Result<(), CoreError> {
        let fd = self.master.as_fd();
        let mut written = 0;
        while written < bytes.len() {
            match nix::unistd::write(fd, &bytes[written..]) {
                Ok(n) => written += n,
                Err(nix::errno::Errno::EAGAIN) => continue,
                Err(e) => return Err(CoreError::ControlMessageFailed(e.to_string())),
            }
        }
        Ok(())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), CoreError> {
        if cols == self.cols() && rows == self.rows() {
            return Ok(());
        }
        set_winsize(self.master.as_raw_fd(), cols, rows)
            .map_err(|e| CoreError::ControlMessageFailed(e.to_string()))?;
        self.cols.store(cols as u32, Ordering::SeqCst);
        self.rows.store(rows as u32, Ordering::SeqCst);
        Ok(())
    }

    pub fn reset_size(&self) -> Result<(), CoreError> {
        self.resize(self.original_cols, self.original_rows)
            .map_err(|e| CoreError::ResetSizeFailed(e.to_string()))
    }

    /// Sends `signal` to the process, escalating to `SIGKILL` after the
    /// grace period if the process is still alive (§4.3).
    pub async fn kill(&self, signal: Signal) -> Result<(), CoreError> {
        if matches!(*self.status_tx.borrow(), SupervisorStatus::Exited { .. }) {
            return Ok(());
        }
        kill(self.pid, signal).map_err(|e| CoreError::ControlMessageFailed(e.to_string()))?;
        if signal != Signal::SIGKILL {
            tokio::time::sleep(KILL_GRACE_PERIOD).await;
            if kill(self.pid, None).is_ok() {
                let _ = kill(self.pid, Signal::SIGKILL);
            }
        }
        Ok(())
    }
}

fn set_winsize(fd: std::os::fd::RawFd, cols: u16, rows: u16) -> nix::Result<()> {
    let ws = nix::pty::Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ as _, &ws) };
    if ret != 0 {
        return Err(nix::errno::Errno::last());
    }
    Ok(())
}

/// Strips OSC 0/1/2 title-setting sequences from a chunk, for `titleMode = filter`.
fn strip_osc_title_sequences(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == 0x1B && input.get(i + 1) == Some(&b']') {
            // OSC introducer; look for "0;", "1;", or "2;" then ST (\x1B\\) or BEL (\x07).
            let rest = &input[i + 2..];
            let is_title = rest.starts_with(b"0;") || rest.starts_with(b"1;") || rest.starts_with(b"2;");
            if is_title {
                let mut j = i + 2;
                while j < input.len() && input[j] != 0x07 {
                    if input[j] == 0x1B && input.get(j + 1) == Some(&b'\\') {
                        j += 2;
                        break;
                    }
                    j += 1;
                }
                if j < input.len() && input[j] == 0x07 {
                    j += 1;
                }
                i = j;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

const PROMPT_TERMINATORS: &[u8] = b"$>#%";
const CHEVRON_PROMPT_TERMINATOR: &[u8] = "❯".as_bytes();

/// Strips one trailing ANSI SGR reset (`ESC[0m` or `ESC[m`) from `input`, if present.
fn strip_trailing_ansi_reset(input: &[u8]) -> &[u8] {
    if let Some(stripped) = input.strip_suffix(b"\x1B[0m") {
        return stripped;
    }
    if let Some(stripped) = input.strip_suffix(b"\x1B[m") {
        return stripped;
    }
    input
}

/// Whether `chunk` ends in a shell-prompt-looking tail: one of `$ > # % ❯`,
/// optionally preceded by a trailing space and followed by an ANSI reset.
fn ends_with_prompt_terminator(chunk: &[u8]) -> bool {
    let mut tail = strip_trailing_ansi_reset(chunk);
    if tail.last() == Some(&b' ') {
        tail = &tail[..tail.len() - 1];
    }
    if tail.ends_with(CHEVRON_PROMPT_TERMINATOR) {
        return true;
    }
    matches!(tail.last(), Some(b) if PROMPT_TERMINATORS.contains(b))
}

fn spawn_reader_task(
    master: Arc<OwnedFd>,
    output_tx: broadcast::Sender<Bytes>,
    title: Option<String>,
    title_mode: TitleMode,
    status_tx: watch::Sender<SupervisorStatus>,
    exit_code: Arc<AtomicI32>,
    child: std::process::Child,
) {
    unsafe {
        let flags = libc::fcntl(master.as_raw_fd(), libc::F_GETFL);
        libc::fcntl(master.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK);
    }

    tokio::spawn(async move {
        let async_fd = match AsyncFd::new(master.as_raw_fd()) {
            Ok(fd) => fd,
            Err(_) => return,
        };

        let mut buf = [0u8; 32 * 1024];
        // Set once a processed chunk's tail looks like a shell prompt; the
        // title is then prefixed onto the start of the next chunk read, per
        // chunk, for as long as the session keeps re-printing prompts.
        let mut inject_next_chunk = false;
        loop {
            let mut guard = match async_fd.readable().await {
                Ok(g) => g,
                Err(_) => break,
            };

            let n = unsafe { libc::read(master.as_raw_fd(), buf.as_mut_ptr() as *mut _, buf.len()) };

            if n > 0 {
                guard.clear_ready();
                let raw = &buf[..n as usize];
                let mut chunk = if title_mode == TitleMode::Filter {
                    strip_osc_title_sequences(raw)
                } else {
                    raw.to_vec()
                };

                if let Some(title) = &title {
                    if inject_next_chunk {
                        let mut framed = format!("\x1B]2;{title}\x07").into_bytes();
                        framed.extend_from_slice(&chunk);
                        chunk = framed;
                    }
                    inject_next_chunk = ends_with_prompt_terminator(raw);
                }

                let _ = output_tx.send(Bytes::from(chunk));
                continue;
            }
            if n == 0 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                guard.clear_ready();
                continue;
            }
            break;
        }
    });

    tokio::task::spawn_blocking(move || {
        let mut child = child;
        let code = match child.wait() {
            Ok(status) => status.code().unwrap_or(-1),
            Err(_) => -1,
        };
        exit_code.store(code, Ordering::SeqCst);
        let _ = status_tx.send(SupervisorStatus::Exited { code });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_osc_2_title_terminated_by_bel() {
        let input = b"\x1B]2;my title\x07hello";
        let out = strip_osc_title_sequences(input);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn strips_osc_0_title_terminated_by_st() {
        let input = b"\x1B]0;title\x1B\\rest";
        let out = strip_osc_title_sequences(input);
        assert_eq!(out, b"rest");
    }

    #[test]
    fn leaves_non_title_escape_sequences_untouched() {
        let input = b"\x1B[31mred\x1B[0m";
        let out = strip_osc_title_sequences(input);
        assert_eq!(out, input);
    }

    #[test]
    fn detects_prompt_terminator_at_tail() {
        assert!(ends_with_prompt_terminator(b"user@host:~$ "));
        assert!(ends_with_prompt_terminator(b"user@host:~$"));
        assert!(ends_with_prompt_terminator(b"/usr/local >"));
        assert!(!ends_with_prompt_terminator(b"hello world"));
    }

    #[test]
    fn detects_prompt_terminator_before_ansi_reset() {
        assert!(ends_with_prompt_terminator(b"\x1B[32m$\x1B[0m"));
        assert!(ends_with_prompt_terminator(b"\x1B[32m#\x1B[m"));
    }

    #[test]
    fn detects_chevron_prompt_terminator() {
        assert!(ends_with_prompt_terminator("❯ ".as_bytes()));
        assert!(ends_with_prompt_terminator("❯".as_bytes()));
    }

    #[test]
    fn mid_line_terminator_characters_do_not_count() {
        assert!(!ends_with_prompt_terminator(b"50% done, still working"));
    }
}
