//! The in-memory screen model (C6, §4.6): feeds raw PTY output through
//! `avt::Vt` and exposes the pieces needed to build snapshots and deltas.
//!
//! Grounded on the `avt`-backed `Screen` wrapper used elsewhere in the
//! corpus for driving a terminal emulator off a raw byte stream; this
//! version additionally buffers a short tail of partial UTF-8 across `feed`
//! calls, since PTY reads can split a multi-byte character or an escape
//! sequence across chunk boundaries.

pub struct Screen {
    vt: avt::Vt,
    cols: u16,
    rows: u16,
    title: String,
    bell_pending: bool,
    changed: bool,
    utf8_buf: Vec<u8>,
}

impl Screen {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            vt: avt::Vt::new(cols as usize, rows as usize),
            cols,
            rows,
            title: String::new(),
            bell_pending: false,
            changed: false,
            utf8_buf: Vec::new(),
        }
    }

    /// Whether the screen has changed since the last `take_changed` call
    /// (used by the broadcaster, §4.6, to decide whether a tick produces a
    /// DELTA for a subscribed client).
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Feed a raw chunk of child output through the emulator. Buffers a
    /// trailing partial UTF-8 sequence so it is prepended to the next chunk
    /// instead of being fed as invalid bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        let mut combined = std::mem::take(&mut self.utf8_buf);
        combined.extend_from_slice(chunk);

        let valid_len = match std::str::from_utf8(&combined) {
            Ok(_) => combined.len(),
            Err(e) => e.valid_up_to(),
        };

        let tail_len = combined.len() - valid_len;
        // Never buffer more than a single UTF-8 code point's worth of bytes;
        // a longer invalid tail means genuinely malformed input, which we
        // feed through as-is rather than stalling forever.
        if tail_len > 0 && tail_len <= 3 {
            self.utf8_buf = combined.split_off(valid_len);
        }

        if let Ok(text) = std::str::from_utf8(&combined) {
            if text.contains('\x07') {
                self.bell_pending = true;
            }
            if !text.is_empty() {
                self.vt.feed_str(text);
                self.changed = true;
            }
        }
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.vt.resize(cols as usize, rows as usize);
        self.cols = cols;
        self.rows = rows;
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.vt.cursor()
    }

    pub fn take_bell(&mut self) -> bool {
        std::mem::take(&mut self.bell_pending)
    }

    pub fn set_title(&mut self, title: String) {
        self.title = title;
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Rendered rows, one `String` per visible line, for the snapshot codec.
    pub fn rows_text(&self) -> Vec<String> {
        self.vt
            .view()
            .iter()
            .map(|line| line.text())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeds_plain_text() {
        let mut screen = Screen::new(80, 24);
        screen.feed(b"hello\n");
        let rows = screen.rows_text();
        assert!(rows[0].contains("hello"));
    }

    #[test]
    fn buffers_split_utf8_across_feed_calls() {
        let mut screen = Screen::new(80, 24);
        let bytes = "héllo".as_bytes();
        // split in the middle of the two-byte 'é'
        screen.feed(&bytes[..2]);
        screen.feed(&bytes[2..]);
        let rows = screen.rows_text();
        assert!(rows[0].contains("héllo"));
    }

    #[test]
    fn changed_flag_is_set_on_feed_and_cleared_on_take() {
        let mut screen = Screen::new(80, 24);
        assert!(!screen.take_changed());
        screen.feed(b"hi");
        assert!(screen.take_changed());
        assert!(!screen.take_changed());
    }

    #[test]
    fn bell_is_detected_and_cleared_on_take() {
        let mut screen = Screen::new(80, 24);
        screen.feed(b"\x07");
        assert!(screen.take_bell());
        assert!(!screen.take_bell());
    }

    #[test]
    fn resize_updates_reported_dimensions() {
        let mut screen = Screen::new(80, 24);
        screen.resize(120, 40);
        assert_eq!(screen.cols(), 120);
        assert_eq!(screen.rows(), 40);
    }
}
