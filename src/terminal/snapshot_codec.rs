//! Binary encoding for snapshot and delta payloads carried inside buffer
//! frames (§4.1). The 32-byte snapshot header layout is fixed by the spec;
//! the row-run encoding beyond it is implementation-defined but must be
//! self-delimiting and round-trip, which is what the opcode scheme below
//! and its property tests pin down.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CoreError;
use crate::terminal::screen::Screen;

pub const SNAPSHOT_MAGIC: u16 = 0x5654;
pub const SNAPSHOT_VERSION: u8 = 1;
const HEADER_LEN: usize = 2 + 1 + 1 + 4 + 4 + 4 + 4 + 4 + 8;

mod row_opcode {
    /// One cell run spanning the whole row: `[len:u32][utf8 bytes]`, then the row ends.
    pub const ROW: u8 = 0x01;
    /// End of the current row's cell-run sequence.
    pub const ROW_END: u8 = 0x02;
    /// `n:u32` consecutive empty rows.
    pub const EMPTY_RUN: u8 = 0x03;
    /// End of the row-data stream.
    pub const END: u8 = 0x04;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub flags: u8,
    pub cols: u32,
    pub rows: u32,
    pub viewport_y: i32,
    pub cursor_x: i32,
    pub cursor_y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub header: SnapshotHeader,
    pub rows: Vec<String>,
}

fn encode_rows(rows: &[String], dst: &mut BytesMut) {
    let mut run_start: Option<usize> = None;
    for (i, row) in rows.iter().enumerate() {
        if row.is_empty() {
            if run_start.is_none() {
                run_start = Some(i);
            }
            continue;
        }
        if let Some(start) = run_start.take() {
            dst.put_u8(row_opcode::EMPTY_RUN);
            dst.put_u32_le((i - start) as u32);
        }
        dst.put_u8(row_opcode::ROW);
        let bytes = row.as_bytes();
        dst.put_u32_le(bytes.len() as u32);
        dst.put_slice(bytes);
        dst.put_u8(row_opcode::ROW_END);
    }
    if let Some(start) = run_start.take() {
        dst.put_u8(row_opcode::EMPTY_RUN);
        dst.put_u32_le((rows.len() - start) as u32);
    }
    dst.put_u8(row_opcode::END);
}

fn decode_rows(src: &mut Bytes) -> Result<Vec<String>, CoreError> {
    let mut rows = Vec::new();
    loop {
        if src.is_empty() {
            return Err(CoreError::MalformedFrame);
        }
        let opcode = src.get_u8();
        match opcode {
            row_opcode::END => break,
            row_opcode::EMPTY_RUN => {
                if src.len() < 4 {
                    return Err(CoreError::MalformedFrame);
                }
                let n = src.get_u32_le();
                for _ in 0..n {
                    rows.push(String::new());
                }
            }
            row_opcode::ROW => {
                if src.len() < 4 {
                    return Err(CoreError::MalformedFrame);
                }
                let len = src.get_u32_le() as usize;
                if src.len() < len + 1 {
                    return Err(CoreError::MalformedFrame);
                }
                let text_bytes = src.split_to(len);
                let text = String::from_utf8(text_bytes.to_vec())
                    .map_err(|_| CoreError::MalformedFrame)?;
                let end = src.get_u8();
                if end != row_opcode::ROW_END {
                    return Err(CoreError::MalformedFrame);
                }
                rows.push(text);
            }
            _ => return Err(CoreError::MalformedFrame),
        }
    }
    Ok(rows)
}

pub fn encode_snapshot(screen: &Screen, flags: u8, viewport_y: i32) -> Bytes {
    let (cursor_x, cursor_y) = screen.cursor();
    let mut dst = BytesMut::new();
    dst.put_u16_le(SNAPSHOT_MAGIC);
    dst.put_u8(SNAPSHOT_VERSION);
    dst.put_u8(flags);
    dst.put_u32_le(screen.cols() as u32);
    dst.put_u32_le(screen.rows() as u32);
    dst.put_i32_le(viewport_y);
    dst.put_i32_le(cursor_x as i32);
    dst.put_i32_le(cursor_y as i32);
    dst.put_u64_le(0); // reserved
    encode_rows(&screen.rows_text(), &mut dst);
    dst.freeze()
}

pub fn decode_snapshot(mut src: Bytes) -> Result<Snapshot, CoreError> {
    if src.len() < HEADER_LEN {
        return Err(CoreError::MalformedFrame);
    }
    let magic = src.get_u16_le();
    let version = src.get_u8();
    if magic != SNAPSHOT_MAGIC || version != SNAPSHOT_VERSION {
        return Err(CoreError::MalformedFrame);
    }
    let flags = src.get_u8();
    let cols = src.get_u32_le();
    let rows = src.get_u32_le();
    let viewport_y = src.get_i32_le();
    let cursor_x = src.get_i32_le();
    let cursor_y = src.get_i32_le();
    let _reserved = src.get_u64_le();

    let row_data = decode_rows(&mut src)?;

    Ok(Snapshot {
        header: SnapshotHeader {
            flags,
            cols,
            rows,
            viewport_y,
            cursor_x,
            cursor_y,
        },
        rows: row_data,
    })
}

/// A delta: the subset of rows that changed since the last snapshot/delta,
/// plus the cursor position if it moved (§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub cursor: Option<(i32, i32)>,
    pub changed_rows: Vec<(u32, String)>,
}

pub fn encode_delta(delta: &Delta) -> Bytes {
    let mut dst = BytesMut::new();
    match delta.cursor {
        Some((x, y)) => {
            dst.put_u8(1);
            dst.put_i32_le(x);
            dst.put_i32_le(y);
        }
        None => dst.put_u8(0),
    }
    dst.put_u32_le(delta.changed_rows.len() as u32);
    for (index, text) in &delta.changed_rows {
        dst.put_u32_le(*index);
        let bytes = text.as_bytes();
        dst.put_u32_le(bytes.len() as u32);
        dst.put_slice(bytes);
    }
    dst.freeze()
}

pub fn decode_delta(mut src: Bytes) -> Result<Delta, CoreError> {
    if src.is_empty() {
        return Err(CoreError::MalformedFrame);
    }
    let has_cursor = src.get_u8();
    let cursor = match has_cursor {
        0 => None,
        1 => {
            if src.len() < 8 {
                return Err(CoreError::MalformedFrame);
            }
            Some((src.get_i32_le(), src.get_i32_le()))
        }
        _ => return Err(CoreError::MalformedFrame),
    };

    if src.len() < 4 {
        return Err(CoreError::MalformedFrame);
    }
    let count = src.get_u32_le();
    let mut changed_rows = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if src.len() < 8 {
            return Err(CoreError::MalformedFrame);
        }
        let index = src.get_u32_le();
        let len = src.get_u32_le() as usize;
        if src.len() < len {
            return Err(CoreError::MalformedFrame);
        }
        let text_bytes = src.split_to(len);
        let text = String::from_utf8(text_bytes.to_vec()).map_err(|_| CoreError::MalformedFrame)?;
        changed_rows.push((index, text));
    }

    Ok(Delta { cursor, changed_rows })
}

/// Applies a delta on top of a snapshot's rows, per the §8 "snapshot ⊇
/// deltas" property: reconstructing the screen by folding deltas over the
/// base snapshot must match the live screen at the same point.
pub fn apply_delta(base: &mut Snapshot, delta: &Delta) {
    for (index, text) in &delta.changed_rows {
        if let Some(row) = base.rows.get_mut(*index as usize) {
            *row = text.clone();
        }
    }
    if let Some((x, y)) = delta.cursor {
        base.header.cursor_x = x;
        base.header.cursor_y = y;
    }
}
