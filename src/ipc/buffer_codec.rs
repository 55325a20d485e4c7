//! The buffer-broadcast frame codec (§4.1): frames pushed between the
//! broadcaster (C7) and a WebSocket client.
//!
//! `[magic:u16 LE = 0x5654] [version:u8 = 3] [type:u8] [sessionIdLen:u32 LE]
//!  [sessionId] [payloadLen:u32 LE] [payload]`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CoreError;

pub const MAGIC: u16 = 0x5654; // 'VT'
pub const VERSION: u8 = 3;

pub mod buffer_type {
    pub const SUBSCRIBE: u8 = 10;
    pub const UNSUBSCRIBE: u8 = 11;
    pub const SNAPSHOT: u8 = 21;
    pub const DELTA: u8 = 22;
    pub const BELL: u8 = 30;
}

const HEADER_LEN: usize = 2 + 1 + 1 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferFrame {
    pub frame_type: u8,
    pub session_id: String,
    pub payload: Bytes,
}

impl BufferFrame {
    pub fn new(frame_type: u8, session_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            session_id: session_id.into(),
            payload: payload.into(),
        }
    }
}

pub struct BufferFrameCodec {
    max_payload_len: u32,
}

impl BufferFrameCodec {
    pub fn new(max_payload_len: u32) -> Self {
        Self { max_payload_len }
    }
}

impl Default for BufferFrameCodec {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}

impl Decoder for BufferFrameCodec {
    type Item = BufferFrame;
    type Error = CoreError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let magic = u16::from_le_bytes([src[0], src[1]]);
        let version = src[2];
        let frame_type = src[3];
        let session_id_len = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);

        if magic != MAGIC || version != VERSION {
            return Err(CoreError::MalformedFrame);
        }

        let after_session_id_len = HEADER_LEN + session_id_len as usize;
        if src.len() < after_session_id_len + 4 {
            return Ok(None);
        }

        let payload_len_offset = after_session_id_len;
        let payload_len = u32::from_le_bytes([
            src[payload_len_offset],
            src[payload_len_offset + 1],
            src[payload_len_offset + 2],
            src[payload_len_offset + 3],
        ]);

        if payload_len > self.max_payload_len {
            return Err(CoreError::PayloadTooLarge);
        }

        let total_len = payload_len_offset + 4 + payload_len as usize;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let session_id_bytes = src.split_to(session_id_len as usize);
        let session_id = String::from_utf8(session_id_bytes.to_vec())
            .map_err(|_| CoreError::MalformedFrame)?;
        src.advance(4);
        let payload = src.split_to(payload_len as usize).freeze();

        Ok(Some(BufferFrame {
            frame_type,
            session_id,
            payload,
        }))
    }
}

impl Encoder<BufferFrame> for BufferFrameCodec {
    type Error = CoreError;

    fn encode(&mut self, item: BufferFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() as u64 > self.max_payload_len as u64 {
            return Err(CoreError::PayloadTooLarge);
        }
        let session_id = item.session_id.as_bytes();
        dst.reserve(HEADER_LEN + session_id.len() + 4 + item.payload.len());
        dst.put_u16_le(MAGIC);
        dst.put_u8(VERSION);
        dst.put_u8(item.frame_type);
        dst.put_u32_le(session_id.len() as u32);
        dst.put_slice(session_id);
        dst.put_u32_le(item.payload.len() as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: BufferFrame) -> BufferFrame {
        let mut codec = BufferFrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn subscribe_frame_round_trips() {
        let frame = BufferFrame::new(buffer_type::SUBSCRIBE, "sess-1", Bytes::new());
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn snapshot_frame_with_payload_round_trips() {
        let frame = BufferFrame::new(buffer_type::SNAPSHOT, "sess-1", Bytes::from_static(b"\x00\x01\x02"));
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0xDEAD);
        buf.put_u8(VERSION);
        buf.put_u8(buffer_type::BELL);
        buf.put_u32_le(0);
        buf.put_u32_le(0);
        let mut codec = BufferFrameCodec::default();
        assert_eq!(codec.decode(&mut buf).unwrap_err(), CoreError::MalformedFrame);
    }

    #[test]
    fn fragmented_stream_yields_frames_in_order() {
        let mut codec = BufferFrameCodec::default();
        let f1 = BufferFrame::new(buffer_type::SUBSCRIBE, "a", Bytes::new());
        let f2 = BufferFrame::new(buffer_type::DELTA, "a", Bytes::from_static(b"xyz"));
        let mut whole = BytesMut::new();
        codec.encode(f1.clone(), &mut whole).unwrap();
        codec.encode(f2.clone(), &mut whole).unwrap();

        let mut decoded = Vec::new();
        let mut buf = BytesMut::new();
        for byte in whole {
            buf.put_u8(byte);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }
        assert_eq!(decoded, vec![f1, f2]);
    }
}
