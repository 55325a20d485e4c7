//! The IPC frame codec (§4.1, C1): `[type:u8][length:u32 BE][payload]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CoreError;

const HEADER_LEN: usize = 1 + 4;

/// One IPC frame: an untyped byte payload tagged with a message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcFrame {
    pub frame_type: u8,
    pub payload: Bytes,
}

impl IpcFrame {
    pub fn new(frame_type: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }
}

/// Decoder/encoder for the IPC frame format.
///
/// An over-limit length is reported to the caller as soon as the header
/// reveals it, without waiting for the payload to arrive, so the caller can
/// emit the right ERROR frame (§4.5) and close the connection immediately
/// instead of stalling until the heartbeat timeout.
pub struct IpcFrameCodec {
    max_frame_len: u32,
}

impl IpcFrameCodec {
    pub fn new(max_frame_len: u32) -> Self {
        Self { max_frame_len }
    }
}

impl Default for IpcFrameCodec {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}

impl Decoder for IpcFrameCodec {
    type Item = IpcFrame;
    type Error = CoreError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let frame_type = src[0];
        let length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]);

        if length > self.max_frame_len {
            return Err(CoreError::PayloadTooLarge);
        }

        let total_len = HEADER_LEN + length as usize;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length as usize).freeze();

        Ok(Some(IpcFrame { frame_type, payload }))
    }
}

impl Encoder<IpcFrame> for IpcFrameCodec {
    type Error = CoreError;

    fn encode(&mut self, item: IpcFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() as u64 > self.max_frame_len as u64 {
            return Err(CoreError::PayloadTooLarge);
        }
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u8(item.frame_type);
        dst.put_u32(item.payload.len() as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn roundtrip(frame: IpcFrame) -> IpcFrame {
        let mut codec = IpcFrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn encodes_and_decodes_a_simple_frame() {
        let frame = IpcFrame::new(0x01, Bytes::from_static(b"hello\n"));
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn empty_payload_round_trips() {
        let frame = IpcFrame::new(0x04, Bytes::new());
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn decode_yields_none_on_partial_header() {
        let mut codec = IpcFrameCodec::default();
        let mut buf = BytesMut::from(&b"\x01\x00\x00"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_yields_none_on_partial_payload() {
        let mut codec = IpcFrameCodec::default();
        let mut full = BytesMut::new();
        codec
            .encode(IpcFrame::new(0x01, Bytes::from_static(b"hello")), &mut full)
            .unwrap();
        let mut partial = BytesMut::from(&full[..full.len() - 2]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = IpcFrameCodec::new(8);
        let mut buf = BytesMut::new();
        buf.put_u8(0x01);
        buf.put_u32(16);
        buf.extend_from_slice(&[0u8; 16]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err, CoreError::PayloadTooLarge);
    }

    #[test]
    fn oversized_header_alone_is_rejected_without_waiting_for_the_payload() {
        let mut codec = IpcFrameCodec::new(8);
        let mut buf = BytesMut::new();
        buf.put_u8(0xFF);
        buf.put_u32(0xFFFF_FFFF);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err, CoreError::PayloadTooLarge);
    }

    #[test]
    fn fragmented_stream_yields_frames_in_order() {
        let mut codec = IpcFrameCodec::default();
        let f1 = IpcFrame::new(0x01, Bytes::from_static(b"abc"));
        let f2 = IpcFrame::new(0x04, Bytes::new());
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
