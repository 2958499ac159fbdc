//! Length-prefixed framing.
//!
//! ```text
//! ┌────────────┬──────────┬────────────────────┐
//! │ length     │ type tag │ type-specific body │
//! │ u32 BE     │ u8       │ length - 1 bytes   │
//! └────────────┴──────────┴────────────────────┘
//! ```
//!
//! Bytes arrive in arbitrary chunks. The codec keeps whatever does not form
//! a complete frame yet and never surfaces a partial one.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, SftpError};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame accepted from a server. OpenSSH caps packets at 256 KiB;
/// this leaves headroom for servers with larger read replies.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Accumulates inbound bytes and splits them into frame payloads.
pub struct FrameCodec {
    buffer: BytesMut,
    max_frame_len: u32,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            max_frame_len,
        }
    }

    /// Appends a chunk and returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Pops one complete frame payload (tag included, length prefix
    /// stripped), or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        // a frame carries at least its type tag
        if self.buffer.len() < LENGTH_PREFIX_SIZE + 1 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        if length == 0 {
            return Err(SftpError::Protocol("zero-length frame".into()));
        }
        if length > self.max_frame_len {
            return Err(SftpError::Protocol(format!(
                "frame length {length} exceeds maximum {}",
                self.max_frame_len
            )));
        }

        if self.buffer.len() < LENGTH_PREFIX_SIZE + length as usize {
            return Ok(None);
        }

        let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buffer.split_to(length as usize).freeze()))
    }

    /// Number of buffered bytes not yet emitted as frames.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Prepends the length prefix to a payload so it can be written as one unit.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(payloads: &[&[u8]]) -> Vec<u8> {
        payloads
            .iter()
            .flat_map(|p| encode_frame(p).to_vec())
            .collect()
    }

    #[test]
    fn single_frame() {
        let mut codec = FrameCodec::new();
        let frames = codec.push(&encode_frame(b"\x65hello")).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"\x65hello");
        assert!(codec.is_empty());
    }

    #[test]
    fn length_prefix_is_big_endian() {
        let frame = encode_frame(&[1, 0, 0, 0, 3]);
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
    }

    #[test]
    fn partial_frame_is_held_back() {
        let mut codec = FrameCodec::new();
        let bytes = encode_frame(b"\x66abcdef");

        assert!(codec.push(&bytes[..7]).unwrap().is_empty());
        assert_eq!(codec.len(), 7);

        let frames = codec.push(&bytes[7..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"\x66abcdef");
    }

    #[test]
    fn every_split_point_yields_the_same_frames() {
        let payloads: [&[u8]; 3] = [b"\x65one", b"\x67", b"\x68three-three"];
        let stream = stream_of(&payloads);

        for first in 0..=stream.len() {
            for second in first..=stream.len() {
                let mut codec = FrameCodec::new();
                let mut frames = Vec::new();
                frames.extend(codec.push(&stream[..first]).unwrap());
                frames.extend(codec.push(&stream[first..second]).unwrap());
                frames.extend(codec.push(&stream[second..]).unwrap());

                let got: Vec<&[u8]> = frames.iter().map(|f| &f[..]).collect();
                assert_eq!(got, payloads, "split at {first}/{second}");
                assert!(codec.is_empty());
            }
        }
    }

    #[test]
    fn byte_at_a_time() {
        let payloads: [&[u8]; 2] = [b"\x65a", b"\x66bb"];
        let stream = stream_of(&payloads);
        let mut codec = FrameCodec::new();
        let mut frames = Vec::new();
        for byte in &stream {
            frames.extend(codec.push(&[*byte]).unwrap());
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[1][..], b"\x66bb");
    }

    #[test]
    fn oversized_frame_is_a_protocol_error() {
        let mut codec = FrameCodec::with_max_frame_len(16);
        let err = codec.push(&[0, 0, 1, 0, 0x65]).unwrap_err();
        assert!(matches!(err, SftpError::Protocol(m) if m.contains("exceeds")));
    }

    #[test]
    fn zero_length_frame_is_a_protocol_error() {
        let mut codec = FrameCodec::new();
        assert!(codec.push(&[0, 0, 0, 0, 0x65]).is_err());
    }
}
