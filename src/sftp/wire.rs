//! Primitive field encoding shared by every message.
//!
//! All integers are big-endian. Strings are a `u32` byte length followed by
//! the raw bytes, interpreted with the session's [`TextEncoding`].

use bytes::{BufMut, BytesMut};

use crate::config::TextEncoding;
use crate::error::{Result, SftpError};

/// Cursor over a received payload. Every read is bounds checked and a short
/// buffer is reported as a protocol violation.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(SftpError::Protocol(format!(
                "truncated payload reading {what}: need {len} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4, "u32")?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8, "u64")?);
        Ok(u64::from_be_bytes(raw))
    }

    /// Length-prefixed opaque bytes.
    pub fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len, "string")?.to_vec())
    }

    pub fn read_string(&mut self, encoding: TextEncoding) -> Result<String> {
        let len = self.read_u32()? as usize;
        Ok(encoding.decode(self.take(len, "string")?))
    }

    /// Everything not consumed yet.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

pub fn put_binary(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

pub fn put_string(buf: &mut BytesMut, text: &str, encoding: TextEncoding) {
    put_binary(buf, &encoding.encode(text));
}
