//! Low-level wire marshalling for negotiation payloads.
//!
//! All multi-byte fields are big-endian `i32`. Strings are carried as an
//! `i32` byte count followed by UTF-8 bytes, and every string has a fixed
//! maximum length enforced at parse time. The reader is a bounded cursor:
//! any read that would run past the end of the payload fails with
//! [`SecError::BadPeerResponse`] instead of panicking or reading garbage.

use bytes::BytesMut;

use crate::error::{Result, SecError};

/// Bounded cursor over an untrusted payload slice.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Create a reader over a complete message payload.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read one big-endian `i32` field.
    pub fn read_i32(&mut self) -> Result<i32> {
        if self.remaining() < 4 {
            return Err(SecError::BadPeerResponse(format!(
                "truncated field at offset {}",
                self.pos
            )));
        }
        let b = [
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ];
        self.pos += 4;
        Ok(i32::from_be_bytes(b))
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(SecError::BadPeerResponse(format!(
                "truncated data at offset {}: need {} bytes, have {}",
                self.pos,
                len,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Read a length-prefixed string bounded to `max_len` bytes.
    ///
    /// `what` names the field in error messages.
    pub fn read_string(&mut self, max_len: usize, what: &str) -> Result<String> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(SecError::BadPeerResponse(format!(
                "negative {what} length {len}"
            )));
        }
        let len = len as usize;
        if len > max_len {
            return Err(SecError::BadPeerResponse(format!(
                "{what} length {len} exceeds bound {max_len}"
            )));
        }
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SecError::BadPeerResponse(format!("{what} is not valid UTF-8")))
    }

    /// Assert the whole payload was consumed.
    ///
    /// Trailing bytes after a structurally complete message mean the peer
    /// and we disagree about the format; treat it as hostile.
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(SecError::BadPeerResponse(format!(
                "{} trailing bytes after message",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Append one big-endian `i32` field.
pub fn put_i32(buf: &mut BytesMut, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Append a length-prefixed string.
pub fn put_string(buf: &mut BytesMut, s: &str) {
    put_i32(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}
