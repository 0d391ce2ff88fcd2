//! Token framing: blocking, timeout-bounded send and receive.
//!
//! The codec is the only place that touches the raw byte stream. Receives
//! support *prefetched* bytes: a caller that has already consumed part of
//! the stream before recognizing a token boundary hands those bytes in, and
//! the codec reassembles the token as if it had read everything itself. No
//! partial message is ever surfaced.

use std::time::Duration;

use bytes::BytesMut;

use super::Tag;
use crate::error::{Result, SecError};
use crate::transport::{self, Connection};

/// Fixed constant at offset 0 of every token.
pub const TOKEN_MAGIC: u32 = 0xC5EC_0101;

/// Size of the fixed token header in bytes.
pub const HEADER_LEN: usize = 12;

/// Default upper bound on a declared payload length.
///
/// Negotiation payloads are tiny; anything approaching this bound is either
/// a desynchronized stream or an attack on the allocator.
pub const MAX_TOKEN_PAYLOAD: usize = 64 * 1024;

/// Encodes and decodes framed tokens over a blocking connection.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    max_payload: usize,
}

impl Default for TokenCodec {
    fn default() -> Self {
        Self {
            max_payload: MAX_TOKEN_PAYLOAD,
        }
    }
}

impl TokenCodec {
    /// Create a codec with the default payload bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the payload bound (tests, constrained deployments).
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Send one token: header + payload as a single contiguous write.
    ///
    /// The frame is assembled into an owned buffer and written once,
    /// bounded by `timeout`. A short write is a [`SecError::System`]; it is
    /// never retried here.
    pub fn send<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        tag: Tag,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        if payload.is_empty() {
            return Err(SecError::MalformedToken(
                "refusing to send zero-length payload".to_string(),
            ));
        }
        if payload.len() > self.max_payload {
            return Err(SecError::MalformedToken(format!(
                "payload length {} exceeds bound {}",
                payload.len(),
                self.max_payload
            )));
        }

        tracing::trace!(
            magic = format_args!("{TOKEN_MAGIC:#010x}"),
            ?tag,
            len = payload.len(),
            "sending token"
        );
        tracing::trace!(dump = %hex_dump(payload), "token payload");

        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&TOKEN_MAGIC.to_be_bytes());
        frame.extend_from_slice(&tag.as_u32().to_be_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);

        transport::write_all_timeout(conn, &frame, timeout)
    }

    /// Receive one token, reassembling around any prefetched bytes.
    ///
    /// `prefetched` holds bytes the caller already consumed from the
    /// stream. Three cases are supported: the header (and possibly payload
    /// bytes) fully prefetched; the header partially prefetched; nothing
    /// prefetched. Whatever is missing is read from the connection, each
    /// read bounded by `timeout`.
    pub fn receive<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        timeout: Duration,
        prefetched: &[u8],
    ) -> Result<(Tag, Vec<u8>)> {
        let mut header = [0u8; HEADER_LEN];
        let payload_prefetch: &[u8] = if prefetched.len() >= HEADER_LEN {
            header.copy_from_slice(&prefetched[..HEADER_LEN]);
            &prefetched[HEADER_LEN..]
        } else if !prefetched.is_empty() {
            header[..prefetched.len()].copy_from_slice(prefetched);
            transport::read_exact_timeout(conn, &mut header[prefetched.len()..], timeout)?;
            &[]
        } else {
            transport::read_exact_timeout(conn, &mut header, timeout)?;
            &[]
        };

        let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let raw_tag = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let declared = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;

        tracing::trace!(
            magic = format_args!("{magic:#010x}"),
            tag = raw_tag,
            len = declared,
            "received token header"
        );

        if magic != TOKEN_MAGIC {
            return Err(SecError::MagicMismatch {
                expected: TOKEN_MAGIC,
                got: magic,
            });
        }
        let tag = Tag::from_u32(raw_tag)?;
        if declared == 0 {
            return Err(SecError::MalformedToken(
                "declared payload length is 0".to_string(),
            ));
        }
        if declared > self.max_payload {
            return Err(SecError::MalformedToken(format!(
                "declared payload length {} exceeds bound {}",
                declared, self.max_payload
            )));
        }
        // The prefetch must stop at or before this token's end; bytes past
        // it would belong to a message nobody has asked for yet.
        if payload_prefetch.len() > declared {
            return Err(SecError::MalformedToken(format!(
                "{} prefetched bytes overrun declared payload length {}",
                payload_prefetch.len(),
                declared
            )));
        }

        let mut payload = vec![0u8; declared];
        payload[..payload_prefetch.len()].copy_from_slice(payload_prefetch);
        if payload_prefetch.len() < declared {
            transport::read_exact_timeout(conn, &mut payload[payload_prefetch.len()..], timeout)?;
        }

        tracing::trace!(dump = %hex_dump(&payload), "token payload");
        Ok((tag, payload))
    }
}

/// Hex rendering of a payload for trace output, truncated past 64 bytes.
fn hex_dump(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(64)];
    let mut out = String::with_capacity(shown.len() * 3 + 8);
    for (i, b) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02x}"));
    }
    if bytes.len() > shown.len() {
        out.push_str(" ..");
    }
    out
}
