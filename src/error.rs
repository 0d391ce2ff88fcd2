//! Negotiation error types.
//!
//! Every failure in this layer is terminal for the handshake: nothing is
//! retried internally, and no partial negotiation state survives an error.
//! The caller decides policy (typically log and close the connection; for
//! [`SecError::NotSupported`] both sides' candidate lists are available on
//! the outcome for diagnosis).

use thiserror::Error;

/// Errors produced by token transport and mechanism negotiation.
#[derive(Error, Debug)]
pub enum SecError {
    /// I/O failure or short write on the connection.
    #[error("System error: {0}")]
    System(String),

    /// The peer closed the connection mid-token (a read returned 0 bytes).
    #[error("Peer closed the connection")]
    PeerClosedConnection,

    /// A blocking read or write did not complete within its timeout.
    #[error("Operation timed out")]
    TimedOut,

    /// The first 4 bytes of a token did not match the fixed magic constant.
    ///
    /// This usually means the stream is desynchronized or the peer is not
    /// speaking this protocol at all.
    #[error("Bad token magic: got {got:#010x}, expected {expected:#010x}")]
    MagicMismatch {
        /// The magic value required on every token.
        expected: u32,
        /// The value actually read off the stream.
        got: u32,
    },

    /// Structurally invalid token framing: zero declared length, an
    /// over-bound length, or an unknown tag value.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Structural violation inside a negotiation payload: truncated field,
    /// over-bound count, out-of-range index, or self-contradictory
    /// delegation flags.
    #[error("Bad peer response: {0}")]
    BadPeerResponse(String),

    /// Negotiation completed but no mutually acceptable mechanism exists.
    #[error("No mutually supported mechanism: {0}")]
    NotSupported(String),

    /// Configuration error (unreadable file, invalid mechanism list).
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias for negotiation operations
pub type Result<T> = std::result::Result<T, SecError>;

impl SecError {
    /// Classify an I/O error from a blocking connection read or write.
    ///
    /// Timeout-like kinds map to [`SecError::TimedOut`], an unexpected EOF
    /// to [`SecError::PeerClosedConnection`], anything else to
    /// [`SecError::System`].
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => SecError::TimedOut,
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
                SecError::PeerClosedConnection
            }
            _ => SecError::System(err.to_string()),
        }
    }
}

impl From<std::io::Error> for SecError {
    fn from(err: std::io::Error) -> Self {
        SecError::from_io(err)
    }
}

impl From<toml::de::Error> for SecError {
    fn from(err: toml::de::Error) -> Self {
        SecError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_timeout_classification() {
        let err = SecError::from_io(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
        assert!(matches!(err, SecError::TimedOut));

        let err = SecError::from_io(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
        assert!(matches!(err, SecError::TimedOut));
    }

    #[test]
    fn test_io_closed_classification() {
        let err = SecError::from_io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(err, SecError::PeerClosedConnection));
    }

    #[test]
    fn test_io_other_classification() {
        let err = SecError::from_io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(matches!(err, SecError::System(_)));
    }

    #[test]
    fn test_magic_mismatch_display() {
        let err = SecError::MagicMismatch {
            expected: 0xC5EC_0101,
            got: 0xDEAD_BEEF,
        };
        let msg = err.to_string();
        assert!(msg.contains("0xdeadbeef"));
        assert!(msg.contains("0xc5ec0101"));
    }
}
