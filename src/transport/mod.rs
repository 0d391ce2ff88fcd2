//! Blocking connection seam.
//!
//! Negotiation is fully synchronous: one logical send and one logical
//! receive per side, executing on the thread that owns the connection, each
//! underlying socket operation bounded by an explicit per-call timeout
//! (not a deadline). The [`Connection`] trait is the only thing the codec
//! knows about the transport; [`std::net::TcpStream`] is the shipped
//! implementation, and tests substitute scripted streams.
//!
//! Cancellation is external: closing the underlying connection from another
//! thread unblocks any pending read or write with an error rather than
//! letting it hang.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::{Result, SecError};

/// A blocking, timeout-capable byte stream.
///
/// The peer's address is not part of this seam: the accept loop that owns
/// the listener resolves the address-aware server catalog before handing
/// the connection over.
pub trait Connection: Read + Write {
    /// Bound subsequent reads; `None` blocks indefinitely.
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()>;

    /// Bound subsequent writes; `None` blocks indefinitely.
    fn set_write_timeout(&mut self, dur: Option<Duration>) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&mut self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }
}

/// Fill `buf` completely, each underlying read bounded by `timeout`.
///
/// A read of 0 bytes means the peer closed the connection mid-message.
pub fn read_exact_timeout<C: Connection + ?Sized>(
    conn: &mut C,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<()> {
    conn.set_read_timeout(Some(timeout))
        .map_err(|e| SecError::System(format!("cannot arm read timeout: {e}")))?;

    let mut filled = 0;
    while filled < buf.len() {
        match conn.read(&mut buf[filled..]) {
            Ok(0) => return Err(SecError::PeerClosedConnection),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(SecError::from_io(e)),
        }
    }
    Ok(())
}

/// Write all of `buf`, each underlying write bounded by `timeout`.
///
/// A write of 0 bytes is a short write and therefore a system error; it is
/// never retried.
pub fn write_all_timeout<C: Connection + ?Sized>(
    conn: &mut C,
    buf: &[u8],
    timeout: Duration,
) -> Result<()> {
    conn.set_write_timeout(Some(timeout))
        .map_err(|e| SecError::System(format!("cannot arm write timeout: {e}")))?;

    let mut sent = 0;
    while sent < buf.len() {
        match conn.write(&buf[sent..]) {
            Ok(0) => {
                return Err(SecError::System(format!(
                    "short write: {sent} of {} bytes",
                    buf.len()
                )))
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(SecError::from_io(e)),
        }
    }
    conn.flush()
        .map_err(|e| SecError::System(format!("flush failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_read_exact_across_tcp_chunks() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            // Dribble the bytes to force several reads on the other side.
            for chunk in [&b"ab"[..], &b"cd"[..], &b"ef"[..]] {
                peer.write_all(chunk).unwrap();
                peer.flush().unwrap();
                thread::sleep(Duration::from_millis(5));
            }
        });

        let mut conn = TcpStream::connect(addr).unwrap();
        let mut buf = [0u8; 6];
        read_exact_timeout(&mut conn, &mut buf, Duration::from_secs(2)).unwrap();
        assert_eq!(&buf, b"abcdef");
        writer.join().unwrap();
    }

    #[test]
    fn test_read_times_out_on_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let holder = thread::spawn(move || {
            let (peer, _) = listener.accept().unwrap();
            // Keep the socket open but never send anything.
            thread::sleep(Duration::from_millis(300));
            drop(peer);
        });

        let mut conn = TcpStream::connect(addr).unwrap();
        let mut buf = [0u8; 4];
        let err = read_exact_timeout(&mut conn, &mut buf, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, SecError::TimedOut));
        holder.join().unwrap();
    }

    #[test]
    fn test_read_detects_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let closer = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(b"xy").unwrap();
            // Close with the reader still expecting more.
        });

        let mut conn = TcpStream::connect(addr).unwrap();
        let mut buf = [0u8; 8];
        let err = read_exact_timeout(&mut conn, &mut buf, Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, SecError::PeerClosedConnection));
        closer.join().unwrap();
    }
}
