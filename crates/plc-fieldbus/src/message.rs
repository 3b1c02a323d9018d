//! Fragmented-receive helpers for reading a fieldbus request off a TCP
//! stream that may deliver it in more than one packet.

use std::io::Read;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use plc_common::PlcResult;

/// Combine two bytes at `buf[start]` and `buf[start + 1]` into a big-endian
/// 16-bit word. `start`/`end` are inclusive byte offsets, `end == start + 1`.
#[must_use]
pub fn make_word(buf: &[u8], start: usize, end: usize) -> u16 {
    debug_assert_eq!(end, start + 1);
    u16::from_be_bytes([buf[start], buf[end]])
}

/// Read up to `nbytes` bytes from `stream`, retrying short or timed-out
/// reads up to `ntries` times with `pause` between attempts.
///
/// A read that returns zero bytes (peer closed the connection) ends the
/// loop immediately with whatever has been accumulated so far. A read that
/// times out (when `stream` has a read timeout set) counts as one of the
/// `ntries` attempts rather than failing outright, mirroring a fieldbus
/// link that free-runs ahead of a slow client.
///
/// # Errors
///
/// Returns an error if the underlying socket read fails for a reason other
/// than a timeout.
pub fn recv_fragment(
    stream: &mut TcpStream,
    nbytes: usize,
    ntries: usize,
    pause: Option<Duration>,
) -> PlcResult<Vec<u8>> {
    let mut buf = vec![0u8; nbytes];
    let mut received = 0usize;

    for _ in 0..ntries.max(1) {
        if received >= nbytes {
            break;
        }
        match stream.read(&mut buf[received..]) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                if let Some(p) = pause {
                    thread::sleep(p);
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        if received < nbytes {
            if let Some(p) = pause {
                thread::sleep(p);
            }
        }
    }

    buf.truncate(received);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_word_is_big_endian() {
        let buf = [0x01, 0x02, 0xAB, 0xCD];
        assert_eq!(make_word(&buf, 0, 1), 0x0102);
        assert_eq!(make_word(&buf, 2, 3), 0xABCD);
    }
}
