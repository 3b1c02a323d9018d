//! Fieldbus module registry: maps a listening port to the module template
//! that services connections accepted on it.
//!
//! Mirrors the original project's `create_new_backend` contract -- a fresh
//! connection clones the module registered for its port and attaches the
//! live socket, rather than sharing one long-lived handler object across
//! connections.

use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

use plc_common::{PlcError, PlcResult};
use tracing::{debug, info};

use crate::message::recv_fragment;
use crate::modbus::{MbapHeader, ModbusModule};

const RECV_TRIES: usize = 50;
const RECV_PAUSE: Duration = Duration::from_millis(20);

/// Bytes common to every Modbus request: the 7-byte MBAP header, the
/// function code, and the two 2-byte fields every supported function uses
/// as `addr`/`nbits`-or-`nwords`.
const COMMON_HEADER_LEN: usize = MbapHeader::SIZE + 5;

/// One registered module: the protocol engine plus whether its connections
/// close after a single request/response.
#[derive(Clone)]
struct Entry {
    module: ModbusModule,
    one_shot: bool,
}

/// Maps TCP ports to the Modbus module that services them.
#[derive(Clone, Default)]
pub struct FieldbusRegistry {
    entries: HashMap<u16, Entry>,
}

impl FieldbusRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` to service connections accepted on `port`.
    pub fn register(&mut self, port: u16, module: ModbusModule, one_shot: bool) {
        self.entries.insert(port, Entry { module, one_shot });
    }

    /// Service `stream`, which was just accepted on `port`, to completion.
    ///
    /// Runs until the peer closes the connection, a framing error occurs,
    /// or (for a one-shot module) a single request has been answered.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::UnknownSection`]-free errors for I/O failures;
    /// returns an error if `port` has no registered module.
    pub fn serve(&self, port: u16, mut stream: TcpStream) -> PlcResult<()> {
        let entry = self
            .entries
            .get(&port)
            .ok_or_else(|| PlcError::ConfigError(format!("no module registered on port {port}")))?
            .clone();

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        debug!(port, peer = %peer, "fieldbus connection accepted");

        loop {
            // WaitHeader: the 12 bytes common to every supported request,
            // never trusting the peer-supplied MBAP length field.
            let mut buf = recv_fragment(&mut stream, COMMON_HEADER_LEN, RECV_TRIES, Some(RECV_PAUSE))?;
            if buf.is_empty() {
                debug!(port, peer = %peer, "connection closed by peer");
                break;
            }
            if buf.len() < COMMON_HEADER_LEN {
                let err = PlcError::ShortRead {
                    expected: COMMON_HEADER_LEN,
                    actual: buf.len(),
                };
                debug!(port, peer = %peer, error = %err, "short read on common header, closing connection");
                break;
            }

            let mut header_buf = [0u8; MbapHeader::SIZE];
            header_buf.copy_from_slice(&buf[0..MbapHeader::SIZE]);
            let header = MbapHeader::from_bytes(&header_buf);

            if header.protocol_id != 0 {
                let err = PlcError::MalformedRequest(format!(
                    "protocol_id must be 0, got {}",
                    header.protocol_id
                ));
                debug!(port, peer = %peer, error = %err, "malformed request, closing connection");
                break;
            }

            let fc_byte = buf[MbapHeader::SIZE];

            // WaitExtension: 0x0F/0x10 carry a byte-count byte plus that
            // many payload bytes beyond the common header.
            if fc_byte == 0x0F || fc_byte == 0x10 {
                let count_byte = recv_fragment(&mut stream, 1, RECV_TRIES, Some(RECV_PAUSE))?;
                if count_byte.is_empty() {
                    let err = PlcError::ShortRead { expected: 1, actual: 0 };
                    debug!(port, peer = %peer, error = %err, "short read on byte count, closing connection");
                    break;
                }
                let byte_count = count_byte[0] as usize;
                buf.extend_from_slice(&count_byte);

                let payload = recv_fragment(&mut stream, byte_count, RECV_TRIES, Some(RECV_PAUSE))?;
                if payload.len() < byte_count {
                    let err = PlcError::ShortRead {
                        expected: byte_count,
                        actual: payload.len(),
                    };
                    debug!(port, peer = %peer, error = %err, "short read on write payload, closing connection");
                    break;
                }
                buf.extend_from_slice(&payload);
            }

            // Dispatch + Respond.
            let pdu = &buf[MbapHeader::SIZE..];
            let response_pdu = entry.module.process_pdu(pdu);
            let response_header = MbapHeader::for_response(header.transaction_id, header.unit_id, response_pdu.len());

            let mut frame = Vec::with_capacity(MbapHeader::SIZE + response_pdu.len());
            frame.extend_from_slice(&response_header.to_bytes());
            frame.extend(response_pdu);
            stream.write_all(&frame)?;

            if entry.one_shot {
                break;
            }
        }

        info!(port, peer = %peer, "fieldbus connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plc_memory::MemoryImage;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn serve_answers_a_read_coils_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut registry = FieldbusRegistry::new();
        let memory = Arc::new(MemoryImage::new(16, 0, 0, 0));
        registry.register(addr.port(), ModbusModule::new(memory), true);

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            registry.serve(addr.port(), stream).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let header = MbapHeader {
            transaction_id: 1,
            protocol_id: 0,
            length: 6,
            unit_id: 1,
        };
        let mut request = Vec::new();
        request.extend_from_slice(&header.to_bytes());
        request.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x08]);
        client.write_all(&request).unwrap();

        let mut response = [0u8; MbapHeader::SIZE + 3];
        std::io::Read::read_exact(&mut client, &mut response).unwrap();
        assert_eq!(response[MbapHeader::SIZE], 0x01);
        assert_eq!(response[MbapHeader::SIZE + 1], 1);

        handle.join().unwrap();
    }
}
