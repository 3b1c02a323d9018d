//! Modbus/TCP integration tests driving the real server engine over a
//! loopback TCP connection: one test client, one accepted connection,
//! real framing on the wire in both directions.

use plc_fieldbus::{FieldbusRegistry, MbapHeader, ModbusModule};
use plc_memory::MemoryImage;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

fn spawn_server(memory: Arc<MemoryImage>, one_shot: bool) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let port = addr.port();

    let mut registry = FieldbusRegistry::new();
    registry.register(port, ModbusModule::new(memory), one_shot);

    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            let _ = registry.serve(port, stream);
        }
    });

    port
}

fn send_request(stream: &mut TcpStream, transaction_id: u16, pdu: &[u8]) -> Vec<u8> {
    let header = MbapHeader {
        transaction_id,
        protocol_id: 0,
        length: (pdu.len() + 1) as u16,
        unit_id: 1,
    };
    let mut frame = Vec::new();
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(pdu);
    stream.write_all(&frame).unwrap();

    let mut header_buf = [0u8; MbapHeader::SIZE];
    stream.read_exact(&mut header_buf).unwrap();
    let resp_header = MbapHeader::from_bytes(&header_buf);
    let mut pdu_buf = vec![0u8; resp_header.length as usize - 1];
    stream.read_exact(&mut pdu_buf).unwrap();

    assert_eq!(resp_header.transaction_id, transaction_id);
    pdu_buf
}

#[test]
fn write_then_read_holding_registers_round_trip() {
    let memory = Arc::new(MemoryImage::new(0, 16, 0, 0));
    let port = spawn_server(memory, false);
    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();

    let write_resp = send_request(&mut client, 1, &[0x06, 0x00, 0x05, 0x00, 0x2A]);
    assert_eq!(write_resp[0], 0x06);

    let read_resp = send_request(&mut client, 2, &[0x03, 0x00, 0x05, 0x00, 0x01]);
    assert_eq!(read_resp[0], 0x03);
    assert_eq!(u16::from_be_bytes([read_resp[2], read_resp[3]]), 0x2A);
}

#[test]
fn write_multiple_coils_then_read_them_back() {
    let memory = Arc::new(MemoryImage::new(32, 0, 0, 0));
    let port = spawn_server(memory, false);
    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();

    // set coils 0,2,4 of a 6-coil window: byte = 0b00010101
    let write_resp = send_request(
        &mut client,
        10,
        &[0x0F, 0x00, 0x00, 0x00, 0x06, 0x01, 0b0001_0101],
    );
    assert_eq!(write_resp[0], 0x0F);

    let read_resp = send_request(&mut client, 11, &[0x01, 0x00, 0x00, 0x00, 0x06]);
    assert_eq!(read_resp[0], 0x01);
    assert_eq!(read_resp[2], 0b0001_0101);
}

#[test]
fn unsupported_function_code_yields_exception_but_keeps_connection_open() {
    let memory = Arc::new(MemoryImage::new(0, 4, 0, 0));
    let port = spawn_server(memory, false);
    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();

    let resp = send_request(&mut client, 20, &[0x07, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(resp[0], 0x07 | 0x80);
    assert_eq!(resp[1], 0x01);

    // connection must still answer a normal request afterward.
    let resp2 = send_request(&mut client, 21, &[0x06, 0x00, 0x00, 0x00, 0x09]);
    assert_eq!(resp2[0], 0x06);
}

#[test]
fn out_of_range_read_yields_illegal_data_address() {
    let memory = Arc::new(MemoryImage::new(0, 4, 0, 0));
    let port = spawn_server(memory, false);
    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();

    let resp = send_request(&mut client, 30, &[0x03, 0x00, 0x00, 0x00, 0x10]);
    assert_eq!(resp[0], 0x03 | 0x80);
    assert_eq!(resp[1], 0x02);
}

#[test]
fn one_shot_module_closes_after_single_request() {
    let memory = Arc::new(MemoryImage::new(0, 4, 0, 0));
    let port = spawn_server(memory, true);
    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();

    let resp = send_request(&mut client, 40, &[0x06, 0x00, 0x00, 0x00, 0x01]);
    assert_eq!(resp[0], 0x06);

    // the server closes after one request; a second write may succeed at
    // the socket layer but the read must now observe EOF.
    let _ = client.write_all(&[0u8; 12]);
    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}
