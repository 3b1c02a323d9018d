//! Modbus/TCP server engine.
//!
//! Services a subset of the Modbus function codes against a shared
//! [`MemoryImage`](plc_memory::MemoryImage): coils and discrete inputs read
//! through the `bits` section, holding and input registers through the
//! `words16` section.
//!
//! - Read Coils (0x01)
//! - Read Holding Registers (0x03)
//! - Write Single Coil (0x05)
//! - Write Single Register (0x06)
//! - Write Multiple Coils (0x0F)
//! - Write Multiple Registers (0x10)
//!
//! Any other function code, or any malformed field within a recognized
//! request, yields a Modbus exception response rather than dropping the
//! connection.

use std::fmt;
use std::sync::Arc;

use plc_common::PlcError;
use plc_memory::MemoryImage;
use tracing::{trace, warn};

/// Header that precedes every Modbus/TCP PDU on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Echoed back verbatim so the client can match responses to requests.
    pub transaction_id: u16,
    /// Always 0 for Modbus.
    pub protocol_id: u16,
    /// Byte count of everything following this field (unit ID + PDU).
    pub length: u16,
    /// Unit/slave identifier, echoed back verbatim.
    pub unit_id: u8,
}

impl MbapHeader {
    /// Size in bytes of the MBAP header on the wire.
    pub const SIZE: usize = 7;

    /// Build a response header for a PDU of `pdu_len` bytes, echoing
    /// `transaction_id` and `unit_id` from the request.
    #[must_use]
    pub fn for_response(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    /// Serialize to the 7-byte wire representation.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
        buf[6] = self.unit_id;
        buf
    }

    /// Parse from the 7-byte wire representation.
    #[must_use]
    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
            protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            unit_id: buf[6],
        }
    }
}

/// Recognized Modbus function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01).
    ReadCoils = 0x01,
    /// Read Holding Registers (0x03).
    ReadHoldingRegisters = 0x03,
    /// Write Single Coil (0x05).
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06).
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F).
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10).
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::ReadCoils),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }
}

/// Modbus exception codes. This engine only ever emits
/// `IllegalFunction`/`IllegalDataAddress`/`IllegalDataValue`; the rest are
/// carried for completeness and wire-level `Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// The function code is not implemented by this engine.
    IllegalFunction = 0x01,
    /// The request addresses data outside the memory image.
    IllegalDataAddress = 0x02,
    /// A field within a recognized request held an invalid value.
    IllegalDataValue = 0x03,
    /// Server device failure.
    ServerDeviceFailure = 0x04,
    /// Acknowledge (request accepted, processing).
    Acknowledge = 0x05,
    /// Server device busy.
    ServerDeviceBusy = 0x06,
    /// Negative acknowledge.
    NegativeAcknowledge = 0x07,
    /// Memory parity error.
    MemoryParityError = 0x08,
    /// Gateway path unavailable.
    GatewayPathUnavailable = 0x0A,
    /// Gateway target device failed to respond.
    GatewayTargetFailed = 0x0B,
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::ServerDeviceFailure => "server device failure",
            Self::Acknowledge => "acknowledge",
            Self::ServerDeviceBusy => "server device busy",
            Self::NegativeAcknowledge => "negative acknowledge",
            Self::MemoryParityError => "memory parity error",
            Self::GatewayPathUnavailable => "gateway path unavailable",
            Self::GatewayTargetFailed => "gateway target device failed to respond",
        };
        write!(f, "{text}")
    }
}

fn u16_at(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn exception_pdu(fc: u8, code: ExceptionCode) -> Vec<u8> {
    vec![fc | 0x80, code as u8]
}

/// A Modbus server bound to one [`MemoryImage`].
///
/// Cheap to clone: the memory image is reference-counted, so each accepted
/// connection can hold its own `ModbusModule` without sharing mutable state
/// beyond the image's own lock.
#[derive(Clone)]
pub struct ModbusModule {
    memory: Arc<MemoryImage>,
}

impl ModbusModule {
    /// Build a module servicing requests against `memory`.
    #[must_use]
    pub fn new(memory: Arc<MemoryImage>) -> Self {
        Self { memory }
    }

    /// Service one PDU (function code byte followed by its data), returning
    /// the response PDU -- a normal response, or an exception response with
    /// the high bit of the function code set.
    #[must_use]
    pub fn process_pdu(&self, pdu: &[u8]) -> Vec<u8> {
        let Some(&fc_byte) = pdu.first() else {
            return exception_pdu(0, ExceptionCode::IllegalFunction);
        };
        let data = &pdu[1..];
        match FunctionCode::from_byte(fc_byte) {
            Some(FunctionCode::ReadCoils) => self.read_coils(data),
            Some(FunctionCode::ReadHoldingRegisters) => self.read_holding_registers(data),
            Some(FunctionCode::WriteSingleCoil) => self.write_single_coil(data),
            Some(FunctionCode::WriteSingleRegister) => self.write_single_register(data),
            Some(FunctionCode::WriteMultipleCoils) => self.write_multiple_coils(data),
            Some(FunctionCode::WriteMultipleRegisters) => self.write_multiple_registers(data),
            None => {
                let err = PlcError::UnsupportedFunction(fc_byte);
                trace!(error = %err, "unsupported function code");
                exception_pdu(fc_byte, ExceptionCode::IllegalFunction)
            }
        }
    }

    fn read_coils(&self, data: &[u8]) -> Vec<u8> {
        let (Some(addr), Some(qty)) = (u16_at(data, 0), u16_at(data, 2)) else {
            return exception_pdu(0x01, ExceptionCode::IllegalDataValue);
        };
        // get_bits already returns requested bits in ascending order regardless of
        // the memory image's internal right-to-left byte layout, so no separate
        // byte-order reversal is needed when packing the wire response.
        match self.memory.get_bits(addr as usize, qty as usize) {
            Ok(bits) => {
                let byte_count = bits.len().div_ceil(8);
                let mut payload = vec![0u8; byte_count];
                for (i, set) in bits.iter().enumerate() {
                    if *set {
                        payload[i / 8] |= 1 << (i % 8);
                    }
                }
                let mut resp = Vec::with_capacity(2 + payload.len());
                resp.push(0x01);
                resp.push(byte_count as u8);
                resp.extend(payload);
                resp
            }
            Err(e) => {
                warn!(error = %e, "read coils out of bounds");
                exception_pdu(0x01, ExceptionCode::IllegalDataAddress)
            }
        }
    }

    fn read_holding_registers(&self, data: &[u8]) -> Vec<u8> {
        let (Some(addr), Some(qty)) = (u16_at(data, 0), u16_at(data, 2)) else {
            return exception_pdu(0x03, ExceptionCode::IllegalDataValue);
        };
        match self.memory.get_words16(addr as usize, qty as usize) {
            Ok(words) => {
                let mut resp = Vec::with_capacity(2 + words.len() * 2);
                resp.push(0x03);
                resp.push((words.len() * 2) as u8);
                for w in words {
                    resp.extend_from_slice(&w.to_be_bytes());
                }
                resp
            }
            Err(e) => {
                warn!(error = %e, "read holding registers out of bounds");
                exception_pdu(0x03, ExceptionCode::IllegalDataAddress)
            }
        }
    }

    fn write_single_coil(&self, data: &[u8]) -> Vec<u8> {
        let (Some(addr), Some(value)) = (u16_at(data, 0), u16_at(data, 2)) else {
            return exception_pdu(0x05, ExceptionCode::IllegalDataValue);
        };
        let on = match value {
            0xFF00 => true,
            0x0000 => false,
            _ => return exception_pdu(0x05, ExceptionCode::IllegalDataValue),
        };
        match self.memory.set_bits(addr as usize, &[on]) {
            Ok(()) => {
                let mut resp = vec![0x05];
                resp.extend_from_slice(&data[0..4]);
                resp
            }
            Err(e) => {
                warn!(error = %e, "write single coil out of bounds");
                exception_pdu(0x05, ExceptionCode::IllegalDataAddress)
            }
        }
    }

    fn write_single_register(&self, data: &[u8]) -> Vec<u8> {
        let (Some(addr), Some(value)) = (u16_at(data, 0), u16_at(data, 2)) else {
            return exception_pdu(0x06, ExceptionCode::IllegalDataValue);
        };
        match self.memory.set_words16(addr as usize, &[value]) {
            Ok(()) => {
                let mut resp = vec![0x06];
                resp.extend_from_slice(&data[0..4]);
                resp
            }
            Err(e) => {
                warn!(error = %e, "write single register out of bounds");
                exception_pdu(0x06, ExceptionCode::IllegalDataAddress)
            }
        }
    }

    fn write_multiple_coils(&self, data: &[u8]) -> Vec<u8> {
        let (Some(addr), Some(qty)) = (u16_at(data, 0), u16_at(data, 2)) else {
            return exception_pdu(0x0F, ExceptionCode::IllegalDataValue);
        };
        let Some(&byte_count) = data.get(4) else {
            return exception_pdu(0x0F, ExceptionCode::IllegalDataValue);
        };
        let expected = (qty as usize).div_ceil(8);
        if byte_count as usize != expected {
            return exception_pdu(0x0F, ExceptionCode::IllegalDataValue);
        }
        let Some(payload) = data.get(5..5 + byte_count as usize) else {
            return exception_pdu(0x0F, ExceptionCode::IllegalDataValue);
        };
        let bits: Vec<bool> = (0..qty as usize)
            .map(|i| (payload[i / 8] & (1 << (i % 8))) != 0)
            .collect();
        match self.memory.set_bits(addr as usize, &bits) {
            Ok(()) => {
                let mut resp = vec![0x0F];
                resp.extend_from_slice(&data[0..4]);
                resp
            }
            Err(e) => {
                warn!(error = %e, "write multiple coils out of bounds");
                exception_pdu(0x0F, ExceptionCode::IllegalDataAddress)
            }
        }
    }

    fn write_multiple_registers(&self, data: &[u8]) -> Vec<u8> {
        let (Some(addr), Some(qty)) = (u16_at(data, 0), u16_at(data, 2)) else {
            return exception_pdu(0x10, ExceptionCode::IllegalDataValue);
        };
        let Some(&byte_count) = data.get(4) else {
            return exception_pdu(0x10, ExceptionCode::IllegalDataValue);
        };
        if byte_count as usize != qty as usize * 2 {
            return exception_pdu(0x10, ExceptionCode::IllegalDataValue);
        }
        let Some(payload) = data.get(5..5 + byte_count as usize) else {
            return exception_pdu(0x10, ExceptionCode::IllegalDataValue);
        };
        let words: Vec<u16> = payload
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        match self.memory.set_words16(addr as usize, &words) {
            Ok(()) => {
                let mut resp = vec![0x10];
                resp.extend_from_slice(&data[0..4]);
                resp
            }
            Err(e) => {
                warn!(error = %e, "write multiple registers out of bounds");
                exception_pdu(0x10, ExceptionCode::IllegalDataAddress)
            }
        }
    }
}
