//! Fieldbus plane: the Modbus/TCP protocol engine and the registry that
//! binds it to listening ports.
//!
//! - [`message`] fragmented-receive helpers shared by the transport loop
//! - [`modbus`] the MBAP framing and function-code engine
//! - [`registry`] maps ports to modules and drives one connection to completion

pub mod message;
pub mod modbus;
pub mod registry;

pub use message::recv_fragment;
pub use modbus::{ExceptionCode, FunctionCode, MbapHeader, ModbusModule};
pub use registry::FieldbusRegistry;
