use thiserror::Error;

/// Error types covering memory-image access, Modbus servicing, and startup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlcError {
    /// An access fell outside the bounds of a memory section.
    #[error("out of bounds: section {section}, addr {addr}, count {count}")]
    OutOfBounds {
        /// Name of the memory section accessed.
        section: String,
        /// Starting address of the access.
        addr: usize,
        /// Number of words or bits requested.
        count: usize,
    },

    /// The named memory section does not exist.
    #[error("unknown memory section: {0}")]
    UnknownSection(String),

    /// A Modbus request's fragmented receive did not reach the required length.
    #[error("short read: expected at least {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes required to service the request.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },

    /// A received frame had a field value this engine does not accept.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The requested Modbus function code is not implemented.
    #[error("unsupported function code: {0:#04x}")]
    UnsupportedFunction(u8),

    /// A socket operation failed.
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// The configuration document was malformed or internally inconsistent.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for PlcError {
    fn from(e: std::io::Error) -> Self {
        PlcError::IoFailure(e.to_string())
    }
}

/// Convenience type alias for PLC operations.
pub type PlcResult<T> = Result<T, PlcError>;
