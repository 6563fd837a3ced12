use thiserror::Error;

/// Failures of a single meter exchange.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Fewer bytes arrived than a full response needs.
    #[error("response too short: {len} bytes, expected {expected}")]
    TooShort {
        /// Bytes received.
        len: usize,
        /// Bytes required.
        expected: usize,
    },

    /// Declared byte count smaller than the register block.
    #[error("byte count {declared}, expected {expected}")]
    ByteCount {
        /// Byte count field of the response.
        declared: u8,
        /// Data bytes required.
        expected: usize,
    },

    /// CRC trailer does not match.
    #[error("CRC mismatch")]
    BadCrc,

    /// Meter answered with an exception frame.
    #[error("Modbus exception 0x{code:02X}: {description}")]
    Exception {
        /// Exception code byte.
        code: u8,
        /// Human-readable exception name.
        description: String,
    },

    /// Response carries a function code other than the one requested.
    #[error("unexpected function code 0x{0:02X}")]
    UnexpectedFunction(u8),

    /// Nothing came back within the response window.
    #[error("no response from address 0x{address:02X}")]
    NoResponse {
        /// Address that was polled.
        address: u8,
    },

    /// Serial line failure.
    #[error("serial I/O error: {0}")]
    Io(String),
}
