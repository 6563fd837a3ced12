use thiserror::Error;

/// Node error types covering bus access, the Ethernet controller and peripherals.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// SPI bus transfer failed.
    #[error("bus error: {0}")]
    Bus(String),

    /// GPIO line could not be driven or read.
    #[error("gpio error: {0}")]
    Gpio(String),

    /// The Ethernet controller did not identify itself.
    #[error("ethernet controller not found: version 0x{found:02X}, expected 0x{expected:02X}")]
    ChipNotFound {
        /// Version byte read from the chip.
        found: u8,
        /// Version byte the driver expects.
        expected: u8,
    },

    /// A socket command register did not self-clear in time.
    #[error("socket {socket} command 0x{command:02X} did not complete after {polls} polls")]
    CommandTimeout {
        /// Socket index.
        socket: u8,
        /// Command byte written to the command register.
        command: u8,
        /// Number of polls performed.
        polls: u32,
    },

    /// Socket did not reach the status expected after a command.
    #[error("socket {socket} in status 0x{actual:02X}, expected 0x{expected:02X}")]
    UnexpectedStatus {
        /// Socket index.
        socket: u8,
        /// Expected status code.
        expected: u8,
        /// Observed status code.
        actual: u8,
    },

    /// TX buffer stayed full for longer than the stall limit.
    #[error("socket {socket} send stalled after {sent} of {total} bytes")]
    SendStalled {
        /// Socket index.
        socket: u8,
        /// Bytes handed to the chip before stalling.
        sent: usize,
        /// Total bytes requested.
        total: usize,
    },

    /// Invalid lifecycle transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Peripheral sensor failure.
    #[error("sensor error: {0}")]
    Sensor(String),

    /// I/O operation error.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Convenience type alias for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
