//! W5500 register map, block selection and socket codes.

use std::fmt;

/// Control-phase read/write bit.
pub const CONTROL_READ: u8 = 0x00;
/// Control-phase read/write bit.
pub const CONTROL_WRITE: u8 = 0x04;

/// Number of hardware socket slots.
pub const SOCKET_COUNT: u8 = 8;

/// Address space targeted by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Block {
    /// Common registers (network configuration, PHY, version).
    Common,
    /// Control registers of socket `n`.
    Socket(u8),
    /// TX buffer of socket `n`.
    TxBuffer(u8),
    /// RX buffer of socket `n`.
    RxBuffer(u8),
}

impl Block {
    /// Socket index addressed by this block, if any.
    #[must_use]
    pub fn socket(self) -> Option<u8> {
        match self {
            Self::Common => None,
            Self::Socket(n) | Self::TxBuffer(n) | Self::RxBuffer(n) => Some(n),
        }
    }

    /// Whether the block exists on the chip.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.socket().map_or(true, |n| n < SOCKET_COUNT)
    }

    /// Block-select bits placed in the control byte (`bsb << 3`). Only
    /// meaningful for valid blocks.
    pub(crate) fn select_bits(self) -> u8 {
        match self {
            Self::Common => 0x00,
            Self::Socket(n) => (n << 2) + 1,
            Self::TxBuffer(n) => (n << 2) + 2,
            Self::RxBuffer(n) => (n << 2) + 3,
        }
    }

    /// Block for the five block-select bits of a control byte.
    #[must_use]
    pub fn from_select_bits(bits: u8) -> Self {
        let socket = bits >> 2;
        match bits & 0x03 {
            1 => Self::Socket(socket),
            2 => Self::TxBuffer(socket),
            3 => Self::RxBuffer(socket),
            _ => Self::Common,
        }
    }
}

/// Common register offsets.
pub mod common {
    /// Mode register.
    pub const MR: u16 = 0x0000;
    /// Gateway address (4 bytes).
    pub const GAR: u16 = 0x0001;
    /// Subnet mask (4 bytes).
    pub const SUBR: u16 = 0x0005;
    /// Source hardware address (6 bytes).
    pub const SHAR: u16 = 0x0009;
    /// Source IP address (4 bytes).
    pub const SIPR: u16 = 0x000F;
    /// PHY configuration; bit 0 is link status.
    pub const PHYCFGR: u16 = 0x002E;
    /// Chip version.
    pub const VERSIONR: u16 = 0x0039;

    /// PHYCFGR link-up bit.
    pub const PHY_LINK_UP: u8 = 0x01;
}

/// Socket register offsets within a socket control block.
pub mod socket {
    /// Socket mode.
    pub const MR: u16 = 0x0000;
    /// Socket command (self-clearing).
    pub const CR: u16 = 0x0001;
    /// Socket interrupt (write 1 to clear).
    pub const IR: u16 = 0x0002;
    /// Socket status.
    pub const SR: u16 = 0x0003;
    /// Source port (2 bytes).
    pub const PORT: u16 = 0x0004;
    /// TX free size (2 bytes).
    pub const TX_FSR: u16 = 0x0020;
    /// TX read pointer (2 bytes).
    pub const TX_RD: u16 = 0x0022;
    /// TX write pointer (2 bytes).
    pub const TX_WR: u16 = 0x0024;
    /// RX received size (2 bytes).
    pub const RX_RSR: u16 = 0x0026;
    /// RX read pointer (2 bytes).
    pub const RX_RD: u16 = 0x0028;
    /// RX write pointer (2 bytes).
    pub const RX_WR: u16 = 0x002A;

    /// TCP mode value for MR.
    pub const MODE_TCP: u8 = 0x01;

    /// IR bit: data sent.
    pub const IR_SEND_OK: u8 = 0x10;
    /// IR bit: ARP/TCP timeout.
    pub const IR_TIMEOUT: u8 = 0x08;
}

/// Commands accepted by a socket's command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketCommand {
    /// Initialize the socket in the mode set by MR.
    Open = 0x01,
    /// Wait for a peer (TCP server).
    Listen = 0x02,
    /// Connect to a peer (TCP client).
    Connect = 0x04,
    /// Graceful disconnect (FIN).
    Disconnect = 0x08,
    /// Close immediately.
    Close = 0x10,
    /// Transmit TX buffer contents up to TX_WR.
    Send = 0x20,
    /// Acknowledge RX buffer consumption up to RX_RD.
    Recv = 0x40,
}

impl SocketCommand {
    /// Parse a command byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Open),
            0x02 => Some(Self::Listen),
            0x04 => Some(Self::Connect),
            0x08 => Some(Self::Disconnect),
            0x10 => Some(Self::Close),
            0x20 => Some(Self::Send),
            0x40 => Some(Self::Recv),
            _ => None,
        }
    }
}

/// Socket status as reported by SR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketStatus {
    /// 0x00
    Closed,
    /// 0x13: opened in TCP mode, not yet listening.
    Init,
    /// 0x14: waiting for a peer.
    Listen,
    /// 0x17: connected.
    Established,
    /// 0x1C: peer sent FIN.
    CloseWait,
    /// Any transitional or unexpected code.
    Other(u8),
}

impl SocketStatus {
    /// Status byte for CLOSED.
    pub const CLOSED: u8 = 0x00;
    /// Status byte for INIT.
    pub const INIT: u8 = 0x13;
    /// Status byte for LISTEN.
    pub const LISTEN: u8 = 0x14;
    /// Status byte for ESTABLISHED.
    pub const ESTABLISHED: u8 = 0x17;
    /// Status byte for CLOSE_WAIT.
    pub const CLOSE_WAIT: u8 = 0x1C;

    /// Decode a status byte.
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            Self::CLOSED => Self::Closed,
            Self::INIT => Self::Init,
            Self::LISTEN => Self::Listen,
            Self::ESTABLISHED => Self::Established,
            Self::CLOSE_WAIT => Self::CloseWait,
            other => Self::Other(other),
        }
    }

    /// Encode back to the status byte.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Closed => Self::CLOSED,
            Self::Init => Self::INIT,
            Self::Listen => Self::LISTEN,
            Self::Established => Self::ESTABLISHED,
            Self::CloseWait => Self::CLOSE_WAIT,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for SocketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Init => write!(f, "INIT"),
            Self::Listen => write!(f, "LISTEN"),
            Self::Established => write!(f, "ESTABLISHED"),
            Self::CloseWait => write!(f, "CLOSE_WAIT"),
            Self::Other(code) => write!(f, "0x{code:02X}"),
        }
    }
}
