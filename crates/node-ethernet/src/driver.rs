//! W5500 driver: network setup, link state, socket commands and buffered TX/RX.
//!
//! The controller runs the TCP stack itself; the driver only moves bytes
//! between its ring buffers and issues socket commands. Ring offsets are the
//! 16-bit hardware pointers masked to the buffer size, and transfers that
//! cross the end of a buffer are split in two.
//!
//! Every wait is bounded: command completion by `command_poll_limit` polls,
//! a full TX buffer by `send_stall_limit`, send completion by the caller's
//! timeout.

use crate::registers::{common, socket, Block, SocketCommand, SocketStatus, SOCKET_COUNT};
use crate::transport::RegisterTransport;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use node_common::config::{EthernetConfig, NetworkConfig};
use node_common::error::{NodeError, NodeResult};
use node_common::time::{as_millis, Clock};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Sleep between TX free-size polls while the buffer is full.
const TX_FULL_BACKOFF: Duration = Duration::from_millis(1);
/// Interval between interrupt-register polls while waiting for SEND_OK.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Driver for one W5500 on an SPI bus.
pub struct W5500<SPI, CS> {
    transport: RegisterTransport<SPI, CS>,
    clock: Arc<dyn Clock>,
    config: EthernetConfig,
}

impl<SPI, CS> std::fmt::Debug for W5500<SPI, CS> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("W5500")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<SPI, CS> W5500<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    /// Take ownership of the bus. Does not touch the chip beyond deselecting it.
    pub fn new(
        spi: SPI,
        cs: CS,
        clock: Arc<dyn Clock>,
        config: EthernetConfig,
    ) -> NodeResult<Self> {
        if !config.buffer_size.is_power_of_two() {
            return Err(NodeError::Config(format!(
                "socket buffer size {} is not a power of two",
                config.buffer_size
            )));
        }
        Ok(Self {
            transport: RegisterTransport::new(spi, cs)?,
            clock,
            config,
        })
    }

    /// Driver configuration.
    pub fn config(&self) -> &EthernetConfig {
        &self.config
    }

    /// Pulse the reset line low, release it and wait for the chip to settle.
    pub fn hardware_reset<RST: OutputPin>(&mut self, reset: &mut RST) -> NodeResult<()> {
        debug!("Resetting Ethernet controller");
        reset
            .set_low()
            .map_err(|e| NodeError::Gpio(format!("reset line: {e:?}")))?;
        self.clock.sleep(self.config.reset_pulse);
        reset
            .set_high()
            .map_err(|e| NodeError::Gpio(format!("reset line: {e:?}")))?;
        self.clock.sleep(self.config.reset_settle);
        Ok(())
    }

    /// Check the chip identity.
    ///
    /// # Errors
    ///
    /// [`NodeError::ChipNotFound`] when VERSIONR does not match the expected
    /// version. This is fatal: nothing else on the chip can be trusted.
    pub fn init(&mut self) -> NodeResult<u8> {
        let found = self.transport.read_byte(common::VERSIONR, Block::Common)?;
        let expected = self.config.expected_version;
        if found != expected {
            return Err(NodeError::ChipNotFound { found, expected });
        }
        info!(version = found, "Ethernet controller detected");
        Ok(found)
    }

    /// Write MAC, gateway, subnet and IP into the common registers.
    pub fn configure(&mut self, network: &NetworkConfig) -> NodeResult<()> {
        self.transport
            .write_bytes(common::SHAR, Block::Common, &network.mac.octets())?;
        self.transport
            .write_bytes(common::GAR, Block::Common, &network.gateway.octets())?;
        self.transport
            .write_bytes(common::SUBR, Block::Common, &network.subnet.octets())?;
        self.transport
            .write_bytes(common::SIPR, Block::Common, &network.ip.octets())?;
        info!(
            mac = %network.mac,
            ip = %network.ip,
            gateway = %network.gateway,
            subnet = %network.subnet,
            "Network configured"
        );
        Ok(())
    }

    /// Source IP as currently held by the chip.
    pub fn ip_address(&mut self) -> NodeResult<Ipv4Addr> {
        let mut octets = [0u8; 4];
        self.transport
            .read_into(common::SIPR, Block::Common, &mut octets)?;
        Ok(Ipv4Addr::from(octets))
    }

    /// PHY link status.
    pub fn link_up(&mut self) -> NodeResult<bool> {
        let phy = self.transport.read_byte(common::PHYCFGR, Block::Common)?;
        Ok(phy & common::PHY_LINK_UP != 0)
    }

    /// Poll the link at startup for `link_wait_attempts` intervals.
    pub fn wait_for_link(&mut self) -> NodeResult<bool> {
        for attempt in 0..self.config.link_wait_attempts {
            if self.link_up()? {
                debug!(attempt, "Link up");
                return Ok(true);
            }
            self.clock.sleep(self.config.link_wait_interval);
        }
        warn!(
            attempts = self.config.link_wait_attempts,
            "Link still down after startup wait"
        );
        Ok(false)
    }

    /// Current socket status.
    pub fn status(&mut self, socket: u8) -> NodeResult<SocketStatus> {
        check_socket(socket)?;
        let code = self
            .transport
            .read_byte(socket::SR, Block::Socket(socket))?;
        Ok(SocketStatus::from_code(code))
    }

    /// Open `socket` in TCP mode on `port`.
    ///
    /// # Errors
    ///
    /// [`NodeError::UnexpectedStatus`] if the socket does not reach INIT.
    pub fn open(&mut self, socket: u8, port: u16) -> NodeResult<()> {
        check_socket(socket)?;
        let block = Block::Socket(socket);
        self.transport
            .write_byte(socket::MR, block, socket::MODE_TCP)?;
        self.transport.write_u16(socket::PORT, block, port)?;
        self.command(socket, SocketCommand::Open)?;
        self.expect_status(socket, SocketStatus::Init)?;
        debug!(socket, port, "Socket opened");
        Ok(())
    }

    /// Put an opened socket into LISTEN.
    ///
    /// # Errors
    ///
    /// [`NodeError::UnexpectedStatus`] if the socket does not reach LISTEN.
    pub fn listen(&mut self, socket: u8) -> NodeResult<()> {
        check_socket(socket)?;
        self.command(socket, SocketCommand::Listen)?;
        self.expect_status(socket, SocketStatus::Listen)?;
        debug!(socket, "Socket listening");
        Ok(())
    }

    /// Graceful disconnect.
    pub fn disconnect(&mut self, socket: u8) -> NodeResult<()> {
        check_socket(socket)?;
        self.command(socket, SocketCommand::Disconnect)
    }

    /// Immediate close.
    pub fn close(&mut self, socket: u8) -> NodeResult<()> {
        check_socket(socket)?;
        self.command(socket, SocketCommand::Close)
    }

    /// Bytes waiting in the RX buffer.
    pub fn recv_available(&mut self, socket: u8) -> NodeResult<u16> {
        check_socket(socket)?;
        self.transport
            .read_u16(socket::RX_RSR, Block::Socket(socket))
    }

    /// Take up to `max_len` received bytes. Returns empty when nothing is
    /// waiting; never blocks for data.
    pub fn recv(&mut self, socket: u8, max_len: usize) -> NodeResult<Vec<u8>> {
        let available = usize::from(self.recv_available(socket)?);
        let len = available.min(max_len);
        if len == 0 {
            return Ok(Vec::new());
        }

        let block = Block::Socket(socket);
        let ptr = self.transport.read_u16(socket::RX_RD, block)?;
        let mut data = vec![0u8; len];
        self.buffer_read(Block::RxBuffer(socket), ptr, &mut data)?;
        self.transport
            .write_u16(socket::RX_RD, block, ptr.wrapping_add(len_u16(len)))?;
        self.command(socket, SocketCommand::Recv)?;

        trace!(socket, len, ptr, "Received");
        Ok(data)
    }

    /// Queue `data` for transmission, chunked by `max_chunk` and TX free size.
    ///
    /// # Errors
    ///
    /// [`NodeError::SendStalled`] if the TX buffer reports no free space for
    /// longer than `send_stall_limit`.
    pub fn send(&mut self, socket: u8, data: &[u8]) -> NodeResult<usize> {
        check_socket(socket)?;
        let block = Block::Socket(socket);
        let stall_limit = as_millis(self.config.send_stall_limit);
        let mut sent = 0;
        let mut full_since: Option<u64> = None;

        while sent < data.len() {
            let free = usize::from(self.transport.read_u16(socket::TX_FSR, block)?);
            if free == 0 {
                let since = *full_since.get_or_insert_with(|| self.clock.now_ms());
                if self.clock.elapsed_since(since) >= stall_limit {
                    warn!(socket, sent, total = data.len(), "TX buffer stalled");
                    return Err(NodeError::SendStalled {
                        socket,
                        sent,
                        total: data.len(),
                    });
                }
                self.clock.sleep(TX_FULL_BACKOFF);
                continue;
            }
            full_since = None;

            let chunk = (data.len() - sent).min(free).min(self.config.max_chunk);
            let ptr = self.transport.read_u16(socket::TX_WR, block)?;
            self.buffer_write(Block::TxBuffer(socket), ptr, &data[sent..sent + chunk])?;
            self.transport
                .write_u16(socket::TX_WR, block, ptr.wrapping_add(len_u16(chunk)))?;
            self.command(socket, SocketCommand::Send)?;

            trace!(socket, chunk, ptr, "Queued");
            sent += chunk;
        }
        Ok(sent)
    }

    /// Wait for SEND_OK (true) or TIMEOUT (false), clearing whichever fired.
    /// Returns false if neither fires within `timeout`.
    pub fn wait_send_complete(&mut self, socket: u8, timeout: Duration) -> NodeResult<bool> {
        check_socket(socket)?;
        let block = Block::Socket(socket);
        let start = self.clock.now_ms();
        let limit = as_millis(timeout);

        loop {
            let ir = self.transport.read_byte(socket::IR, block)?;
            if ir & socket::IR_SEND_OK != 0 {
                self.transport
                    .write_byte(socket::IR, block, socket::IR_SEND_OK)?;
                return Ok(true);
            }
            if ir & socket::IR_TIMEOUT != 0 {
                self.transport
                    .write_byte(socket::IR, block, socket::IR_TIMEOUT)?;
                debug!(socket, "Send timed out at peer");
                return Ok(false);
            }
            if self.clock.elapsed_since(start) >= limit {
                return Ok(false);
            }
            self.clock.sleep(SEND_POLL_INTERVAL);
        }
    }

    /// True while the last SEND has not been acknowledged. Does not wait.
    ///
    /// An observed SEND_OK is consumed, so the next send starts pending.
    pub fn tx_pending(&mut self, socket: u8) -> NodeResult<bool> {
        check_socket(socket)?;
        let block = Block::Socket(socket);
        let ir = self.transport.read_byte(socket::IR, block)?;
        if ir & socket::IR_SEND_OK == 0 {
            return Ok(true);
        }
        self.transport
            .write_byte(socket::IR, block, socket::IR_SEND_OK)?;
        Ok(false)
    }

    /// Give the bus back.
    pub fn release(self) -> (SPI, CS) {
        self.transport.release()
    }

    fn command(&mut self, socket: u8, command: SocketCommand) -> NodeResult<()> {
        let block = Block::Socket(socket);
        self.transport
            .write_byte(socket::CR, block, command as u8)?;

        let limit = self.config.command_poll_limit;
        for _ in 0..limit {
            if self.transport.read_byte(socket::CR, block)? == 0 {
                return Ok(());
            }
        }
        Err(NodeError::CommandTimeout {
            socket,
            command: command as u8,
            polls: limit,
        })
    }

    fn expect_status(&mut self, socket: u8, expected: SocketStatus) -> NodeResult<()> {
        let actual = self.status(socket)?;
        if actual == expected {
            Ok(())
        } else {
            Err(NodeError::UnexpectedStatus {
                socket,
                expected: expected.code(),
                actual: actual.code(),
            })
        }
    }

    fn buffer_read(&mut self, block: Block, ptr: u16, buf: &mut [u8]) -> NodeResult<()> {
        let (offset, first) = self.split(ptr, buf.len());
        let (head, tail) = buf.split_at_mut(first);
        self.transport.read_into(offset, block, head)?;
        self.transport.read_into(0, block, tail)
    }

    fn buffer_write(&mut self, block: Block, ptr: u16, data: &[u8]) -> NodeResult<()> {
        let (offset, first) = self.split(ptr, data.len());
        let (head, tail) = data.split_at(first);
        self.transport.write_bytes(offset, block, head)?;
        self.transport.write_bytes(0, block, tail)
    }

    /// Buffer offset for `ptr` and how many of `len` bytes fit before the end.
    fn split(&self, ptr: u16, len: usize) -> (u16, usize) {
        let size = self.config.buffer_size;
        let offset = ptr & (size - 1);
        let room = usize::from(size - offset);
        (offset, len.min(room))
    }
}

fn check_socket(socket: u8) -> NodeResult<()> {
    if socket < SOCKET_COUNT {
        Ok(())
    } else {
        Err(NodeError::Config(format!("socket {socket} out of range")))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn len_u16(len: usize) -> u16 {
    // Lengths are bounded by TX free size or RX received size, both u16.
    len as u16
}

#[cfg(all(test, feature = "simulated"))]
mod tests {
    use super::*;
    use crate::sim::SimulatedW5500;
    use node_common::time::ManualClock;

    fn driver(sim: &SimulatedW5500) -> W5500<crate::sim::SimSpi, crate::sim::SimChipSelect> {
        W5500::new(
            sim.bus(),
            sim.chip_select(),
            Arc::new(ManualClock::new(0)),
            EthernetConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_split_at_buffer_end() {
        let sim = SimulatedW5500::new();
        let eth = driver(&sim);
        assert_eq!(eth.split(0x07FE, 10), (0x07FE, 2));
        assert_eq!(eth.split(0x0800, 10), (0x0000, 10));
        assert_eq!(eth.split(0xFFFF, 1), (0x07FF, 1));
    }

    #[test]
    fn test_socket_index_checked() {
        let sim = SimulatedW5500::new();
        let mut eth = driver(&sim);
        assert!(matches!(eth.status(8), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_rejects_non_power_of_two_buffer() {
        let sim = SimulatedW5500::new();
        let config = EthernetConfig {
            buffer_size: 3000,
            ..EthernetConfig::default()
        };
        let result = W5500::new(
            sim.bus(),
            sim.chip_select(),
            Arc::new(ManualClock::new(0)),
            config,
        );
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
