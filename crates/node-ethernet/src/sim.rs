//! Simulated W5500 for tests and host runs.
//!
//! Decodes the same SPI frames real silicon does and models the parts of the
//! chip the driver relies on: common registers, per-socket registers, TX/RX
//! ring buffers with wrapping pointers, self-clearing commands and the
//! socket state machine. The remote TCP peer is driven from the test side
//! with [`SimulatedW5500::peer_connect`] and friends.

use crate::registers::{common, socket, Block, SocketCommand, SocketStatus, SOCKET_COUNT};
use core::convert::Infallible;
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_hal::spi::{ErrorType, SpiBus};
use std::cell::RefCell;
use std::rc::Rc;

const COMMON_SIZE: usize = 0x40;
const SOCKET_REG_SIZE: usize = 0x30;

/// Command latency that never completes.
pub const STUCK: u32 = u32::MAX;

#[derive(Debug)]
struct SocketState {
    regs: [u8; SOCKET_REG_SIZE],
    tx: Vec<u8>,
    rx: Vec<u8>,
    outbound: Vec<u8>,
    busy_polls: u32,
    commands: Vec<SocketCommand>,
    history: Vec<SocketStatus>,
}

impl SocketState {
    fn new(buffer_size: usize) -> Self {
        Self {
            regs: [0; SOCKET_REG_SIZE],
            tx: vec![0; buffer_size],
            rx: vec![0; buffer_size],
            outbound: Vec::new(),
            busy_polls: 0,
            commands: Vec::new(),
            history: Vec::new(),
        }
    }

    fn reg_u16(&self, addr: u16) -> u16 {
        let i = usize::from(addr);
        u16::from_be_bytes([self.regs[i], self.regs[i + 1]])
    }

    fn set_reg_u16(&mut self, addr: u16, value: u16) {
        let i = usize::from(addr);
        self.regs[i..i + 2].copy_from_slice(&value.to_be_bytes());
    }

    fn status(&self) -> SocketStatus {
        SocketStatus::from_code(self.regs[usize::from(socket::SR)])
    }

    fn enter(&mut self, status: SocketStatus) {
        self.regs[usize::from(socket::SR)] = status.code();
        self.history.push(status);
    }

    fn received(&self) -> u16 {
        self.reg_u16(socket::RX_WR)
            .wrapping_sub(self.reg_u16(socket::RX_RD))
    }
}

#[derive(Debug)]
struct Frame {
    header: Vec<u8>,
    addr: u16,
    block: Block,
    write: bool,
}

#[derive(Debug)]
struct ChipState {
    common: [u8; COMMON_SIZE],
    sockets: Vec<SocketState>,
    buffer_size: usize,
    version: u8,
    link_up: bool,
    command_latency: u32,
    tx_stalled: bool,
    frame: Option<Frame>,
    in_reset: bool,
    resets: u32,
    transactions: u64,
}

impl ChipState {
    fn new(buffer_size: usize) -> Self {
        Self {
            common: [0; COMMON_SIZE],
            sockets: (0..SOCKET_COUNT)
                .map(|_| SocketState::new(buffer_size))
                .collect(),
            buffer_size,
            version: 0x04,
            link_up: true,
            command_latency: 0,
            tx_stalled: false,
            frame: None,
            in_reset: false,
            resets: 0,
            transactions: 0,
        }
    }

    fn power_on_reset(&mut self) {
        self.common = [0; COMMON_SIZE];
        let size = self.buffer_size;
        for s in &mut self.sockets {
            *s = SocketState::new(size);
        }
        self.resets += 1;
    }

    fn begin(&mut self) {
        self.transactions += 1;
        self.frame = Some(Frame {
            header: Vec::with_capacity(3),
            addr: 0,
            block: Block::Common,
            write: false,
        });
    }

    fn end(&mut self) {
        self.frame = None;
    }

    /// Feed one byte shifted out by the master.
    fn shift_in(&mut self, byte: u8) {
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        if frame.header.len() < 3 {
            frame.header.push(byte);
            if frame.header.len() == 3 {
                frame.addr = u16::from_be_bytes([frame.header[0], frame.header[1]]);
                frame.block = Block::from_select_bits(frame.header[2] >> 3);
                frame.write = frame.header[2] & 0x04 != 0;
            }
            return;
        }
        if !frame.write {
            return;
        }
        let (addr, block) = (frame.addr, frame.block);
        frame.addr = frame.addr.wrapping_add(1);
        self.store(block, addr, byte);
    }

    /// Produce the byte the chip shifts out during a read data phase.
    fn shift_out(&mut self) -> u8 {
        let Some(frame) = self.frame.as_mut() else {
            return 0xFF;
        };
        if frame.header.len() < 3 || frame.write {
            return 0x00;
        }
        let (addr, block) = (frame.addr, frame.block);
        frame.addr = frame.addr.wrapping_add(1);
        self.load(block, addr)
    }

    fn mask(&self, addr: u16) -> usize {
        usize::from(addr) & (self.buffer_size - 1)
    }

    fn load(&mut self, block: Block, addr: u16) -> u8 {
        match block {
            Block::Common => match addr {
                common::PHYCFGR => u8::from(self.link_up),
                common::VERSIONR => self.version,
                a => self.common.get(usize::from(a)).copied().unwrap_or(0),
            },
            Block::Socket(n) => self.load_socket(n, addr),
            Block::TxBuffer(n) => {
                let i = self.mask(addr);
                self.sockets[usize::from(n)].tx[i]
            }
            Block::RxBuffer(n) => {
                let i = self.mask(addr);
                self.sockets[usize::from(n)].rx[i]
            }
        }
    }

    fn load_socket(&mut self, n: u8, addr: u16) -> u8 {
        let size = self.buffer_size;
        let stalled = self.tx_stalled;
        let s = &mut self.sockets[usize::from(n)];
        match addr {
            socket::CR => {
                if s.busy_polls == 0 {
                    s.regs[usize::from(socket::CR)] = 0;
                } else if s.busy_polls != STUCK {
                    s.busy_polls -= 1;
                }
                s.regs[usize::from(socket::CR)]
            }
            a if a == socket::TX_FSR || a == socket::TX_FSR + 1 => {
                let used = s
                    .reg_u16(socket::TX_WR)
                    .wrapping_sub(s.reg_u16(socket::TX_RD));
                #[allow(clippy::cast_possible_truncation)]
                let free = if stalled {
                    0
                } else {
                    (size as u16).saturating_sub(used)
                };
                free.to_be_bytes()[usize::from(a - socket::TX_FSR)]
            }
            a if a == socket::RX_RSR || a == socket::RX_RSR + 1 => {
                s.received().to_be_bytes()[usize::from(a - socket::RX_RSR)]
            }
            a => s.regs.get(usize::from(a)).copied().unwrap_or(0),
        }
    }

    fn store(&mut self, block: Block, addr: u16, value: u8) {
        match block {
            Block::Common => {
                if let Some(slot) = self.common.get_mut(usize::from(addr)) {
                    *slot = value;
                }
            }
            Block::Socket(n) => self.store_socket(n, addr, value),
            Block::TxBuffer(n) => {
                let i = self.mask(addr);
                self.sockets[usize::from(n)].tx[i] = value;
            }
            Block::RxBuffer(n) => {
                let i = self.mask(addr);
                self.sockets[usize::from(n)].rx[i] = value;
            }
        }
    }

    fn store_socket(&mut self, n: u8, addr: u16, value: u8) {
        let latency = self.command_latency;
        let s = &mut self.sockets[usize::from(n)];
        match addr {
            socket::CR => {
                s.regs[usize::from(socket::CR)] = value;
                s.busy_polls = latency;
                if let Some(command) = SocketCommand::from_byte(value) {
                    s.commands.push(command);
                    self.execute(n, command);
                }
            }
            socket::IR => s.regs[usize::from(socket::IR)] &= !value,
            socket::SR => {}
            a if (socket::TX_FSR..socket::TX_RD).contains(&a) => {}
            a if (socket::RX_RSR..socket::RX_RD).contains(&a) => {}
            a => {
                if let Some(slot) = s.regs.get_mut(usize::from(a)) {
                    *slot = value;
                }
            }
        }
    }

    fn execute(&mut self, n: u8, command: SocketCommand) {
        let size = self.buffer_size;
        let s = &mut self.sockets[usize::from(n)];
        match command {
            SocketCommand::Open => {
                if s.regs[usize::from(socket::MR)] & 0x0F == socket::MODE_TCP {
                    for reg in [socket::TX_RD, socket::TX_WR, socket::RX_RD, socket::RX_WR] {
                        s.set_reg_u16(reg, 0);
                    }
                    s.regs[usize::from(socket::IR)] = 0;
                    s.enter(SocketStatus::Init);
                }
            }
            SocketCommand::Listen => {
                if s.status() == SocketStatus::Init {
                    s.enter(SocketStatus::Listen);
                }
            }
            SocketCommand::Disconnect => {
                if matches!(
                    s.status(),
                    SocketStatus::Established | SocketStatus::CloseWait
                ) {
                    s.enter(SocketStatus::Closed);
                }
            }
            SocketCommand::Close => {
                if s.status() != SocketStatus::Closed {
                    s.enter(SocketStatus::Closed);
                }
            }
            SocketCommand::Send => {
                if matches!(
                    s.status(),
                    SocketStatus::Established | SocketStatus::CloseWait
                ) {
                    let mut rd = s.reg_u16(socket::TX_RD);
                    let wr = s.reg_u16(socket::TX_WR);
                    while rd != wr {
                        let byte = s.tx[usize::from(rd) & (size - 1)];
                        s.outbound.push(byte);
                        rd = rd.wrapping_add(1);
                    }
                    s.set_reg_u16(socket::TX_RD, rd);
                    s.regs[usize::from(socket::IR)] |= socket::IR_SEND_OK;
                } else {
                    s.regs[usize::from(socket::IR)] |= socket::IR_TIMEOUT;
                }
            }
            SocketCommand::Recv | SocketCommand::Connect => {}
        }
    }

    fn deliver(&mut self, n: u8, bytes: &[u8]) {
        let size = self.buffer_size;
        let s = &mut self.sockets[usize::from(n)];
        let mut wr = s.reg_u16(socket::RX_WR);
        for &b in bytes {
            s.rx[usize::from(wr) & (size - 1)] = b;
            wr = wr.wrapping_add(1);
        }
        s.set_reg_u16(socket::RX_WR, wr);
    }
}

/// Shared handle to the simulated chip. Clones refer to the same chip.
#[derive(Debug, Clone)]
pub struct SimulatedW5500 {
    chip: Rc<RefCell<ChipState>>,
}

impl Default for SimulatedW5500 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedW5500 {
    /// Chip with 2 KiB socket buffers, link up, version 0x04.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer_size(2048)
    }

    /// Chip with custom (power of two) socket buffers.
    #[must_use]
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        assert!(buffer_size.is_power_of_two(), "buffer size must be a power of two");
        Self {
            chip: Rc::new(RefCell::new(ChipState::new(buffer_size))),
        }
    }

    /// SPI bus connected to this chip.
    #[must_use]
    pub fn bus(&self) -> SimSpi {
        SimSpi {
            chip: Rc::clone(&self.chip),
        }
    }

    /// Chip-select line.
    #[must_use]
    pub fn chip_select(&self) -> SimChipSelect {
        SimChipSelect {
            chip: Rc::clone(&self.chip),
        }
    }

    /// Hardware reset line.
    #[must_use]
    pub fn reset_pin(&self) -> SimResetPin {
        SimResetPin {
            chip: Rc::clone(&self.chip),
        }
    }

    /// Override the VERSIONR value.
    pub fn set_version(&self, version: u8) {
        self.chip.borrow_mut().version = version;
    }

    /// Plug or unplug the cable.
    pub fn set_link(&self, up: bool) {
        self.chip.borrow_mut().link_up = up;
    }

    /// Number of CR polls before commands self-clear ([`STUCK`] for never).
    pub fn set_command_latency(&self, polls: u32) {
        self.chip.borrow_mut().command_latency = polls;
    }

    /// Report zero TX free space regardless of buffer state.
    pub fn set_tx_stalled(&self, stalled: bool) {
        self.chip.borrow_mut().tx_stalled = stalled;
    }

    /// Current status of `socket`.
    #[must_use]
    pub fn status(&self, socket: u8) -> SocketStatus {
        self.chip.borrow().sockets[usize::from(socket)].status()
    }

    /// Force a status code, e.g. a transitional state the driver must recover from.
    pub fn force_status(&self, socket: u8, code: u8) {
        self.chip.borrow_mut().sockets[usize::from(socket)].enter(SocketStatus::from_code(code));
    }

    /// Every status the socket entered, in order.
    #[must_use]
    pub fn status_history(&self, socket: u8) -> Vec<SocketStatus> {
        self.chip.borrow().sockets[usize::from(socket)].history.clone()
    }

    /// Every command issued to the socket, in order.
    #[must_use]
    pub fn commands(&self, socket: u8) -> Vec<SocketCommand> {
        self.chip.borrow().sockets[usize::from(socket)].commands.clone()
    }

    /// A remote peer connects to a listening socket and sends `request`.
    /// Returns false when the socket is not listening.
    pub fn peer_connect(&self, socket: u8, request: &[u8]) -> bool {
        let mut chip = self.chip.borrow_mut();
        let s = &mut chip.sockets[usize::from(socket)];
        if s.status() != SocketStatus::Listen {
            return false;
        }
        s.enter(SocketStatus::Established);
        chip.deliver(socket, request);
        true
    }

    /// The connected peer sends more bytes.
    pub fn peer_send(&self, socket: u8, bytes: &[u8]) {
        self.chip.borrow_mut().deliver(socket, bytes);
    }

    /// The peer sends FIN.
    pub fn peer_close(&self, socket: u8) {
        let mut chip = self.chip.borrow_mut();
        let s = &mut chip.sockets[usize::from(socket)];
        if s.status() == SocketStatus::Established {
            s.enter(SocketStatus::CloseWait);
        }
    }

    /// Drain what the chip has transmitted to the peer.
    pub fn take_sent(&self, socket: u8) -> Vec<u8> {
        std::mem::take(&mut self.chip.borrow_mut().sockets[usize::from(socket)].outbound)
    }

    /// Read raw common register bytes.
    #[must_use]
    pub fn common_bytes(&self, addr: u16, len: usize) -> Vec<u8> {
        let chip = self.chip.borrow();
        let start = usize::from(addr);
        chip.common[start..start + len].to_vec()
    }

    /// Read a 16-bit socket register.
    #[must_use]
    pub fn socket_u16(&self, socket: u8, addr: u16) -> u16 {
        self.chip.borrow().sockets[usize::from(socket)].reg_u16(addr)
    }

    /// Preset a 16-bit socket register, e.g. to start pointers near the wrap.
    pub fn set_socket_u16(&self, socket: u8, addr: u16, value: u16) {
        self.chip.borrow_mut().sockets[usize::from(socket)].set_reg_u16(addr, value);
    }

    /// Number of hardware resets seen on the reset line.
    #[must_use]
    pub fn resets(&self) -> u32 {
        self.chip.borrow().resets
    }

    /// Number of chip-select framed transactions.
    #[must_use]
    pub fn transactions(&self) -> u64 {
        self.chip.borrow().transactions
    }
}

/// SPI side of [`SimulatedW5500`].
#[derive(Debug)]
pub struct SimSpi {
    chip: Rc<RefCell<ChipState>>,
}

impl ErrorType for SimSpi {
    type Error = Infallible;
}

impl SpiBus for SimSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut chip = self.chip.borrow_mut();
        for w in words {
            *w = chip.shift_out();
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut chip = self.chip.borrow_mut();
        for &w in words {
            chip.shift_in(w);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.write(write)?;
        self.read(read)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut chip = self.chip.borrow_mut();
        for w in words {
            let header_done = chip.frame.as_ref().is_some_and(|f| f.header.len() == 3);
            let writing = chip.frame.as_ref().is_some_and(|f| f.write);
            if header_done && !writing {
                *w = chip.shift_out();
            } else {
                chip.shift_in(*w);
                *w = 0;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Chip-select line of [`SimulatedW5500`].
#[derive(Debug)]
pub struct SimChipSelect {
    chip: Rc<RefCell<ChipState>>,
}

impl PinErrorType for SimChipSelect {
    type Error = Infallible;
}

impl OutputPin for SimChipSelect {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.chip.borrow_mut().begin();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.chip.borrow_mut().end();
        Ok(())
    }
}

/// Reset line of [`SimulatedW5500`]. A low-to-high edge resets the chip.
#[derive(Debug)]
pub struct SimResetPin {
    chip: Rc<RefCell<ChipState>>,
}

impl PinErrorType for SimResetPin {
    type Error = Infallible;
}

impl OutputPin for SimResetPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.chip.borrow_mut().in_reset = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut chip = self.chip.borrow_mut();
        if chip.in_reset {
            chip.in_reset = false;
            chip.power_on_reset();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RegisterTransport;

    #[test]
    fn test_version_and_link_registers() {
        let sim = SimulatedW5500::new();
        let mut t = RegisterTransport::new(sim.bus(), sim.chip_select()).unwrap();
        assert_eq!(t.read_byte(common::VERSIONR, Block::Common).unwrap(), 0x04);
        assert_eq!(t.read_byte(common::PHYCFGR, Block::Common).unwrap() & 1, 1);

        sim.set_link(false);
        assert_eq!(t.read_byte(common::PHYCFGR, Block::Common).unwrap() & 1, 0);
    }

    #[test]
    fn test_interrupt_write_one_to_clear() {
        let sim = SimulatedW5500::new();
        let mut t = RegisterTransport::new(sim.bus(), sim.chip_select()).unwrap();
        let block = Block::Socket(0);
        {
            let mut chip = sim.chip.borrow_mut();
            chip.sockets[0].regs[usize::from(socket::IR)] =
                socket::IR_SEND_OK | socket::IR_TIMEOUT;
        }
        t.write_byte(socket::IR, block, socket::IR_SEND_OK).unwrap();
        assert_eq!(t.read_byte(socket::IR, block).unwrap(), socket::IR_TIMEOUT);
    }

    #[test]
    fn test_reset_pin_clears_state() {
        let sim = SimulatedW5500::new();
        let mut t = RegisterTransport::new(sim.bus(), sim.chip_select()).unwrap();
        t.write_bytes(common::SIPR, Block::Common, &[10, 0, 0, 2]).unwrap();

        let mut rst = sim.reset_pin();
        rst.set_low().unwrap();
        rst.set_high().unwrap();

        assert_eq!(sim.resets(), 1);
        assert_eq!(sim.common_bytes(common::SIPR, 4), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_read_outside_frame_floats_high() {
        let sim = SimulatedW5500::new();
        let mut bus = sim.bus();
        let mut buf = [0u8; 2];
        bus.read(&mut buf).unwrap();
        assert_eq!(buf, [0xFF, 0xFF]);
    }
}
