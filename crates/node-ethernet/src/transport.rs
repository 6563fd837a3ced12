//! Framed register access over SPI.
//!
//! Every access is a single transaction: chip select low, a three byte
//! header `[addr hi, addr lo, (block << 3) | rw]`, the payload, chip select
//! high. Chip select is released even when the transfer fails.

use crate::registers::{Block, CONTROL_READ, CONTROL_WRITE};
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use node_common::error::{NodeError, NodeResult};
use tracing::trace;

/// Address/control header for one transaction on a valid block.
pub(crate) fn frame_header(addr: u16, block: Block, write: bool) -> [u8; 3] {
    let rw = if write { CONTROL_WRITE } else { CONTROL_READ };
    let [hi, lo] = addr.to_be_bytes();
    [hi, lo, (block.select_bits() << 3) | rw]
}

/// Exclusive owner of the SPI bus and chip-select line.
#[derive(Debug)]
pub struct RegisterTransport<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS> RegisterTransport<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    /// Take ownership of the bus and deselect the chip.
    pub fn new(spi: SPI, mut cs: CS) -> NodeResult<Self> {
        cs.set_high().map_err(gpio_error)?;
        Ok(Self { spi, cs })
    }

    /// Give the bus and chip-select line back.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn transaction<F>(&mut self, addr: u16, block: Block, write: bool, payload: F) -> NodeResult<()>
    where
        F: FnOnce(&mut SPI) -> Result<(), SPI::Error>,
    {
        if !block.is_valid() {
            return Err(NodeError::Config(format!("no such register block {block:?}")));
        }
        let header = frame_header(addr, block, write);
        trace!(addr, ?block, write, "SPI transaction");

        self.cs.set_low().map_err(gpio_error)?;
        let result = framed(&mut self.spi, &header, payload);
        let released = self.cs.set_high();

        result.map_err(|e| NodeError::Bus(format!("{e:?}")))?;
        released.map_err(gpio_error)
    }

    /// Read one register byte.
    pub fn read_byte(&mut self, addr: u16, block: Block) -> NodeResult<u8> {
        let mut buf = [0u8; 1];
        self.read_into(addr, block, &mut buf)?;
        Ok(buf[0])
    }

    /// Write one register byte.
    pub fn write_byte(&mut self, addr: u16, block: Block, value: u8) -> NodeResult<()> {
        self.write_bytes(addr, block, &[value])
    }

    /// Read `len` consecutive bytes.
    pub fn read_bytes(&mut self, addr: u16, len: usize, block: Block) -> NodeResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(addr, block, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` from consecutive addresses.
    pub fn read_into(&mut self, addr: u16, block: Block, buf: &mut [u8]) -> NodeResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.transaction(addr, block, false, |spi| spi.read(buf))
    }

    /// Write consecutive bytes.
    pub fn write_bytes(&mut self, addr: u16, block: Block, data: &[u8]) -> NodeResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.transaction(addr, block, true, |spi| spi.write(data))
    }

    /// Read a big-endian 16-bit register in one transaction.
    pub fn read_u16(&mut self, addr: u16, block: Block) -> NodeResult<u16> {
        let mut buf = [0u8; 2];
        self.read_into(addr, block, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Write a big-endian 16-bit register in one transaction.
    pub fn write_u16(&mut self, addr: u16, block: Block, value: u16) -> NodeResult<()> {
        self.write_bytes(addr, block, &value.to_be_bytes())
    }
}

fn framed<SPI, F>(spi: &mut SPI, header: &[u8], payload: F) -> Result<(), SPI::Error>
where
    SPI: SpiBus,
    F: FnOnce(&mut SPI) -> Result<(), SPI::Error>,
{
    spi.write(header)?;
    payload(spi)?;
    spi.flush()
}

fn gpio_error<E: core::fmt::Debug>(e: E) -> NodeError {
    NodeError::Gpio(format!("chip select: {e:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType as PinErrorType;
    use embedded_hal::spi::{ErrorKind, ErrorType};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct Wire {
        cs_low: bool,
        frames: Vec<Vec<u8>>,
        read_fill: u8,
        fail_payload: bool,
    }

    struct RecordingBus(Rc<RefCell<Wire>>);
    struct RecordingPin(Rc<RefCell<Wire>>);

    impl ErrorType for RecordingBus {
        type Error = ErrorKind;
    }

    impl SpiBus for RecordingBus {
        fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
            let wire = self.0.borrow();
            if wire.fail_payload {
                return Err(ErrorKind::Overrun);
            }
            words.fill(wire.read_fill);
            Ok(())
        }

        fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
            let mut wire = self.0.borrow_mut();
            assert!(wire.cs_low, "bus written with chip deselected");
            if let Some(frame) = wire.frames.last_mut() {
                frame.extend_from_slice(words);
            }
            Ok(())
        }

        fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
            self.write(write)?;
            self.read(read)
        }

        fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
            self.read(words)
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    impl PinErrorType for RecordingPin {
        type Error = Infallible;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            let mut wire = self.0.borrow_mut();
            wire.cs_low = true;
            wire.frames.push(Vec::new());
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0.borrow_mut().cs_low = false;
            Ok(())
        }
    }

    fn transport() -> (
        RegisterTransport<RecordingBus, RecordingPin>,
        Rc<RefCell<Wire>>,
    ) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let t = RegisterTransport::new(RecordingBus(wire.clone()), RecordingPin(wire.clone()))
            .expect("transport");
        (t, wire)
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(frame_header(0x0039, Block::Common, false), [0x00, 0x39, 0x00]);
        assert_eq!(frame_header(0x0001, Block::Socket(0), true), [0x00, 0x01, 0x0C]);
        assert_eq!(frame_header(0x07FE, Block::TxBuffer(0), true), [0x07, 0xFE, 0x14]);
        assert_eq!(frame_header(0x0010, Block::RxBuffer(1), false), [0x00, 0x10, 0x38]);
    }

    #[test]
    fn test_write_u16_single_frame_big_endian() {
        let (mut t, wire) = transport();
        t.write_u16(0x0024, Block::Socket(0), 0x1234).unwrap();

        let wire = wire.borrow();
        assert_eq!(wire.frames, vec![vec![0x00, 0x24, 0x0C, 0x12, 0x34]]);
        assert!(!wire.cs_low);
    }

    #[test]
    fn test_read_u16_composes_big_endian() {
        let (mut t, wire) = transport();
        wire.borrow_mut().read_fill = 0x08;
        assert_eq!(t.read_u16(0x0020, Block::Socket(0)).unwrap(), 0x0808);
        assert_eq!(wire.borrow().frames, vec![vec![0x00, 0x20, 0x08]]);
    }

    #[test]
    fn test_out_of_range_block_rejected_before_select() {
        let (mut t, wire) = transport();
        let err = t.read_byte(0x0003, Block::Socket(8)).unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
        let err = t.write_bytes(0x0000, Block::TxBuffer(64), &[1]).unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));

        let wire = wire.borrow();
        assert!(wire.frames.is_empty());
        assert!(!wire.cs_low);
    }

    #[test]
    fn test_chip_select_released_on_bus_error() {
        let (mut t, wire) = transport();
        wire.borrow_mut().fail_payload = true;

        let err = t.read_byte(0x0039, Block::Common).unwrap_err();
        assert!(matches!(err, NodeError::Bus(_)));
        assert!(!wire.borrow().cs_low);
    }

    #[test]
    fn test_empty_payload_skips_transaction() {
        let (mut t, wire) = transport();
        t.write_bytes(0x0000, Block::TxBuffer(0), &[]).unwrap();
        assert!(t.read_bytes(0x0000, 0, Block::RxBuffer(0)).unwrap().is_empty());
        assert!(wire.borrow().frames.is_empty());
    }
}
