//! Scriptable meter on an in-memory serial line.

use crate::crc::{append_crc, check_crc};
use crate::error::ModbusError;
use crate::frame::{PowerReading, DATA_LEN, READ_INPUT_REGISTERS};
use crate::meter::SerialLine;
use std::cell::RefCell;
use std::rc::Rc;

/// How the simulated meter answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterBehavior {
    /// Well-formed response.
    Normal,
    /// No answer at all.
    Silent,
    /// Response cut after the given number of bytes.
    Truncated(usize),
    /// Response with a flipped CRC byte.
    CorruptCrc,
    /// Exception frame with the given code.
    Exception(u8),
}

#[derive(Debug)]
struct MeterState {
    address: u8,
    reading: PowerReading,
    behavior: MeterBehavior,
    rx: Vec<u8>,
    requests: Vec<Vec<u8>>,
}

/// Shared handle to a simulated PZEM-004T. Clones refer to the same meter.
#[derive(Debug, Clone)]
pub struct SimulatedMeter {
    state: Rc<RefCell<MeterState>>,
}

impl SimulatedMeter {
    /// Meter at `address` reporting `reading`.
    #[must_use]
    pub fn new(address: u8, reading: PowerReading) -> Self {
        Self {
            state: Rc::new(RefCell::new(MeterState {
                address,
                reading,
                behavior: MeterBehavior::Normal,
                rx: Vec::new(),
                requests: Vec::new(),
            })),
        }
    }

    /// Change how the next requests are answered.
    pub fn set_behavior(&self, behavior: MeterBehavior) {
        self.state.borrow_mut().behavior = behavior;
    }

    /// Change the reported values.
    pub fn set_reading(&self, reading: PowerReading) {
        self.state.borrow_mut().reading = reading;
    }

    /// Every request frame received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state.borrow().requests.clone()
    }

    /// Inject noise into the receive side of the line.
    pub fn inject_noise(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend_from_slice(bytes);
    }
}

impl SerialLine for SimulatedMeter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ModbusError> {
        let mut state = self.state.borrow_mut();
        state.requests.push(bytes.to_vec());

        if bytes.len() != 8 || !check_crc(bytes) || bytes[1] != READ_INPUT_REGISTERS {
            return Ok(());
        }
        // 0xF8 is the general address every meter answers
        if bytes[0] != state.address && bytes[0] != 0xF8 {
            return Ok(());
        }

        let response = match state.behavior {
            MeterBehavior::Normal => encode_response(state.address, &state.reading),
            MeterBehavior::Silent => return Ok(()),
            MeterBehavior::Truncated(len) => {
                let mut frame = encode_response(state.address, &state.reading);
                frame.truncate(len);
                frame
            }
            MeterBehavior::CorruptCrc => {
                let mut frame = encode_response(state.address, &state.reading);
                if let Some(last) = frame.last_mut() {
                    *last ^= 0xFF;
                }
                frame
            }
            MeterBehavior::Exception(code) => {
                let mut frame = vec![state.address, READ_INPUT_REGISTERS | 0x80, code];
                append_crc(&mut frame);
                frame
            }
        };
        state.rx.extend_from_slice(&response);
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, ModbusError> {
        Ok(std::mem::take(&mut self.state.borrow_mut().rx))
    }
}

/// Encode `reading` the way the meter lays out its input registers.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn encode_response(address: u8, reading: &PowerReading) -> Vec<u8> {
    let scaled = |v: f32, k: f32| (v * k).round().max(0.0) as u32;
    let mut frame = Vec::with_capacity(3 + DATA_LEN + 2);
    frame.extend_from_slice(&[address, READ_INPUT_REGISTERS, DATA_LEN as u8]);

    let push_word = |frame: &mut Vec<u8>, v: u32| {
        frame.extend_from_slice(&((v & 0xFFFF) as u16).to_be_bytes());
    };
    let push_split = |frame: &mut Vec<u8>, v: u32| {
        frame.extend_from_slice(&((v & 0xFFFF) as u16).to_be_bytes());
        frame.extend_from_slice(&((v >> 16) as u16).to_be_bytes());
    };

    push_word(&mut frame, scaled(reading.voltage, 10.0));
    push_split(&mut frame, scaled(reading.current, 1000.0));
    push_split(&mut frame, scaled(reading.power, 10.0));
    push_split(&mut frame, reading.energy_wh);
    push_word(&mut frame, scaled(reading.frequency, 10.0));
    push_word(&mut frame, scaled(reading.power_factor, 100.0));
    push_word(&mut frame, if reading.alarm { 0xFFFF } else { 0 });

    append_crc(&mut frame);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{build_read_request, parse_response};

    fn reading() -> PowerReading {
        PowerReading {
            voltage: 229.5,
            current: 0.512,
            power: 117.4,
            energy_wh: 1_234_567,
            frequency: 49.9,
            power_factor: 0.87,
            alarm: false,
        }
    }

    #[test]
    fn test_answers_own_and_general_address() {
        let mut meter = SimulatedMeter::new(0x01, reading());

        meter.write_all(&build_read_request(0x01, 0, 10)).unwrap();
        assert_eq!(meter.read_available().unwrap().len(), 25);

        meter.write_all(&build_read_request(0xF8, 0, 10)).unwrap();
        assert_eq!(meter.read_available().unwrap().len(), 25);

        meter.write_all(&build_read_request(0x02, 0, 10)).unwrap();
        assert!(meter.read_available().unwrap().is_empty());
    }

    #[test]
    fn test_encoded_response_decodes() {
        let decoded = parse_response(&encode_response(0x01, &reading()), true).unwrap();
        assert!((decoded.voltage - 229.5).abs() < 1e-3);
        assert!((decoded.current - 0.512).abs() < 1e-6);
        assert_eq!(decoded.energy_wh, 1_234_567);
        assert!((decoded.power_factor - 0.87).abs() < 1e-6);
    }

    #[test]
    fn test_discard_drops_noise() {
        let mut meter = SimulatedMeter::new(0x01, reading());
        meter.inject_noise(&[0x00, 0xFF]);
        meter.discard_input().unwrap();
        assert!(meter.read_available().unwrap().is_empty());
    }
}
