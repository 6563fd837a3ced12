//! Read-input-registers request framing and PZEM-004T response decoding.

use crate::crc::{append_crc, check_crc};
use crate::error::ModbusError;

/// Function code for read input registers.
pub const READ_INPUT_REGISTERS: u8 = 0x04;
/// Register data bytes in a full meter response (10 registers).
pub const DATA_LEN: usize = 20;
/// Address, function, byte count, data, CRC.
pub const RESPONSE_LEN: usize = 3 + DATA_LEN + 2;

/// Modbus exception codes a meter may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Illegal function code.
    IllegalFunction = 0x01,
    /// Illegal data address.
    IllegalDataAddress = 0x02,
    /// Illegal data value.
    IllegalDataValue = 0x03,
    /// Server device failure.
    ServerDeviceFailure = 0x04,
}

impl ExceptionCode {
    /// Parse an exception code byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::ServerDeviceFailure),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "Illegal Function"),
            Self::IllegalDataAddress => write!(f, "Illegal Data Address"),
            Self::IllegalDataValue => write!(f, "Illegal Data Value"),
            Self::ServerDeviceFailure => write!(f, "Server Device Failure"),
        }
    }
}

/// One decoded meter sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    /// Volts.
    pub voltage: f32,
    /// Amperes.
    pub current: f32,
    /// Watts.
    pub power: f32,
    /// Accumulated energy in watt-hours.
    pub energy_wh: u32,
    /// Hertz.
    pub frequency: f32,
    /// Power factor, 0.00 to 1.00.
    pub power_factor: f32,
    /// Power alarm threshold exceeded.
    pub alarm: bool,
}

/// `[address][0x04][start][count][crc lo][crc hi]`.
#[must_use]
pub fn build_read_request(address: u8, start: u16, count: u16) -> [u8; 8] {
    let mut frame = Vec::with_capacity(8);
    frame.push(address);
    frame.push(READ_INPUT_REGISTERS);
    frame.extend_from_slice(&start.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(&mut frame);

    let mut out = [0u8; 8];
    out.copy_from_slice(&frame);
    out
}

/// Decode a read-input-registers response.
///
/// Exception frames (function | 0x80) are reported before the length check
/// since they are only five bytes. Trailing bytes past the frame are ignored.
pub fn parse_response(bytes: &[u8], validate_crc: bool) -> Result<PowerReading, ModbusError> {
    if bytes.len() < 3 {
        return Err(ModbusError::TooShort {
            len: bytes.len(),
            expected: RESPONSE_LEN,
        });
    }

    let function = bytes[1];
    if function & 0x80 != 0 {
        let code = bytes[2];
        return Err(ModbusError::Exception {
            code,
            description: ExceptionCode::from_byte(code)
                .map_or_else(|| format!("Unknown (0x{code:02X})"), |e| e.to_string()),
        });
    }
    if function != READ_INPUT_REGISTERS {
        return Err(ModbusError::UnexpectedFunction(function));
    }
    if bytes.len() < RESPONSE_LEN {
        return Err(ModbusError::TooShort {
            len: bytes.len(),
            expected: RESPONSE_LEN,
        });
    }
    if usize::from(bytes[2]) < DATA_LEN {
        return Err(ModbusError::ByteCount {
            declared: bytes[2],
            expected: DATA_LEN,
        });
    }

    let frame = &bytes[..RESPONSE_LEN];
    if validate_crc && !check_crc(frame) {
        return Err(ModbusError::BadCrc);
    }

    Ok(decode_registers(&frame[3..3 + DATA_LEN]))
}

/// Register layout: voltage, current (low word first), power (low word
/// first), energy (low word first), frequency, power factor, alarm.
#[allow(clippy::cast_precision_loss)]
fn decode_registers(data: &[u8]) -> PowerReading {
    let word = |i: usize| u32::from(u16::from_be_bytes([data[i], data[i + 1]]));
    let split = |i: usize| word(i) | (word(i + 2) << 16);

    PowerReading {
        voltage: word(0) as f32 / 10.0,
        current: split(2) as f32 / 1000.0,
        power: split(6) as f32 / 10.0,
        energy_wh: split(10),
        frequency: word(14) as f32 / 10.0,
        power_factor: word(16) as f32 / 100.0,
        alarm: word(18) == 0xFFFF,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 230.1 V, 1.234 A, 283.9 W, 70000 Wh, 50.0 Hz, 0.98, no alarm.
    const SAMPLE: [u8; RESPONSE_LEN] = [
        0x01, 0x04, 0x14, // address, function, byte count
        0x08, 0xFD, // voltage 2301
        0x04, 0xD2, 0x00, 0x00, // current 1234
        0x0B, 0x17, 0x00, 0x00, // power 2839
        0x11, 0x70, 0x00, 0x01, // energy 0x0001_1170 = 70000
        0x01, 0xF4, // frequency 500
        0x00, 0x62, // power factor 98
        0x00, 0x00, // alarm
        0x00, 0x00, // crc, patched in `sample()`
    ];

    fn sample() -> Vec<u8> {
        let mut frame = SAMPLE[..RESPONSE_LEN - 2].to_vec();
        append_crc(&mut frame);
        frame
    }

    #[test]
    fn test_request_frame_layout() {
        assert_eq!(
            build_read_request(0x01, 0x0000, 0x000A),
            [0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D]
        );
        assert_eq!(
            build_read_request(0xF8, 0x0000, 0x000A),
            [0xF8, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x64, 0x64]
        );
    }

    #[test]
    fn test_decode_known_values() {
        let reading = parse_response(&sample(), true).unwrap();
        assert!((reading.voltage - 230.1).abs() < 1e-3);
        assert!((reading.current - 1.234).abs() < 1e-6);
        assert!((reading.power - 283.9).abs() < 1e-3);
        assert_eq!(reading.energy_wh, 70_000);
        assert!((reading.frequency - 50.0).abs() < 1e-6);
        assert!((reading.power_factor - 0.98).abs() < 1e-6);
        assert!(!reading.alarm);
    }

    #[test]
    fn test_high_word_of_current() {
        let mut frame = sample();
        // current low word 0x0001, high word 0x0002 -> 0x0002_0001 mA
        frame[5..9].copy_from_slice(&[0x00, 0x01, 0x00, 0x02]);
        frame.truncate(RESPONSE_LEN - 2);
        append_crc(&mut frame);

        let reading = parse_response(&frame, true).unwrap();
        assert!((reading.current - 131.073).abs() < 1e-3);
    }

    #[test]
    fn test_alarm_flag() {
        let mut frame = sample();
        frame[21] = 0xFF;
        frame[22] = 0xFF;
        frame.truncate(RESPONSE_LEN - 2);
        append_crc(&mut frame);
        assert!(parse_response(&frame, true).unwrap().alarm);
    }

    #[test]
    fn test_short_frame_rejected() {
        let frame = sample();
        assert_eq!(
            parse_response(&frame[..24], true),
            Err(ModbusError::TooShort {
                len: 24,
                expected: 25
            })
        );
    }

    #[test]
    fn test_crc_validation_modes() {
        let mut frame = sample();
        frame[4] ^= 0xFF;
        assert_eq!(parse_response(&frame, true), Err(ModbusError::BadCrc));
        // Lenient mode decodes whatever arrived
        assert!(parse_response(&frame, false).is_ok());
    }

    #[test]
    fn test_exception_frame() {
        let mut frame = vec![0x01, 0x84, 0x02];
        append_crc(&mut frame);
        match parse_response(&frame, true) {
            Err(ModbusError::Exception { code, description }) => {
                assert_eq!(code, 0x02);
                assert_eq!(description, "Illegal Data Address");
            }
            other => panic!("expected exception, got {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_function() {
        let mut frame = sample();
        frame[1] = 0x03;
        assert_eq!(
            parse_response(&frame, false),
            Err(ModbusError::UnexpectedFunction(0x03))
        );
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut frame = sample();
        frame.extend_from_slice(&[0xAA, 0xBB]);
        assert!(parse_response(&frame, true).is_ok());
    }
}
