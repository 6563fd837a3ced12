//! Modbus CRC-16 (reflected polynomial 0xA001, initial value 0xFFFF).

const POLY: u16 = 0xA001;

/// CRC over `bytes`. Appended to frames low byte first.
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = 0xFFFF_u16;
    for &byte in bytes {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    crc
}

/// Append the CRC trailer to `frame`.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// True when the last two bytes are the CRC of the rest.
#[must_use]
pub fn check_crc(frame: &[u8]) -> bool {
    match frame.len().checked_sub(2) {
        Some(body) => crc16(&frame[..body]).to_le_bytes() == frame[body..],
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_golden_read_input_registers() {
        let crc = crc16(&[0x01, 0x04, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(crc, 0x0D70);
        assert_eq!(crc.to_le_bytes(), [0x70, 0x0D]);
    }

    #[test]
    fn test_general_address_request() {
        assert_eq!(crc16(&[0xF8, 0x04, 0x00, 0x00, 0x00, 0x0A]), 0x6464);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc16(&[]), 0xFFFF);
        assert!(!check_crc(&[0x01]));
    }

    #[test]
    fn test_append_then_check() {
        let mut frame = vec![0x01, 0x04, 0x02, 0x12, 0x34];
        append_crc(&mut frame);
        assert!(check_crc(&frame));

        frame[3] ^= 0x01;
        assert!(!check_crc(&frame));
    }
}
