//! Modbus-RTU client for a PZEM-004T style power meter.
//!
//! This crate provides:
//! - [`crc`] with the Modbus CRC-16
//! - [`frame`] with request framing and response decoding
//! - [`meter`] with the [`SerialLine`] seam and the cached [`PowerMeter`]
//! - [`sim`] with a scriptable meter (feature `simulated`)

pub mod crc;
pub mod error;
pub mod frame;
pub mod meter;
#[cfg(feature = "simulated")]
pub mod sim;

pub use crc::crc16;
pub use error::ModbusError;
pub use frame::{build_read_request, parse_response, PowerReading};
pub use meter::{PowerMeter, SerialLine};
