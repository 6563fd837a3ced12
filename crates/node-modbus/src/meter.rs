//! Power-meter client with a freshness cache.
//!
//! [`PowerMeter::poll`] never fails: a recent sample is reused, a failed
//! exchange falls back to the cached sample until it expires, and after that
//! the reading is unknown.

use crate::error::ModbusError;
use crate::frame::{build_read_request, parse_response, PowerReading};
use node_common::config::MeterConfig;
use node_common::reading::{Reading, TimedCache};
use node_common::time::{as_millis, Clock};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Half-duplex byte link to the meter (a UART in the field).
pub trait SerialLine {
    /// Queue bytes for transmission.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ModbusError>;

    /// Everything received so far, without waiting.
    fn read_available(&mut self) -> Result<Vec<u8>, ModbusError>;

    /// Drop pending input.
    fn discard_input(&mut self) -> Result<(), ModbusError> {
        self.read_available().map(drop)
    }
}

impl<T: SerialLine + ?Sized> SerialLine for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ModbusError> {
        (**self).write_all(bytes)
    }

    fn read_available(&mut self) -> Result<Vec<u8>, ModbusError> {
        (**self).read_available()
    }

    fn discard_input(&mut self) -> Result<(), ModbusError> {
        (**self).discard_input()
    }
}

/// Cached client for one meter on one serial line.
pub struct PowerMeter<L> {
    line: L,
    clock: Arc<dyn Clock>,
    config: MeterConfig,
    cache: TimedCache<PowerReading>,
    last_address: Option<u8>,
}

impl<L> std::fmt::Debug for PowerMeter<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerMeter")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("last_address", &self.last_address)
            .finish_non_exhaustive()
    }
}

impl<L: SerialLine> PowerMeter<L> {
    /// Client with an empty cache.
    pub fn new(line: L, clock: Arc<dyn Clock>, config: MeterConfig) -> Self {
        Self {
            line,
            clock,
            config,
            cache: TimedCache::new(),
            last_address: None,
        }
    }

    /// Current sample, refreshing from the meter when the cache is older
    /// than the refresh interval.
    pub fn poll(&mut self) -> Reading<PowerReading> {
        let now = self.clock.now_ms();
        if let Some(cached) = self.cache.fresh(now, as_millis(self.config.refresh_interval)) {
            trace!("Meter sample reused");
            return Reading::Fresh(cached);
        }

        let addresses = self.config.addresses.clone();
        for address in addresses {
            match self.read_once(address) {
                Ok(reading) => {
                    if self.last_address != Some(address) {
                        debug!(address, "Meter answering");
                        self.last_address = Some(address);
                    }
                    self.cache.store(reading, self.clock.now_ms());
                    return Reading::Fresh(reading);
                }
                Err(e) => debug!(address, error = %e, "Meter exchange failed"),
            }
        }

        match self.cache.age(now) {
            Some(age) if age < as_millis(self.config.hard_expiry) => self.cache.stale(),
            Some(age) => {
                warn!(age_ms = age, "Meter sample expired");
                self.cache.clear();
                Reading::Unknown
            }
            None => Reading::Unknown,
        }
    }

    /// Last good sample without touching the bus.
    pub fn last(&self) -> Option<&PowerReading> {
        self.cache.peek()
    }

    /// Address that answered most recently.
    pub fn last_address(&self) -> Option<u8> {
        self.last_address
    }

    /// One request/response exchange with `address`, uncached.
    pub fn read_once(&mut self, address: u8) -> Result<PowerReading, ModbusError> {
        self.line.discard_input()?;
        let request = build_read_request(
            address,
            self.config.start_register,
            self.config.register_count,
        );
        self.line.write_all(&request)?;
        self.clock.sleep(self.config.response_window);

        let response = self.line.read_available()?;
        trace!(address, len = response.len(), "Meter response");
        if response.is_empty() {
            return Err(ModbusError::NoResponse { address });
        }
        parse_response(&response, self.config.validate_crc)
    }

    /// Give the serial line back.
    pub fn into_line(self) -> L {
        self.line
    }
}
