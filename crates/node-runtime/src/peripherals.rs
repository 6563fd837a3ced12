//! Board peripherals behind capability traits.
//!
//! Relay outputs and the digital input are any `embedded-hal` pins; the
//! climate sensor is anything implementing [`ClimateSensor`].

use embedded_hal::digital::{InputPin, OutputPin};
use node_common::error::{NodeError, NodeResult};
use node_common::reading::{Reading, TimedCache};
use node_common::RELAY_COUNT;
use tracing::{debug, warn};

/// A line driving one relay coil.
pub trait RelayLine {
    /// Energize (`true`) or release the relay.
    fn drive(&mut self, on: bool) -> NodeResult<()>;
}

impl<P: OutputPin> RelayLine for P {
    fn drive(&mut self, on: bool) -> NodeResult<()> {
        let result = if on { self.set_high() } else { self.set_low() };
        result.map_err(|e| NodeError::Gpio(format!("relay line: {e:?}")))
    }
}

/// A digital input line.
pub trait InputLine {
    /// Current logic level.
    fn level(&mut self) -> NodeResult<bool>;
}

impl<P: InputPin> InputLine for P {
    fn level(&mut self) -> NodeResult<bool> {
        self.is_high()
            .map_err(|e| NodeError::Gpio(format!("input line: {e:?}")))
    }
}

/// Temperature/humidity sensor (DHT22 class).
pub trait ClimateSensor {
    /// Trigger and complete one measurement.
    fn measure(&mut self) -> NodeResult<()>;
    /// Degrees Celsius from the last measurement.
    fn temperature(&self) -> f32;
    /// Relative humidity percent from the last measurement.
    fn humidity(&self) -> f32;
}

/// One climate measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSample {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity percent.
    pub humidity: f32,
}

/// The eight relay outputs and their commanded states.
pub struct RelayBank {
    lines: Vec<Box<dyn RelayLine>>,
    states: [bool; RELAY_COUNT],
}

impl std::fmt::Debug for RelayBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayBank")
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}

impl RelayBank {
    /// Take exactly [`RELAY_COUNT`] lines and drive them all off.
    pub fn new(lines: Vec<Box<dyn RelayLine>>) -> NodeResult<Self> {
        if lines.len() != RELAY_COUNT {
            return Err(NodeError::Config(format!(
                "expected {RELAY_COUNT} relay lines, got {}",
                lines.len()
            )));
        }
        let mut bank = Self {
            lines,
            states: [false; RELAY_COUNT],
        };
        for index in 0..RELAY_COUNT {
            bank.set(index, false)?;
        }
        Ok(bank)
    }

    /// Drive relay `index` (zero-based).
    pub fn set(&mut self, index: usize, on: bool) -> NodeResult<()> {
        let line = self
            .lines
            .get_mut(index)
            .ok_or_else(|| NodeError::Config(format!("relay index {index} out of range")))?;
        line.drive(on)?;
        self.states[index] = on;
        Ok(())
    }

    /// Commanded state of relay `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<bool> {
        self.states.get(index).copied()
    }

    /// All commanded states.
    #[must_use]
    pub fn states(&self) -> [bool; RELAY_COUNT] {
        self.states
    }
}

/// Digital input with edge detection.
pub struct EdgeInput {
    line: Box<dyn InputLine>,
    level: Option<bool>,
}

impl std::fmt::Debug for EdgeInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeInput")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

impl EdgeInput {
    /// Wrap a line; the first poll establishes the baseline.
    pub fn new(line: Box<dyn InputLine>) -> Self {
        Self { line, level: None }
    }

    /// Sample the line. Returns the new level when it changed since the
    /// previous sample.
    pub fn poll(&mut self) -> NodeResult<Option<bool>> {
        let now = self.line.level()?;
        let previous = self.level.replace(now);
        Ok(match previous {
            Some(before) if before != now => Some(now),
            _ => None,
        })
    }

    /// Last sampled level.
    #[must_use]
    pub fn level(&self) -> Option<bool> {
        self.level
    }
}

/// Climate sensor behind a TTL cache.
pub struct ClimateCache {
    sensor: Box<dyn ClimateSensor>,
    cache: TimedCache<ClimateSample>,
    ttl_ms: u64,
}

impl std::fmt::Debug for ClimateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClimateCache")
            .field("cache", &self.cache)
            .field("ttl_ms", &self.ttl_ms)
            .finish_non_exhaustive()
    }
}

impl ClimateCache {
    /// Cache measurements from `sensor` for `ttl_ms`.
    pub fn new(sensor: Box<dyn ClimateSensor>, ttl_ms: u64) -> Self {
        Self {
            sensor,
            cache: TimedCache::new(),
            ttl_ms,
        }
    }

    /// Cached sample if younger than the TTL, otherwise a new measurement.
    /// A failed measurement serves the last sample as stale.
    pub fn read(&mut self, now_ms: u64) -> Reading<ClimateSample> {
        if let Some(sample) = self.cache.fresh(now_ms, self.ttl_ms) {
            return Reading::Fresh(sample);
        }
        match self.sensor.measure() {
            Ok(()) => {
                let sample = ClimateSample {
                    temperature: self.sensor.temperature(),
                    humidity: self.sensor.humidity(),
                };
                debug!(
                    temperature = sample.temperature,
                    humidity = sample.humidity,
                    "Climate measured"
                );
                self.cache.store(sample, now_ms);
                Reading::Fresh(sample)
            }
            Err(e) => {
                warn!(error = %e, "Climate measurement failed");
                self.cache.stale()
            }
        }
    }
}
