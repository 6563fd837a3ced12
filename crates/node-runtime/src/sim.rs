//! Simulated board: pins, climate sensor, meter and Ethernet controller
//! wired together for tests and the desktop daemon.

use crate::context::{DeviceContext, Peripherals};
use crate::peripherals::{ClimateSensor, RelayLine};
use crate::scheduler::{Scheduler, TickOutcome};
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use node_common::config::NodeConfig;
use node_common::error::{NodeError, NodeResult};
use node_common::time::Clock;
use node_common::RELAY_COUNT;
use node_ethernet::sim::{SimChipSelect, SimSpi, SimulatedW5500};
use node_ethernet::{SocketStatus, W5500};
use node_modbus::sim::SimulatedMeter;
use node_modbus::{PowerReading, SerialLine};
use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;
use std::sync::Arc;

/// Relay output pin that remembers its level and how often it was driven.
#[derive(Debug, Clone, Default)]
pub struct SimRelayPin {
    level: Rc<Cell<bool>>,
    writes: Rc<Cell<u32>>,
}

impl SimRelayPin {
    /// Low pin, never driven.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the coil is energized.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.level.get()
    }

    /// Number of times the pin was driven.
    #[must_use]
    pub fn writes(&self) -> u32 {
        self.writes.get()
    }

    fn latch(&self, high: bool) {
        self.level.set(high);
        self.writes.set(self.writes.get() + 1);
    }
}

impl ErrorType for SimRelayPin {
    type Error = Infallible;
}

impl OutputPin for SimRelayPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.latch(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.latch(true);
        Ok(())
    }
}

/// Input pin whose level tests set.
#[derive(Debug, Clone)]
pub struct SimInputPin {
    level: Rc<Cell<bool>>,
}

impl SimInputPin {
    /// Pin at `level`.
    #[must_use]
    pub fn new(level: bool) -> Self {
        Self {
            level: Rc::new(Cell::new(level)),
        }
    }

    /// Change the level.
    pub fn set(&self, level: bool) {
        self.level.set(level);
    }
}

impl ErrorType for SimInputPin {
    type Error = Infallible;
}

impl InputPin for SimInputPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level.get())
    }
}

#[derive(Debug)]
struct ClimateState {
    temperature: f32,
    humidity: f32,
    latched: (f32, f32),
    failing: bool,
    measurements: u32,
}

/// Temperature/humidity sensor with scripted values.
#[derive(Debug, Clone)]
pub struct SimClimate {
    state: Rc<RefCell<ClimateState>>,
}

impl SimClimate {
    /// Sensor reporting `temperature` °C and `humidity` %.
    #[must_use]
    pub fn new(temperature: f32, humidity: f32) -> Self {
        Self {
            state: Rc::new(RefCell::new(ClimateState {
                temperature,
                humidity,
                latched: (f32::NAN, f32::NAN),
                failing: false,
                measurements: 0,
            })),
        }
    }

    /// Values returned by the next measurement.
    pub fn set(&self, temperature: f32, humidity: f32) {
        let mut state = self.state.borrow_mut();
        state.temperature = temperature;
        state.humidity = humidity;
    }

    /// Make measurements fail (checksum or timeout on real hardware).
    pub fn set_failing(&self, failing: bool) {
        self.state.borrow_mut().failing = failing;
    }

    /// Successful measurements so far.
    #[must_use]
    pub fn measurements(&self) -> u32 {
        self.state.borrow().measurements
    }
}

impl ClimateSensor for SimClimate {
    fn measure(&mut self) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        if state.failing {
            return Err(NodeError::Sensor("climate sensor did not respond".to_string()));
        }
        state.latched = (state.temperature, state.humidity);
        state.measurements += 1;
        Ok(())
    }

    fn temperature(&self) -> f32 {
        self.state.borrow().latched.0
    }

    fn humidity(&self) -> f32 {
        self.state.borrow().latched.1
    }
}

/// Meter values the simulated board starts with.
#[must_use]
pub fn default_power_reading() -> PowerReading {
    PowerReading {
        voltage: 230.1,
        current: 0.52,
        power: 110.4,
        energy_wh: 1_532,
        frequency: 50.0,
        power_factor: 0.92,
        alarm: false,
    }
}

/// Every simulated part of the node, sharing state with the handles the
/// scheduler owns.
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    chip: SimulatedW5500,
    meter: SimulatedMeter,
    relays: Vec<SimRelayPin>,
    input: SimInputPin,
    climate: SimClimate,
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBoard {
    /// Board with link up, the meter at address 1, input high and 22 °C.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chip: SimulatedW5500::new(),
            meter: SimulatedMeter::new(0x01, default_power_reading()),
            relays: (0..RELAY_COUNT).map(|_| SimRelayPin::new()).collect(),
            input: SimInputPin::new(true),
            climate: SimClimate::new(22.0, 45.0),
        }
    }

    /// Relay pin `number` (1-based).
    ///
    /// # Panics
    ///
    /// When `number` is not in `1..=8`.
    #[must_use]
    pub fn relay(&self, number: usize) -> SimRelayPin {
        self.relays[number - 1].clone()
    }

    /// Ethernet controller.
    #[must_use]
    pub fn chip(&self) -> &SimulatedW5500 {
        &self.chip
    }

    /// Power meter.
    #[must_use]
    pub fn meter(&self) -> &SimulatedMeter {
        &self.meter
    }

    /// Digital input.
    #[must_use]
    pub fn input(&self) -> &SimInputPin {
        &self.input
    }

    /// Climate sensor.
    #[must_use]
    pub fn climate(&self) -> &SimClimate {
        &self.climate
    }

    /// Peripheral handles for a [`DeviceContext`].
    #[must_use]
    pub fn peripherals(&self) -> Peripherals {
        Peripherals {
            relays: self
                .relays
                .iter()
                .map(|pin| Box::new(pin.clone()) as Box<dyn RelayLine>)
                .collect(),
            input: Box::new(self.input.clone()),
            climate: Box::new(self.climate.clone()),
            meter_line: Box::new(self.meter.clone()) as Box<dyn SerialLine>,
        }
    }

    /// Scheduler wired to this board, not yet started.
    pub fn scheduler(
        &self,
        config: &NodeConfig,
        clock: Arc<dyn Clock>,
    ) -> NodeResult<Scheduler<SimSpi, SimChipSelect>> {
        let eth = W5500::new(
            self.chip.bus(),
            self.chip.chip_select(),
            Arc::clone(&clock),
            config.ethernet.clone(),
        )?;
        let ctx = DeviceContext::new(self.peripherals(), config, Arc::clone(&clock))?;
        Ok(Scheduler::new(eth, ctx, config, clock))
    }

    /// Drive `scheduler` through one request from a simulated client:
    /// tick until the socket listens, connect, tick until the request is
    /// answered. Returns the raw response and the tick outcome that served
    /// it, or `None` when the scheduler never got there within `max_ticks`.
    pub fn serve_one(
        &self,
        scheduler: &mut Scheduler<SimSpi, SimChipSelect>,
        socket: u8,
        request: &[u8],
        max_ticks: usize,
    ) -> Option<(Vec<u8>, TickOutcome)> {
        let mut ticks = 0;
        while self.chip.status(socket) != SocketStatus::Listen {
            if ticks == max_ticks {
                return None;
            }
            scheduler.step();
            ticks += 1;
        }
        if !self.chip.peer_connect(socket, request) {
            return None;
        }
        while ticks < max_ticks {
            let outcome = scheduler.step();
            ticks += 1;
            if matches!(
                outcome,
                TickOutcome::Served { .. } | TickOutcome::NoRequest | TickOutcome::Recovered(_)
            ) {
                return Some((self.chip.take_sent(socket), outcome));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::InputLine;

    #[test]
    fn test_relay_pin_counts_writes() {
        let mut pin = SimRelayPin::new();
        let observer = pin.clone();
        pin.set_high().unwrap();
        pin.set_low().unwrap();
        assert!(!observer.is_on());
        assert_eq!(observer.writes(), 2);
    }

    #[test]
    fn test_climate_latches_on_measure() {
        let mut sensor = SimClimate::new(20.0, 30.0);
        sensor.measure().unwrap();
        sensor.set(25.0, 35.0);
        assert!((sensor.temperature() - 20.0).abs() < f32::EPSILON);
        sensor.measure().unwrap();
        assert!((sensor.humidity() - 35.0).abs() < f32::EPSILON);
        assert_eq!(sensor.measurements(), 2);
    }

    #[test]
    fn test_board_handles_share_state() {
        let board = SimulatedBoard::new();
        let mut peripherals = board.peripherals();
        peripherals.relays[6].drive(true).unwrap();
        assert!(board.relay(7).is_on());
        board.input().set(false);
        assert!(!peripherals.input.level().unwrap());
    }
}
