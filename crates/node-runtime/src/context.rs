//! All mutable device state, owned by the loop and lent to handlers.

use crate::peripherals::{
    ClimateCache, ClimateSample, ClimateSensor, EdgeInput, InputLine, RelayBank, RelayLine,
};
use crate::pulse::{PulseScheduler, PulseStart};
use node_common::config::NodeConfig;
use node_common::error::{NodeError, NodeResult};
use node_common::event_log::EventLog;
use node_common::reading::Reading;
use node_common::time::{as_millis, Clock};
use node_common::RELAY_COUNT;
use node_modbus::{PowerMeter, PowerReading, SerialLine};
use std::sync::Arc;
use tracing::{debug, info};

/// Hardware handed to [`DeviceContext::new`].
pub struct Peripherals {
    /// Relay outputs, relay 1 first.
    pub relays: Vec<Box<dyn RelayLine>>,
    /// Pulled-up digital input.
    pub input: Box<dyn InputLine>,
    /// Temperature/humidity sensor.
    pub climate: Box<dyn ClimateSensor>,
    /// Serial line to the power meter.
    pub meter_line: Box<dyn SerialLine>,
}

/// Point-in-time view for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Climate reading.
    pub climate: Reading<ClimateSample>,
    /// Relay states, relay 1 first.
    pub relays: [bool; RELAY_COUNT],
    /// Digital input level.
    pub input: Option<bool>,
    /// Power meter reading.
    pub power: Reading<PowerReading>,
    /// Milliseconds since boot.
    pub uptime_ms: u64,
}

/// Relays, sensors, pulses and the event log.
pub struct DeviceContext {
    relays: RelayBank,
    input: EdgeInput,
    climate: ClimateCache,
    meter: PowerMeter<Box<dyn SerialLine>>,
    pulses: PulseScheduler,
    log: EventLog,
    clock: Arc<dyn Clock>,
    pulse_ms: u64,
    http_log_lines: usize,
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("relays", &self.relays)
            .field("input", &self.input)
            .field("pulses", &self.pulses)
            .field("log_len", &self.log.len())
            .finish_non_exhaustive()
    }
}

impl DeviceContext {
    /// Build the context; all relays start off.
    pub fn new(
        peripherals: Peripherals,
        config: &NodeConfig,
        clock: Arc<dyn Clock>,
    ) -> NodeResult<Self> {
        let Peripherals {
            relays,
            input,
            climate,
            meter_line,
        } = peripherals;

        Ok(Self {
            relays: RelayBank::new(relays)?,
            input: EdgeInput::new(input),
            climate: ClimateCache::new(climate, as_millis(config.sensors.climate_ttl)),
            meter: PowerMeter::new(meter_line, Arc::clone(&clock), config.meter.clone()),
            pulses: PulseScheduler::new(),
            log: EventLog::new(config.log.capacity),
            clock,
            pulse_ms: as_millis(config.relays.pulse_duration),
            http_log_lines: config.log.http_lines,
        })
    }

    /// Milliseconds on the injected clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Append to the event log.
    pub fn record(&mut self, message: impl Into<String>) {
        let now = self.clock.now_ms();
        self.log.push(now, message);
    }

    /// Event log.
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Pulse length in milliseconds.
    pub fn pulse_ms(&self) -> u64 {
        self.pulse_ms
    }

    /// Number of log lines served over HTTP.
    pub fn http_log_lines(&self) -> usize {
        self.http_log_lines
    }

    /// Set relay `number` (1-based). Cancels a pending pulse on it.
    pub fn set_relay(&mut self, number: usize, on: bool) -> NodeResult<()> {
        let index = relay_index(number)?;
        if self.pulses.cancel(index).is_some() {
            debug!(relay = number, "Pending pulse cancelled");
        }
        self.relays.set(index, on)?;
        info!(relay = number, on, "Relay set");
        self.record(format!("Relay {number} -> {}", on_off(on)));
        Ok(())
    }

    /// Set every relay. Cancels all pending pulses.
    pub fn set_all(&mut self, on: bool) -> NodeResult<()> {
        for index in 0..RELAY_COUNT {
            self.pulses.cancel(index);
            self.relays.set(index, on)?;
        }
        info!(on, "All relays set");
        self.record(format!("All relays -> {}", on_off(on)));
        Ok(())
    }

    /// Toggle relay `number` (1-based) and schedule the restore. A repeat
    /// request before expiry only moves the deadline.
    pub fn pulse_relay(&mut self, number: usize) -> NodeResult<PulseStart> {
        let index = relay_index(number)?;
        let current = self.relays.get(index).unwrap_or(false);
        let due = self.clock.now_ms().saturating_add(self.pulse_ms);

        let start = self.pulses.schedule(index, due, current);
        match start {
            PulseStart::Started => {
                self.relays.set(index, !current)?;
                info!(relay = number, due_ms = due, "Pulse started");
                self.record(format!(
                    "Relay {number} pulse -> {} for {} ms",
                    on_off(!current),
                    self.pulse_ms
                ));
            }
            PulseStart::Extended => {
                debug!(relay = number, due_ms = due, "Pulse extended");
                self.record(format!("Relay {number} pulse extended"));
            }
        }
        Ok(start)
    }

    /// Restore every relay whose pulse is due. Returns how many fired.
    pub fn expire_pulses(&mut self) -> NodeResult<usize> {
        let due = self.pulses.take_due(self.clock.now_ms());
        for task in &due {
            self.relays.set(task.relay, task.restore)?;
            let number = task.relay + 1;
            info!(relay = number, restore = task.restore, "Pulse expired");
            self.record(format!("Relay {number} restored -> {}", on_off(task.restore)));
        }
        Ok(due.len())
    }

    /// Pending pulses.
    pub fn pulses(&self) -> &PulseScheduler {
        &self.pulses
    }

    /// Sample the digital input, logging edges.
    pub fn poll_input(&mut self) -> NodeResult<Option<bool>> {
        let edge = self.input.poll()?;
        if let Some(level) = edge {
            info!(high = level, "Input changed");
            self.record(format!("Input -> {}", if level { "HIGH" } else { "LOW" }));
        }
        Ok(edge)
    }

    /// Relay states, relay 1 first.
    pub fn relay_states(&self) -> [bool; RELAY_COUNT] {
        self.relays.states()
    }

    /// Climate reading through the TTL cache.
    pub fn climate(&mut self) -> Reading<ClimateSample> {
        let now = self.clock.now_ms();
        self.climate.read(now)
    }

    /// Power reading through the meter cache.
    pub fn power(&mut self) -> Reading<PowerReading> {
        self.meter.poll()
    }

    /// Last meter sample without bus traffic.
    pub fn last_power(&self) -> Option<&PowerReading> {
        self.meter.last()
    }

    /// Gather everything the pages render. May touch the sensors.
    pub fn snapshot(&mut self) -> NodeResult<Snapshot> {
        if self.input.level().is_none() {
            self.poll_input()?;
        }
        Ok(Snapshot {
            climate: self.climate(),
            relays: self.relays.states(),
            input: self.input.level(),
            power: self.power(),
            uptime_ms: self.clock.now_ms(),
        })
    }
}

fn relay_index(number: usize) -> NodeResult<usize> {
    if (1..=RELAY_COUNT).contains(&number) {
        Ok(number - 1)
    } else {
        Err(NodeError::Config(format!("relay {number} out of range")))
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

#[cfg(all(test, feature = "simulated"))]
mod tests {
    use super::*;
    use crate::sim::SimulatedBoard;
    use node_common::time::ManualClock;
    use std::time::Duration;

    fn context() -> (SimulatedBoard, DeviceContext, Arc<ManualClock>) {
        let board = SimulatedBoard::new();
        let clock = Arc::new(ManualClock::new(0));
        let ctx = DeviceContext::new(board.peripherals(), &NodeConfig::default(), clock.clone())
            .unwrap();
        (board, ctx, clock)
    }

    #[test]
    fn test_pulse_restores_exactly_once() {
        let (board, mut ctx, clock) = context();

        assert_eq!(ctx.pulse_relay(3).unwrap(), PulseStart::Started);
        assert!(board.relay(3).is_on());

        clock.advance(Duration::from_millis(4_999));
        assert_eq!(ctx.expire_pulses().unwrap(), 0);
        assert!(board.relay(3).is_on());

        clock.advance(Duration::from_millis(1));
        assert_eq!(ctx.expire_pulses().unwrap(), 1);
        assert!(!board.relay(3).is_on());

        clock.advance(Duration::from_secs(10));
        assert_eq!(ctx.expire_pulses().unwrap(), 0);
        assert_eq!(board.relay(3).writes(), 3);
    }

    #[test]
    fn test_repeat_pulse_does_not_retoggle() {
        let (board, mut ctx, clock) = context();
        ctx.pulse_relay(1).unwrap();
        clock.advance(Duration::from_millis(3_000));
        assert_eq!(ctx.pulse_relay(1).unwrap(), PulseStart::Extended);
        assert!(board.relay(1).is_on());

        // Original deadline passes without restore
        clock.advance(Duration::from_millis(2_500));
        assert_eq!(ctx.expire_pulses().unwrap(), 0);
        clock.advance(Duration::from_millis(2_500));
        assert_eq!(ctx.expire_pulses().unwrap(), 1);
        assert!(!board.relay(1).is_on());
    }

    #[test]
    fn test_explicit_set_cancels_pulse() {
        let (board, mut ctx, clock) = context();
        ctx.pulse_relay(5).unwrap();
        ctx.set_relay(5, true).unwrap();
        assert!(ctx.pulses().is_empty());

        clock.advance(Duration::from_secs(6));
        assert_eq!(ctx.expire_pulses().unwrap(), 0);
        assert!(board.relay(5).is_on());
    }

    #[test]
    fn test_relay_numbers_are_one_based() {
        let (_board, mut ctx, _clock) = context();
        assert!(ctx.set_relay(0, true).is_err());
        assert!(ctx.set_relay(9, true).is_err());
        ctx.set_relay(8, true).unwrap();
        assert!(ctx.relay_states()[7]);
    }

    #[test]
    fn test_events_logged() {
        let (_board, mut ctx, _clock) = context();
        ctx.set_relay(2, true).unwrap();
        ctx.set_all(false).unwrap();
        let lines: Vec<_> = ctx.log().iter().map(|e| e.message.clone()).collect();
        assert_eq!(lines, ["Relay 2 -> ON", "All relays -> OFF"]);
    }
}
