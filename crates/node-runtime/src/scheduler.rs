//! Cooperative scheduler for the relay node.
//!
//! One tick:
//! 1. Restore relays whose pulse expired
//! 2. Sample the digital input, logging edges
//! 3. Every `link_check_interval` ticks, check the PHY link; while it is
//!    down the socket stays closed and the tick waits for it (bounded)
//! 4. Advance the socket state machine by one step
//!
//! A connected socket serves exactly one request: read, dispatch, send,
//! disconnect, close. Nothing here blocks without a bound.

use crate::context::DeviceContext;
use crate::handlers;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use node_common::config::{NetworkConfig, NodeConfig, SchedulerConfig};
use node_common::error::{NodeError, NodeResult};
use node_common::state::{NodeState, StateMachine};
use node_common::time::{as_millis, Clock};
use node_ethernet::{SocketStatus, W5500};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Socket was closed and has been opened.
    Opened,
    /// Socket was opened and is now listening.
    Listening,
    /// Waiting for a peer.
    Idle,
    /// Listener closed after too many idle ticks.
    IdleTimeout,
    /// One request answered.
    Served {
        /// Response status code.
        status: u16,
        /// Response size in bytes.
        bytes: usize,
    },
    /// Peer connected but sent nothing.
    NoRequest,
    /// Peer half-closed; socket disconnected.
    Disconnected,
    /// Unexpected socket status; socket closed.
    Reset(SocketStatus),
    /// Link was lost during this tick.
    LinkLost {
        /// Link came back within the wait limit.
        restored: bool,
    },
    /// The tick failed and the socket was closed.
    Recovered(NodeError),
}

/// The main loop: Ethernet controller plus device context.
pub struct Scheduler<SPI, CS> {
    eth: W5500<SPI, CS>,
    ctx: DeviceContext,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    network: NetworkConfig,
    send_timeout: Duration,
    state: StateMachine,
    tick_count: u64,
    idle_ticks: u32,
    served: u64,
}

impl<SPI, CS> std::fmt::Debug for Scheduler<SPI, CS> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state)
            .field("tick_count", &self.tick_count)
            .field("idle_ticks", &self.idle_ticks)
            .field("served", &self.served)
            .finish_non_exhaustive()
    }
}

impl<SPI, CS> Scheduler<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    /// Create a scheduler in BOOT.
    pub fn new(
        eth: W5500<SPI, CS>,
        ctx: DeviceContext,
        config: &NodeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let send_timeout = eth.config().send_complete_timeout;
        Self {
            eth,
            ctx,
            clock,
            config: config.scheduler.clone(),
            network: config.network.clone(),
            send_timeout,
            state: StateMachine::new(),
            tick_count: 0,
            idle_ticks: 0,
            served: 0,
        }
    }

    /// Pulse the controller's reset line, then [`start`](Self::start).
    pub fn start_with_reset<RST: OutputPin>(&mut self, reset: &mut RST) -> NodeResult<()> {
        self.eth.hardware_reset(reset)?;
        self.start()
    }

    /// Bring the node online.
    ///
    /// Transitions BOOT → INIT → ONLINE. Any bring-up failure, such as a
    /// controller that does not identify itself, moves the node to FAULT and
    /// the error is returned.
    pub fn start(&mut self) -> NodeResult<()> {
        info!("Starting relay node");
        if let Err(e) = self.bring_up() {
            error!(error = %e, state = %self.state.state(), "Bring-up failed");
            self.state.transition(NodeState::Fault)?;
            return Err(e);
        }
        Ok(())
    }

    fn bring_up(&mut self) -> NodeResult<()> {
        self.eth.init()?;
        self.state.transition(NodeState::Init)?;

        self.eth.configure(&self.network)?;
        let ip = self.eth.ip_address()?;
        info!(%ip, port = self.network.port, "Controller configured");

        let link = self.eth.wait_for_link()?;
        if !link {
            warn!("Starting without link");
        }
        self.state.transition(NodeState::Online)?;
        self.ctx.record(format!(
            "Online at {ip}:{} (link {})",
            self.network.port,
            if link { "up" } else { "down" }
        ));
        Ok(())
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// Any bus, socket or peripheral error; the socket may be left in any
    /// state. [`step`](Self::step) recovers from these.
    pub fn tick(&mut self) -> NodeResult<TickOutcome> {
        let state = self.state.state();
        if !state.is_running() {
            return Err(NodeError::Config(format!("cannot tick in state {state}")));
        }
        self.tick_count += 1;

        self.ctx.expire_pulses()?;
        self.ctx.poll_input()?;

        if self.link_check_due() {
            let up = self.eth.link_up()?;
            if !up {
                return self.wait_for_link();
            }
            if self.state.state() == NodeState::LinkDown {
                self.link_restored()?;
            }
        }

        let socket = self.network.socket;
        let status = self.eth.status(socket)?;
        trace!(tick = self.tick_count, %status, "Socket status");

        match status {
            SocketStatus::Closed => {
                self.eth.open(socket, self.network.port)?;
                self.idle_ticks = 0;
                Ok(TickOutcome::Opened)
            }
            SocketStatus::Init => {
                self.eth.listen(socket)?;
                Ok(TickOutcome::Listening)
            }
            SocketStatus::Listen => {
                self.idle_ticks += 1;
                let outcome = if self.idle_ticks > self.config.listen_idle_limit {
                    debug!(idle_ticks = self.idle_ticks, "Recycling idle listener");
                    self.eth.close(socket)?;
                    self.idle_ticks = 0;
                    TickOutcome::IdleTimeout
                } else {
                    TickOutcome::Idle
                };
                self.clock.sleep(self.config.listen_sleep);
                Ok(outcome)
            }
            SocketStatus::Established => self.serve(socket),
            SocketStatus::CloseWait => {
                self.eth.disconnect(socket)?;
                self.clock.sleep(self.config.close_wait_sleep);
                Ok(TickOutcome::Disconnected)
            }
            SocketStatus::Other(_) => {
                warn!(%status, "Unexpected socket status, resetting");
                self.ctx.record(format!("Socket reset from {status}"));
                self.eth.close(socket)?;
                self.clock.sleep(self.config.reset_sleep);
                Ok(TickOutcome::Reset(status))
            }
        }
    }

    /// Run one tick, recovering from errors: log, close the socket best
    /// effort, back off.
    pub fn step(&mut self) -> TickOutcome {
        match self.tick() {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, tick = self.tick_count, "Tick failed");
                self.ctx.record(format!("Error: {e}"));
                if let Err(close_err) = self.eth.close(self.network.socket) {
                    debug!(error = %close_err, "Close after failure also failed");
                }
                self.clock.sleep(self.config.error_backoff);
                TickOutcome::Recovered(e)
            }
        }
    }

    /// Step until `stop` returns true or the node leaves the running
    /// states. Returns the number of ticks run.
    pub fn run_until(&mut self, mut stop: impl FnMut() -> bool) -> u64 {
        info!("Entering main loop");
        let mut ticks = 0;
        while self.state.state().is_running() && !stop() {
            self.step();
            ticks += 1;
        }
        info!(ticks, served = self.served, "Main loop exited");
        ticks
    }

    /// Step `ticks` times (fewer if the node stops running).
    pub fn run_for(&mut self, ticks: u64) -> u64 {
        let mut remaining = ticks;
        self.run_until(move || {
            if remaining == 0 {
                return true;
            }
            remaining -= 1;
            false
        })
    }

    /// Close the socket and move to STOPPED.
    pub fn stop(&mut self) -> NodeResult<()> {
        info!("Stopping relay node");
        if let Err(e) = self.eth.close(self.network.socket) {
            warn!(error = %e, "Socket close on stop failed");
        }
        self.state.transition(NodeState::Stopped)
    }

    /// Lifecycle state.
    pub fn state(&self) -> NodeState {
        self.state.state()
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Requests answered so far.
    pub fn requests_served(&self) -> u64 {
        self.served
    }

    /// Device context.
    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    /// Device context, mutably.
    pub fn context_mut(&mut self) -> &mut DeviceContext {
        &mut self.ctx
    }

    /// Ethernet driver.
    pub fn ethernet_mut(&mut self) -> &mut W5500<SPI, CS> {
        &mut self.eth
    }

    fn link_check_due(&self) -> bool {
        self.state.state() == NodeState::LinkDown
            || self.tick_count % u64::from(self.config.link_check_interval.max(1)) == 0
    }

    fn serve(&mut self, socket: u8) -> NodeResult<TickOutcome> {
        self.idle_ticks = 0;
        self.clock.sleep(self.config.request_settle);

        let raw = self.eth.recv(socket, self.config.max_request_bytes)?;
        let outcome = if raw.is_empty() {
            debug!("Connection without request");
            TickOutcome::NoRequest
        } else {
            let response = handlers::dispatch(&raw, &mut self.ctx)?;
            let bytes = response.to_bytes();
            self.eth.send(socket, &bytes)?;
            if !self.eth.wait_send_complete(socket, self.send_timeout)? {
                debug!("Send completion not confirmed");
            }
            self.served += 1;
            debug!(status = response.status.code(), bytes = bytes.len(), "Request served");
            TickOutcome::Served {
                status: response.status.code(),
                bytes: bytes.len(),
            }
        };

        self.eth.disconnect(socket)?;
        self.clock.sleep(self.config.close_sleep);
        self.eth.close(socket)?;
        self.clock.sleep(self.config.close_sleep);
        Ok(outcome)
    }

    fn wait_for_link(&mut self) -> NodeResult<TickOutcome> {
        if self.state.state() == NodeState::Online {
            warn!("Link lost");
            self.ctx.record("Link down");
            self.state.transition(NodeState::LinkDown)?;
        }
        self.eth.close(self.network.socket)?;
        self.idle_ticks = 0;

        let start = self.clock.now_ms();
        let limit = as_millis(self.config.link_wait_limit);
        while self.clock.elapsed_since(start) < limit {
            self.clock.sleep(self.config.link_poll_interval);
            if self.eth.link_up()? {
                self.link_restored()?;
                return Ok(TickOutcome::LinkLost { restored: true });
            }
        }
        debug!(waited_ms = limit, "Link still down");
        Ok(TickOutcome::LinkLost { restored: false })
    }

    fn link_restored(&mut self) -> NodeResult<()> {
        info!("Link restored");
        self.ctx.record("Link up");
        self.state.transition(NodeState::Online)
    }
}
