//! Relay node runtime.
//!
//! Everything above the drivers: the cooperative [`Scheduler`] that owns the
//! Ethernet controller, the [`DeviceContext`] holding relays, sensors and
//! the event log, and the small HTTP layer that exposes them.
//!
//! # Request path
//!
//! ```text
//! socket ESTABLISHED → recv (≤ 512 B) → http::Request::parse
//!     → handlers::dispatch → Response::to_bytes → send → disconnect/close
//! ```
//!
//! # Features
//!
//! - `simulated` (default): in-memory board for tests and the desktop daemon

pub mod api;
pub mod context;
pub mod handlers;
pub mod http;
pub mod pages;
pub mod peripherals;
pub mod pulse;
pub mod scheduler;

#[cfg(feature = "simulated")]
pub mod sim;

pub use context::{DeviceContext, Peripherals, Snapshot};
pub use http::{Request, Response, Status};
pub use peripherals::{ClimateSample, ClimateSensor, InputLine, RelayLine};
pub use pulse::{PulseScheduler, PulseStart};
pub use scheduler::{Scheduler, TickOutcome};
