//! End-to-end scenarios on the simulated board.
//!
//! - HTTP control flow: relay commands, status JSON, 404 handling
//! - Degraded sensors: stale and unknown readings surfacing as `null`
//! - Configuration files driving the runtime

mod common;
mod config_file;
mod degraded_sensors;
mod http_flow;
