#![doc = "Common types shared across the relay node workspace."]

pub mod config;
pub mod error;
pub mod event_log;
pub mod reading;
pub mod state;
pub mod time;

pub use config::*;
pub use error::*;
pub use event_log::*;
pub use reading::*;
pub use state::*;
pub use time::*;

/// Number of relay channels on the board.
pub const RELAY_COUNT: usize = 8;
