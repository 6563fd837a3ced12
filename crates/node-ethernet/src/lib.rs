//! WIZnet W5500 Ethernet offload controller over SPI.
//!
//! This crate provides:
//! - [`registers`] with the register map, block selection and socket codes
//! - [`transport`] with framed register access over an `embedded-hal` SPI bus
//! - [`driver`] with the [`W5500`] socket driver
//! - [`sim`] with an in-memory chip model (feature `simulated`)

pub mod driver;
pub mod registers;
#[cfg(feature = "simulated")]
pub mod sim;
pub mod transport;

pub use driver::W5500;
pub use registers::{Block, SocketCommand, SocketStatus};
pub use transport::RegisterTransport;
