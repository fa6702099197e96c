//! Transport adapter implementations
//!
//! This module defines the `RegisterChannel` trait, the single-byte register
//! primitive the virtual-register gateway is built on, and provides concrete
//! channels for different environments.
//!
//! - [`SimulatedAs7263`]: in-memory sensor with failure injection, for tests
//!   and `--simulate` runs.
//! - [`MuxedI2cChannel`]: any `embedded-hal` I2C bus, reaching the sensor
//!   through one port of a TCA9548A-style multiplexer.

pub mod i2c_mux;
pub mod mock;

pub use i2c_mux::{ChannelAddress, MuxedI2cChannel};
pub use mock::{BusOp, SimulatedAs7263};

use anyhow::Result;
use async_trait::async_trait;

/// Single-byte register access on one opened, addressed channel.
///
/// A channel is exclusively owned by one device handle, so every method takes
/// `&mut self` and no implementation needs to guard against interleaving.
#[async_trait]
pub trait RegisterChannel: Send {
    /// Read one byte from register `register`.
    async fn read_register(&mut self, register: u8) -> Result<u8>;

    /// Write one byte to register `register`.
    async fn write_register(&mut self, register: u8, value: u8) -> Result<()>;

    /// Release the channel. Called exactly once, by the device handle's `close`.
    async fn close(&mut self) -> Result<()>;
}
