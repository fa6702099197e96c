//! Driver library for the AS7263 six-channel near-infrared spectral sensor.
//!
//! The sensor hides its registers behind a three-slot "virtual register"
//! gateway on I2C. This crate layers, bottom up:
//!
//! - [`adapters`]: single-byte register channels (a multiplexed I2C bus, or a
//!   simulated sensor for tests and dry runs)
//! - [`gateway`]: the status/write/read handshake as an explicit state machine
//! - [`device`]: the [`As7263`] handle with configuration, mode and readiness
//! - [`acquisition`]: the measurement cycle that yields a [`Spectrum`]
//!
//! Configuration is loaded with [`config::Settings`] and every fallible
//! operation returns a [`SensorError`].

pub mod acquisition;
pub mod adapters;
pub mod config;
pub mod device;
pub mod error;
pub mod error_recovery;
pub mod gateway;
pub mod registers;
pub mod spectrum;

pub use acquisition::AcquisitionPolicy;
pub use device::{As7263, DeviceOptions};
pub use error::{SensorError, SensorResult};
pub use registers::Gain;
pub use spectrum::{Count, Spectrum};
