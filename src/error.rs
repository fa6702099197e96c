//! Custom error types for the driver.
//!
//! This module defines the primary error type, `SensorError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! report what went wrong between the caller and the sensor, from a failed bus
//! transfer to an exhausted polling budget.
//!
//! ## Error Hierarchy
//!
//! - **`Transport`**: The underlying channel could not complete a single-byte
//!   register transfer. Fatal to the current operation and always propagated to
//!   the caller; the driver never terminates its host process.
//! - **`ProtocolTimeout`**: A bounded poll loop (gateway status or conversion
//!   readiness) never observed the state it was waiting for.
//! - **`RetryExhausted`**: The retry policy ran out of attempts. Carries the
//!   attempt count and the last underlying failure.
//! - **`Abandoned`**: A previous transaction or acquisition was cancelled part
//!   way through. The protocol has no reset, so the handle refuses further work.
//! - **`Close`**: The transport reported a failure while releasing the channel.
//! - **`Timeout`**: An acquisition did not finish inside the caller's budget.
//! - **`InvalidArgument`**: A caller supplied a value outside its valid range.
//! - **`Config`**: Configuration could not be loaded or failed validation.
//!
//! There is no decode variant: every multi-byte value is assembled from a
//! fixed-size byte array, so reconstruction cannot fail once the bytes are in.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::gateway::Transaction;

/// Convenience alias for results using the driver error type.
pub type SensorResult<T> = std::result::Result<T, SensorError>;

/// Errors surfaced by every layer of the driver.
#[derive(Error, Debug)]
pub enum SensorError {
    /// A byte-level transfer on the given gateway slot failed.
    #[error("Transport error on slot {slot:#04x}: {source}")]
    Transport {
        /// Physical gateway register the transfer targeted.
        slot: u8,
        /// Failure reported by the transport.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A bounded poll loop gave up.
    #[error("Timed out waiting for {waiting_for} after {polls} polls")]
    ProtocolTimeout {
        /// What the loop was waiting to observe.
        waiting_for: &'static str,
        /// Number of polls performed before giving up.
        polls: u32,
    },

    /// The retry policy exhausted its attempts.
    #[error("after {attempts} attempts, last error: {last}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The failure returned by the final attempt.
        #[source]
        last: Box<SensorError>,
    },

    /// The handle has an abandoned in-flight transaction.
    #[error("Sensor handle abandoned while {state:?}; reopen the device")]
    Abandoned {
        /// Gateway state at the moment the handle was abandoned.
        state: Transaction,
    },

    /// The transport failed to release the channel.
    #[error("Failed to close channel: {0}")]
    Close(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// An acquisition exceeded its time budget.
    #[error("Acquisition did not complete within {0:?}")]
    Timeout(Duration),

    /// A caller-supplied value was out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SensorError {
    /// Wrap a transport failure for the given gateway slot.
    pub fn transport(slot: u8, source: anyhow::Error) -> Self {
        Self::Transport {
            slot,
            source: source.into(),
        }
    }
}
