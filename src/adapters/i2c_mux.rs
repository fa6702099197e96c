//! I2C channel behind a bus multiplexer
//!
//! The sensor sits behind one downstream port of a TCA9548A-style multiplexer.
//! Selecting a port is a single-byte write of `1 << port` to the mux address;
//! this adapter reselects the port before every transfer so several handles can
//! share one bus, each on its own port.
//!
//! Any blocking `embedded-hal` 1.0 I2C implementation works. On Linux, enable
//! the `linux_i2c` feature for [`MuxedI2cChannel::open_linux`].

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::RegisterChannel;
use crate::error::{SensorError, SensorResult};

/// Number of downstream ports on the multiplexer.
pub const MUX_PORTS: u8 = 8;

/// Where a sensor lives on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAddress {
    /// 7-bit sensor address (0x49 for the AS7263).
    pub sensor: u8,
    /// 7-bit multiplexer address.
    pub mux: u8,
    /// Multiplexer port the sensor is wired to (0-7).
    pub port: u8,
}

impl Default for ChannelAddress {
    fn default() -> Self {
        Self {
            sensor: 0x49,
            mux: 0x70,
            port: 0,
        }
    }
}

impl ChannelAddress {
    /// Check the port exists and both addresses are 7-bit.
    ///
    /// # Errors
    /// Returns `SensorError::InvalidArgument` naming the offending field.
    pub fn validate(&self) -> SensorResult<()> {
        if self.port >= MUX_PORTS {
            return Err(SensorError::InvalidArgument(format!(
                "mux port {} out of range (0-{})",
                self.port,
                MUX_PORTS - 1
            )));
        }
        if self.sensor > 0x7F || self.mux > 0x7F {
            return Err(SensorError::InvalidArgument(format!(
                "addresses must be 7-bit (sensor {:#04x}, mux {:#04x})",
                self.sensor, self.mux
            )));
        }
        Ok(())
    }
}

/// Register channel over an `embedded-hal` I2C bus and a port multiplexer.
pub struct MuxedI2cChannel<I> {
    /// The bus, shared with the blocking task running each transfer
    bus: Arc<Mutex<I>>,
    address: ChannelAddress,
    open: bool,
}

impl<I> MuxedI2cChannel<I>
where
    I: I2c + Send + 'static,
    I::Error: Debug,
{
    /// Open the channel: validate the address and select the mux port once
    /// so a wiring problem is reported here rather than on the first transfer.
    ///
    /// # Errors
    /// Returns error if the address is invalid (carrying a
    /// `SensorError::InvalidArgument`) or the multiplexer does not acknowledge
    /// the port selection.
    pub async fn open(bus: I, address: ChannelAddress) -> Result<Self> {
        address.validate()?;
        let channel = Self {
            bus: Arc::new(Mutex::new(bus)),
            address,
            open: true,
        };
        channel
            .transfer(|_bus| Ok(()))
            .await
            .with_context(|| {
                format!(
                    "Failed to select mux {:#04x} port {}",
                    address.mux, address.port
                )
            })?;

        debug!(
            sensor = format_args!("{:#04x}", address.sensor),
            mux = format_args!("{:#04x}", address.mux),
            port = address.port,
            "I2C channel opened"
        );
        Ok(channel)
    }

    /// The address this channel was opened on.
    pub fn address(&self) -> ChannelAddress {
        self.address
    }

    /// Select the mux port, then run `op` against the bus on a blocking thread.
    async fn transfer<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut I) -> Result<T> + Send + 'static,
    {
        if !self.open {
            bail!("channel closed");
        }
        let bus = Arc::clone(&self.bus);
        let address = self.address;

        tokio::task::spawn_blocking(move || {
            let mut bus = bus.blocking_lock();
            bus.write(address.mux, &[1 << address.port])
                .map_err(|e| anyhow!("mux select failed: {:?}", e))?;
            op(&mut bus)
        })
        .await
        .context("I2C task panicked")?
    }
}

#[cfg(feature = "linux_i2c")]
impl MuxedI2cChannel<linux_embedded_hal::I2cdev> {
    /// Open a channel on a Linux I2C character device such as `/dev/i2c-1`.
    ///
    /// # Errors
    /// Returns error if the device node cannot be opened or the port cannot
    /// be selected.
    pub async fn open_linux(path: &str, address: ChannelAddress) -> Result<Self> {
        let bus = linux_embedded_hal::I2cdev::new(path)
            .with_context(|| format!("Failed to open I2C bus '{}'", path))?;
        Self::open(bus, address).await
    }
}

#[async_trait]
impl<I> RegisterChannel for MuxedI2cChannel<I>
where
    I: I2c + Send + 'static,
    I::Error: Debug,
{
    async fn read_register(&mut self, register: u8) -> Result<u8> {
        let sensor = self.address.sensor;
        self.transfer(move |bus| {
            let mut buf = [0u8; 1];
            bus.write_read(sensor, &[register], &mut buf)
                .map_err(|e| anyhow!("read of register {:#04x} failed: {:?}", register, e))?;
            Ok(buf[0])
        })
        .await
    }

    async fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        let sensor = self.address.sensor;
        self.transfer(move |bus| {
            bus.write(sensor, &[register, value])
                .map_err(|e| anyhow!("write of register {:#04x} failed: {:?}", register, e))
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            bail!("channel already closed");
        }
        // Deselect every port so the sensor drops off the shared bus.
        let mux = self.address.mux;
        let bus = Arc::clone(&self.bus);
        tokio::task::spawn_blocking(move || {
            bus.blocking_lock()
                .write(mux, &[0x00])
                .map_err(|e| anyhow!("mux deselect failed: {:?}", e))
        })
        .await
        .context("I2C task panicked")??;
        self.open = false;
        debug!(port = self.address.port, "I2C channel closed");
        Ok(())
    }
}
