//! AS7263 device handle
//!
//! [`As7263`] owns one open [`RegisterChannel`] through a
//! [`VirtualRegisterGateway`] and exposes the sensor's controls as async
//! methods. Every method takes `&mut self`: one handle drives one sensor, one
//! operation at a time.
//!
//! ```no_run
//! # async fn demo() -> as7263::SensorResult<()> {
//! use as7263::{adapters::SimulatedAs7263, As7263, DeviceOptions};
//!
//! let mut sensor = As7263::open(SimulatedAs7263::new(), DeviceOptions::default()).await?;
//! sensor.set_mode(3).await?;
//! while !sensor.is_data_ready().await? {}
//! sensor.close().await
//! # }
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::acquisition::AcquisitionPolicy;
use crate::adapters::RegisterChannel;
use crate::error::{SensorError, SensorResult};
use crate::error_recovery::{retry, PollPolicy, RetryPolicy, Retryable};
use crate::gateway::{Transaction, VirtualRegisterGateway};
use crate::registers::{
    has_bit, replace_field, Gain, VirtualRegister, DATA_READY_BIT, DEFAULT_CONTROL, GAIN_MASK,
    GAIN_SHIFT, ILLUMINATION_OFF, ILLUMINATION_ON, INTEGRATION_STEP_MS, MAX_MODE, MODE_MASK,
    MODE_SHIFT,
};

/// Tunables applied when a handle is opened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceOptions {
    /// Log each virtual-register transaction at debug level.
    pub debug: bool,
    /// Gateway status polling.
    pub poll: PollPolicy,
    /// Retry hardening for the data-ready poll.
    pub readiness: RetryPolicy,
    /// Measurement cycle settings.
    pub acquisition: AcquisitionPolicy,
}

/// Handle to one AS7263.
pub struct As7263<C> {
    gateway: VirtualRegisterGateway<C>,
    pub(crate) options: DeviceOptions,
    /// Set when an acquisition was cut short; holds the gateway state at that moment.
    abandoned: Option<Transaction>,
}

impl<C: RegisterChannel> As7263<C> {
    /// Take ownership of an open channel and apply the default configuration.
    ///
    /// If configuring fails the channel is released before the error is
    /// returned.
    ///
    /// # Errors
    /// Returns the transport error raised while configuring.
    pub async fn open(channel: C, options: DeviceOptions) -> SensorResult<Self> {
        let mut gateway = VirtualRegisterGateway::new(channel, options.poll.clone());
        gateway.set_debug(options.debug);
        let mut device = Self {
            gateway,
            options,
            abandoned: None,
        };

        if let Err(e) = device.set_configuration().await {
            let mut channel = device.gateway.into_channel();
            if let Err(close_err) = channel.close().await {
                warn!(error = %close_err, "failed to release channel after configuration error");
            }
            return Err(e);
        }

        info!(debug = device.options.debug, "AS7263 opened");
        Ok(device)
    }

    /// Switch per-transaction logging between debug and trace level.
    pub fn set_debug(&mut self, debug: bool) {
        self.options.debug = debug;
        self.gateway.set_debug(debug);
    }

    /// Options this handle was opened with.
    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    /// Whether an interrupted acquisition has poisoned this handle.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.is_some() || self.gateway.state() != Transaction::Idle
    }

    /// Read any virtual register.
    ///
    /// # Errors
    /// Fails if the handle is abandoned or the transfer fails.
    pub async fn read_register(&mut self, register: u8) -> SensorResult<u8> {
        self.ensure_usable()?;
        self.gateway.read(register).await
    }

    /// Write any virtual register.
    ///
    /// # Errors
    /// Fails if the handle is abandoned or the transfer fails.
    pub async fn write_register(&mut self, register: u8, value: u8) -> SensorResult<()> {
        self.ensure_usable()?;
        self.gateway.write(register, value).await
    }

    /// Restore the baseline control word (64x gain, one-shot mode, data-ready
    /// clear) and turn the illumination LED off.
    ///
    /// # Errors
    /// Fails on the first transfer error.
    pub async fn set_configuration(&mut self) -> SensorResult<()> {
        self.write_register(VirtualRegister::Control.address(), DEFAULT_CONTROL)
            .await?;
        self.illumination_off().await
    }

    /// Turn the illumination LED on.
    ///
    /// # Errors
    /// Fails if the write fails.
    pub async fn illumination_on(&mut self) -> SensorResult<()> {
        self.write_register(VirtualRegister::LedControl.address(), ILLUMINATION_ON)
            .await
    }

    /// Turn the illumination LED off.
    ///
    /// # Errors
    /// Fails if the write fails.
    pub async fn illumination_off(&mut self) -> SensorResult<()> {
        self.write_register(VirtualRegister::LedControl.address(), ILLUMINATION_OFF)
            .await
    }

    /// Select a conversion mode. Values above 3 are clamped to 3.
    ///
    /// Returns the mode actually written.
    ///
    /// # Errors
    /// Fails if reading or writing the control register fails.
    pub async fn set_mode(&mut self, mode: u8) -> SensorResult<u8> {
        let mode = mode.min(MAX_MODE);
        self.update_control(MODE_MASK, MODE_SHIFT, mode).await?;
        Ok(mode)
    }

    /// Select the analog gain.
    ///
    /// # Errors
    /// Fails if reading or writing the control register fails.
    pub async fn set_gain(&mut self, gain: Gain) -> SensorResult<()> {
        self.update_control(GAIN_MASK, GAIN_SHIFT, gain as u8).await?;
        debug!(gain = %gain, "gain set");
        Ok(())
    }

    /// Current analog gain, decoded from the control register.
    ///
    /// # Errors
    /// Fails if the read fails.
    pub async fn gain(&mut self) -> SensorResult<Gain> {
        let control = self
            .read_register(VirtualRegister::Control.address())
            .await?;
        Ok(Gain::from_control(control))
    }

    /// Set the integration time in milliseconds.
    ///
    /// The sensor counts in steps of 2.8 ms, from 1 to 255 steps; the request
    /// is rounded to the nearest step and clamped. Returns the effective time.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a negative or non-finite time, otherwise
    /// fails if the write fails.
    pub async fn set_integration_time(&mut self, millis: f32) -> SensorResult<f32> {
        if !millis.is_finite() || millis < 0.0 {
            return Err(SensorError::InvalidArgument(format!(
                "integration time must be a non-negative number of milliseconds, got {}",
                millis
            )));
        }
        let steps = (millis / INTEGRATION_STEP_MS).round().clamp(1.0, 255.0) as u8;
        self.write_register(VirtualRegister::IntegrationTime.address(), steps)
            .await?;
        Ok(f32::from(steps) * INTEGRATION_STEP_MS)
    }

    /// Whether the current conversion has finished.
    ///
    /// The control register is read under the readiness retry policy, so a
    /// transient bus fault does not end an acquisition. Running out of
    /// attempts is an error, never "not ready".
    ///
    /// # Errors
    /// Returns `RetryExhausted` once the policy's attempts are spent.
    pub async fn is_data_ready(&mut self) -> SensorResult<bool> {
        self.ensure_usable()?;
        let policy = self.options.readiness.clone();
        let mut read = ControlRead {
            gateway: &mut self.gateway,
        };
        let control = retry(&mut read, &policy).await?;
        Ok(has_bit(control, DATA_READY_BIT))
    }

    /// Die temperature in degrees Celsius.
    ///
    /// # Errors
    /// Fails if the read fails.
    pub async fn read_temperature(&mut self) -> SensorResult<u8> {
        self.read_register(VirtualRegister::Temperature.address())
            .await
    }

    /// Turn the illumination off and release the channel.
    ///
    /// An abandoned handle is forced idle first so the illumination write is
    /// still attempted. The channel is released even if that write fails; the
    /// write error is reported in preference to a close error.
    ///
    /// # Errors
    /// Returns the first failure of the two steps.
    pub async fn close(mut self) -> SensorResult<()> {
        self.abandoned = None;
        self.gateway.force_idle();
        let dark = self
            .gateway
            .write(VirtualRegister::LedControl.address(), ILLUMINATION_OFF)
            .await;
        if let Err(e) = &dark {
            warn!(error = %e, "failed to turn illumination off before close");
        }

        let mut channel = self.gateway.into_channel();
        let released = channel
            .close()
            .await
            .map_err(|e| SensorError::Close(e.into()));

        info!("AS7263 closed");
        dark.and(released)
    }

    /// Poison the handle after an interrupted operation.
    pub(crate) fn abandon(&mut self) {
        let state = self.gateway.state();
        warn!(state = ?state, "AS7263 handle abandoned");
        self.abandoned = Some(state);
    }

    fn ensure_usable(&self) -> SensorResult<()> {
        match self.abandoned {
            Some(state) => Err(SensorError::Abandoned { state }),
            None => Ok(()),
        }
    }

    async fn update_control(&mut self, mask: u8, shift: u8, value: u8) -> SensorResult<()> {
        let control = self
            .read_register(VirtualRegister::Control.address())
            .await?;
        self.write_register(
            VirtualRegister::Control.address(),
            replace_field(control, mask, shift, value),
        )
        .await
    }
}

/// One read of the control register, as a retryable unit.
struct ControlRead<'a, C> {
    gateway: &'a mut VirtualRegisterGateway<C>,
}

#[async_trait]
impl<'a, C: RegisterChannel> Retryable for ControlRead<'a, C> {
    type Output = u8;

    async fn attempt(&mut self) -> SensorResult<u8> {
        self.gateway.read(VirtualRegister::Control.address()).await
    }
}
