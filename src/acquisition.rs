//! Spectrum acquisition
//!
//! One measurement runs these steps in order:
//!
//! 1. Configure: baseline control word, illumination off
//! 2. Illuminate
//! 3. Trigger one-shot conversion of all six channels (mode 3)
//! 4. Await data-ready
//! 5. Capture the timestamp
//! 6. Read the twelve raw count bytes
//! 7. Read the twenty-four calibrated bytes
//! 8. Read the temperature
//! 9. Assemble the [`Spectrum`]
//!
//! [`As7263::request`] runs steps 1-3 and [`As7263::collect`] runs 4-9, so a
//! caller can do other work during the conversion. A failure in steps 6-8
//! discards every byte read so far.

use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::debug;

use crate::adapters::RegisterChannel;
use crate::device::As7263;
use crate::error::{SensorError, SensorResult};
use crate::error_recovery::PollPolicy;
use crate::registers::{VirtualRegister, MODE_ALL_CHANNELS_ONE_SHOT};
use crate::spectrum::{RawResult, Spectrum};

/// Measurement cycle settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionPolicy {
    /// Expected conversion time, returned by [`As7263::request`].
    pub conversion_latency: Duration,
    /// Upper bound on data-ready polls; `None` waits indefinitely.
    pub max_ready_polls: Option<u32>,
}

impl Default for AcquisitionPolicy {
    fn default() -> Self {
        Self {
            conversion_latency: Duration::from_millis(1450),
            max_ready_polls: None,
        }
    }
}

impl<C: RegisterChannel> As7263<C> {
    /// Run a complete measurement.
    ///
    /// # Errors
    /// Returns the first error of any step; no partial spectrum is produced.
    pub async fn read_all(&mut self) -> SensorResult<Spectrum> {
        self.request().await?;
        self.collect().await
    }

    /// Configure, illuminate and trigger a conversion.
    ///
    /// Returns how long the conversion is expected to take.
    ///
    /// # Errors
    /// Returns the first transfer error.
    pub async fn request(&mut self) -> SensorResult<Duration> {
        self.set_configuration().await?;
        self.illumination_on().await?;
        self.set_mode(MODE_ALL_CHANNELS_ONE_SHOT).await?;
        debug!("conversion triggered");
        Ok(self.options.acquisition.conversion_latency)
    }

    /// Wait for the triggered conversion and read the result.
    ///
    /// # Errors
    /// Fails if readiness polling fails or runs out of polls, or if any result
    /// byte cannot be read.
    pub async fn collect(&mut self) -> SensorResult<Spectrum> {
        let polls = self.await_data_ready().await?;
        let captured_at = Utc::now();

        let raw = self.read_result().await?;
        let spectrum = Spectrum::decode(captured_at, &raw);
        debug!(
            polls,
            temperature_c = spectrum.temperature_c,
            "spectrum captured"
        );
        Ok(spectrum)
    }

    /// Run [`As7263::read_all`] within `budget`.
    ///
    /// When the budget expires the measurement is dropped wherever it was and
    /// the handle is abandoned: every later call fails with
    /// [`SensorError::Abandoned`] and only [`As7263::close`] remains useful.
    ///
    /// # Errors
    /// Returns [`SensorError::Timeout`] on expiry, otherwise as `read_all`.
    pub async fn acquire_within(&mut self, budget: Duration) -> SensorResult<Spectrum> {
        match timeout(budget, self.read_all()).await {
            Ok(result) => result,
            Err(_) => {
                self.abandon();
                Err(SensorError::Timeout(budget))
            }
        }
    }

    /// Poll data-ready until set. Returns the number of polls made.
    async fn await_data_ready(&mut self) -> SensorResult<u32> {
        let budget = PollPolicy {
            interval: Duration::ZERO,
            max_polls: self.options.acquisition.max_ready_polls,
        };
        let mut polls = 0;
        loop {
            if self.is_data_ready().await? {
                return Ok(polls + 1);
            }
            budget.tick(&mut polls, "conversion ready")?;
            // Let a surrounding timeout observe expiry.
            tokio::task::yield_now().await;
        }
    }

    async fn read_result(&mut self) -> SensorResult<RawResult> {
        let mut counts = [0u8; VirtualRegister::RAW_COUNTS_LEN];
        self.read_block(VirtualRegister::RawCountsStart, &mut counts)
            .await?;

        let mut calibrated = [0u8; VirtualRegister::CALIBRATED_LEN];
        self.read_block(VirtualRegister::CalibratedStart, &mut calibrated)
            .await?;

        let temperature = self.read_temperature().await?;

        Ok(RawResult {
            counts,
            calibrated,
            temperature,
        })
    }

    async fn read_block(&mut self, start: VirtualRegister, buf: &mut [u8]) -> SensorResult<()> {
        for (register, byte) in (start.address()..).zip(buf.iter_mut()) {
            *byte = self.read_register(register).await?;
        }
        Ok(())
    }
}
