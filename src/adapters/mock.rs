//! Simulated AS7263 for testing
//!
//! This channel emulates the sensor side of the virtual-register gateway so the
//! whole driver can run without hardware. It provides:
//! - The status/write/read handshake with a configurable number of busy polls
//! - A virtual register file preloaded with a spectrum
//! - A conversion that completes after a configurable number of control reads
//! - Failure injection at the bus level and per virtual register
//! - Bus and virtual-write logs for test verification
//!
//! State lives behind an `Arc<Mutex<_>>`, so a test can keep a clone of the
//! simulator after handing the original to a device handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::RegisterChannel;
use crate::registers::{
    VirtualRegister, CHANNEL_COUNT, DATA_READY_BIT, READ_SLOT, STATUS_SLOT, WRITE_FLAG,
    WRITE_SLOT,
};

/// One physical transfer seen by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    /// A register read and the value returned.
    Read {
        /// Gateway slot.
        register: u8,
        /// Returned byte.
        value: u8,
    },
    /// A register write.
    Write {
        /// Gateway slot.
        register: u8,
        /// Written byte.
        value: u8,
    },
    /// The channel was closed.
    Close,
}

const REGISTER_FILE_LEN: usize = VirtualRegister::LAST_ADDRESS as usize + 1;

struct SimState {
    registers: [u8; REGISTER_FILE_LEN],
    busy_polls: u32,
    busy_remaining: u32,
    pending_write_address: Option<u8>,
    rx: Option<u8>,
    fail_pending_read: bool,
    conversion_polls: u32,
    conversion_remaining: Option<u32>,
    data_ready: bool,
    fail_next_transfers: u32,
    failing_virtual_reads: HashMap<u8, u32>,
    latency: Duration,
    closed: bool,
    bus_log: Vec<BusOp>,
    virtual_writes: Vec<(u8, u8)>,
}

impl SimState {
    fn virtual_read(&mut self, register: u8) -> u8 {
        if let Some(remaining) = self.failing_virtual_reads.get_mut(&register) {
            if *remaining > 0 {
                *remaining -= 1;
                self.fail_pending_read = true;
            }
        }

        let index = register as usize;
        if index >= REGISTER_FILE_LEN {
            return 0;
        }

        if register == VirtualRegister::Control.address() {
            match self.conversion_remaining {
                Some(0) => {
                    self.conversion_remaining = None;
                    self.data_ready = true;
                }
                Some(n) => self.conversion_remaining = Some(n - 1),
                None => {}
            }
            let ready = if self.data_ready { 1 << DATA_READY_BIT } else { 0 };
            return self.registers[index] | ready;
        }

        self.registers[index]
    }

    fn virtual_write(&mut self, register: u8, value: u8) {
        self.virtual_writes.push((register, value));
        let index = register as usize;
        if index >= REGISTER_FILE_LEN {
            return;
        }

        if register == VirtualRegister::Control.address() {
            // Data-ready is owned by the sensor; a control write restarts the conversion.
            self.registers[index] = value & !(1 << DATA_READY_BIT);
            self.data_ready = false;
            self.conversion_remaining = Some(self.conversion_polls);
        } else {
            self.registers[index] = value;
        }
    }

    fn status(&mut self) -> u8 {
        let rx = u8::from(self.rx.is_some());
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            return 0x02 | rx;
        }
        rx
    }

    fn write_slot(&mut self, value: u8) {
        match self.pending_write_address.take() {
            Some(register) => self.virtual_write(register, value),
            None if value & WRITE_FLAG != 0 => {
                self.pending_write_address = Some(value & !WRITE_FLAG);
            }
            None => {
                let byte = self.virtual_read(value);
                self.rx = Some(byte);
            }
        }
        self.busy_remaining = self.busy_polls;
    }

    fn read_slot(&mut self) -> Result<u8> {
        let byte = self.rx.take().unwrap_or(0);
        if std::mem::take(&mut self.fail_pending_read) {
            bail!("simulated NACK on read slot");
        }
        Ok(byte)
    }

    fn check_transfer(&mut self) -> Result<()> {
        if self.closed {
            bail!("channel closed");
        }
        if self.fail_next_transfers > 0 {
            self.fail_next_transfers -= 1;
            bail!("simulated bus error");
        }
        Ok(())
    }
}

/// In-memory AS7263 speaking the virtual-register gateway protocol.
///
/// # Example
///
/// ```
/// use as7263::adapters::SimulatedAs7263;
///
/// let sim = SimulatedAs7263::new().with_conversion_polls(3);
/// sim.inject_stray_byte(0xAA);
/// assert!(!sim.is_closed());
/// ```
#[derive(Clone)]
pub struct SimulatedAs7263 {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedAs7263 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAs7263 {
    /// Raw counts loaded by [`SimulatedAs7263::new`].
    pub const DEFAULT_RAW: [u16; CHANNEL_COUNT] = [1200, 2450, 3100, 2875, 1990, 1520];
    /// Calibrated values loaded by [`SimulatedAs7263::new`].
    pub const DEFAULT_CALIBRATED: [f32; CHANNEL_COUNT] =
        [412.5, 830.25, 1051.0, 977.75, 676.5, 516.0];
    /// Die temperature loaded by [`SimulatedAs7263::new`].
    pub const DEFAULT_TEMPERATURE: u8 = 29;

    /// Create a simulator with one busy poll per write, a conversion that
    /// completes after two control reads, and a default spectrum loaded.
    pub fn new() -> Self {
        let sim = Self {
            state: Arc::new(Mutex::new(SimState {
                registers: [0; REGISTER_FILE_LEN],
                busy_polls: 1,
                busy_remaining: 0,
                pending_write_address: None,
                rx: None,
                fail_pending_read: false,
                conversion_polls: 2,
                conversion_remaining: None,
                data_ready: false,
                fail_next_transfers: 0,
                failing_virtual_reads: HashMap::new(),
                latency: Duration::ZERO,
                closed: false,
                bus_log: Vec::new(),
                virtual_writes: Vec::new(),
            })),
        };
        sim.load_spectrum(
            Self::DEFAULT_RAW,
            Self::DEFAULT_CALIBRATED,
            Self::DEFAULT_TEMPERATURE,
        );
        sim
    }

    /// Status polls reporting busy after every write to the write slot.
    pub fn with_busy_polls(self, polls: u32) -> Self {
        self.state.lock().busy_polls = polls;
        self
    }

    /// Control reads reporting "not ready" after a conversion starts.
    pub fn with_conversion_polls(self, polls: u32) -> Self {
        self.state.lock().conversion_polls = polls;
        self
    }

    /// Simulated latency added to every transfer.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    /// Make every conversion run forever.
    pub fn never_ready(self) -> Self {
        self.with_conversion_polls(u32::MAX)
    }

    /// Load result registers and temperature.
    pub fn load_spectrum(
        &self,
        raw: [u16; CHANNEL_COUNT],
        calibrated: [f32; CHANNEL_COUNT],
        temperature: u8,
    ) {
        let mut state = self.state.lock();
        for channel in 0..CHANNEL_COUNT {
            let at = VirtualRegister::raw_count(channel) as usize;
            state.registers[at..at + 2].copy_from_slice(&raw[channel].to_be_bytes());
            let at = VirtualRegister::calibrated(channel) as usize;
            state.registers[at..at + 4]
                .copy_from_slice(&calibrated[channel].to_bits().to_be_bytes());
        }
        state.registers[VirtualRegister::Temperature.address() as usize] = temperature;
    }

    /// Set a virtual register directly, bypassing the gateway.
    pub fn poke(&self, register: u8, value: u8) {
        if let Some(slot) = self.state.lock().registers.get_mut(register as usize) {
            *slot = value;
        }
    }

    /// Current value of a virtual register (data-ready bit not included).
    pub fn virtual_register(&self, register: u8) -> u8 {
        self.state
            .lock()
            .registers
            .get(register as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Leave an unread byte in the read slot, as an aborted read would.
    pub fn inject_stray_byte(&self, value: u8) {
        self.state.lock().rx = Some(value);
    }

    /// Fail the next `count` transfers of any kind.
    pub fn fail_next_transfers(&self, count: u32) {
        self.state.lock().fail_next_transfers = count;
    }

    /// Fail the data fetch of the next `times` reads of a virtual register.
    pub fn fail_virtual_reads(&self, register: u8, times: u32) {
        self.state.lock().failing_virtual_reads.insert(register, times);
    }

    /// Whether the LED control register holds a non-zero pattern.
    pub fn illumination_on(&self) -> bool {
        self.virtual_register(VirtualRegister::LedControl.address()) != 0
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Every physical transfer so far.
    pub fn bus_log(&self) -> Vec<BusOp> {
        self.state.lock().bus_log.clone()
    }

    /// Every completed virtual-register write so far, as `(register, value)`.
    pub fn virtual_writes(&self) -> Vec<(u8, u8)> {
        self.state.lock().virtual_writes.clone()
    }

    /// Clear both logs.
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.bus_log.clear();
        state.virtual_writes.clear();
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RegisterChannel for SimulatedAs7263 {
    async fn read_register(&mut self, register: u8) -> Result<u8> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check_transfer()?;
        let value = match register {
            STATUS_SLOT => state.status(),
            READ_SLOT => state.read_slot()?,
            other => return Err(anyhow!("register {:#04x} is not readable", other)),
        };
        state.bus_log.push(BusOp::Read { register, value });
        Ok(value)
    }

    async fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check_transfer()?;
        if register != WRITE_SLOT {
            bail!("register {:#04x} is not writable", register);
        }
        state.write_slot(value);
        state.bus_log.push(BusOp::Write { register, value });
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            bail!("channel already closed");
        }
        state.closed = true;
        state.bus_log.push(BusOp::Close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_reports_busy_then_idle_after_write() {
        let mut sim = SimulatedAs7263::new().with_busy_polls(2);
        sim.write_register(WRITE_SLOT, 0x87).await.unwrap();
        assert_eq!(sim.read_register(STATUS_SLOT).await.unwrap(), 0x02);
        assert_eq!(sim.read_register(STATUS_SLOT).await.unwrap(), 0x02);
        assert_eq!(sim.read_register(STATUS_SLOT).await.unwrap(), 0x00);
    }

    #[tokio::test]
    async fn test_address_then_data_completes_a_virtual_write() {
        let mut sim = SimulatedAs7263::new().with_busy_polls(0);
        sim.write_register(WRITE_SLOT, 0x07 | WRITE_FLAG).await.unwrap();
        sim.write_register(WRITE_SLOT, 0x09).await.unwrap();
        assert!(sim.illumination_on());
        assert_eq!(sim.virtual_writes(), vec![(0x07, 0x09)]);
    }

    #[tokio::test]
    async fn test_read_request_fills_read_slot() {
        let mut sim = SimulatedAs7263::new().with_busy_polls(0);
        sim.write_register(WRITE_SLOT, 0x06).await.unwrap();
        assert_eq!(sim.read_register(STATUS_SLOT).await.unwrap(), 0x01);
        assert_eq!(
            sim.read_register(READ_SLOT).await.unwrap(),
            SimulatedAs7263::DEFAULT_TEMPERATURE
        );
        assert_eq!(sim.read_register(STATUS_SLOT).await.unwrap(), 0x00);
    }

    #[tokio::test]
    async fn test_conversion_sets_data_ready_after_configured_reads() {
        let mut sim = SimulatedAs7263::new().with_busy_polls(0).with_conversion_polls(1);
        sim.write_register(WRITE_SLOT, 0x04 | WRITE_FLAG).await.unwrap();
        sim.write_register(WRITE_SLOT, 0x3C).await.unwrap();

        let read_control = || {
            let mut sim = sim.clone();
            async move {
                sim.write_register(WRITE_SLOT, 0x04).await.unwrap();
                sim.read_register(READ_SLOT).await.unwrap()
            }
        };
        assert_eq!(read_control().await, 0x3C);
        assert_eq!(read_control().await, 0x3E);
    }

    #[tokio::test]
    async fn test_failure_injection_is_consumed() {
        let mut sim = SimulatedAs7263::new();
        sim.fail_next_transfers(1);
        assert!(sim.read_register(STATUS_SLOT).await.is_err());
        assert!(sim.read_register(STATUS_SLOT).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_transfers() {
        let mut sim = SimulatedAs7263::new();
        sim.close().await.unwrap();
        assert!(sim.is_closed());
        assert!(sim.read_register(STATUS_SLOT).await.is_err());
        assert!(sim.close().await.is_err());
        assert_eq!(sim.bus_log(), vec![BusOp::Close]);
    }
}
