//! Virtual register gateway
//!
//! The AS7263 does not expose its registers on the bus. Every access goes
//! through three physical slots and a status byte:
//!
//! ```text
//! write(reg, value)                      read(reg) -> value
//! -----------------                      ------------------
//! Idle                                   Idle
//!   poll STATUS until 00 (drain 01)        poll STATUS until 00 (drain 01)
//!   WRITE <- reg | 0x80                    WRITE <- reg
//! AwaitingWriteAck                       AwaitingReadReady
//!   poll STATUS until 00                   poll STATUS until 01
//!   WRITE <- value                       DataAvailable
//! Idle                                     READ -> value
//!                                        Idle
//! ```
//!
//! A `01` seen while waiting for idle is a byte left behind by an earlier,
//! aborted read. It is drained by reading the read slot, not by re-reading
//! status: the ready flag only clears once the byte itself is fetched, so a
//! status read would leave it in place and the next read would return the
//! stale byte as its own result.
//!
//! The machine only ever has one transaction in flight. A transport error
//! returns it to `Idle`; a future dropped mid-transaction leaves it where it
//! was, and every later call fails with [`SensorError::Abandoned`].

use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::adapters::RegisterChannel;
use crate::error::{SensorError, SensorResult};
use crate::error_recovery::PollPolicy;
use crate::registers::{Status, READ_SLOT, STATUS_SLOT, WRITE_FLAG, WRITE_SLOT};

/// Position of the gateway in its transaction cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transaction {
    /// Nothing in flight.
    Idle,
    /// Write address sent; waiting for the sensor to accept it.
    AwaitingWriteAck,
    /// Read address sent; waiting for the data byte.
    AwaitingReadReady,
    /// Data byte announced; about to fetch it.
    DataAvailable,
}

/// Status/write/read handshake over a [`RegisterChannel`].
pub struct VirtualRegisterGateway<C> {
    channel: C,
    poll: PollPolicy,
    state: Transaction,
    debug: bool,
}

impl<C: RegisterChannel> VirtualRegisterGateway<C> {
    /// Wrap an open channel.
    pub fn new(channel: C, poll: PollPolicy) -> Self {
        Self {
            channel,
            poll,
            state: Transaction::Idle,
            debug: false,
        }
    }

    /// Log every transaction at debug level instead of trace.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Current transaction state.
    pub fn state(&self) -> Transaction {
        self.state
    }

    /// Write `value` to virtual register `register`.
    pub async fn write(&mut self, register: u8, value: u8) -> SensorResult<()> {
        self.ensure_idle()?;
        let result = self.write_transaction(register, value).await;
        self.state = Transaction::Idle;
        if result.is_ok() {
            self.log(format_args!("vreg[{:#04x}] <- {:#04x}", register, value));
        }
        result
    }

    /// Read virtual register `register`.
    pub async fn read(&mut self, register: u8) -> SensorResult<u8> {
        self.ensure_idle()?;
        let result = self.read_transaction(register).await;
        self.state = Transaction::Idle;
        if let Ok(value) = result {
            self.log(format_args!("vreg[{:#04x}] -> {:#04x}", register, value));
        }
        result
    }

    /// Give back the channel, whatever state the machine is in.
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Forget an abandoned transaction so the channel can be used once more.
    ///
    /// Only meant for shutdown; the stray byte, if any, is drained by the
    /// next transaction's idle wait.
    pub(crate) fn force_idle(&mut self) {
        if self.state != Transaction::Idle {
            warn!(state = ?self.state, "discarding abandoned gateway transaction");
        }
        self.state = Transaction::Idle;
    }

    async fn write_transaction(&mut self, register: u8, value: u8) -> SensorResult<()> {
        self.await_idle().await?;
        self.put(WRITE_SLOT, register | WRITE_FLAG).await?;
        self.state = Transaction::AwaitingWriteAck;

        self.await_idle().await?;
        self.put(WRITE_SLOT, value).await
    }

    async fn read_transaction(&mut self, register: u8) -> SensorResult<u8> {
        self.await_idle().await?;
        self.put(WRITE_SLOT, register & !WRITE_FLAG).await?;
        self.state = Transaction::AwaitingReadReady;

        self.await_read_ready().await?;
        self.state = Transaction::DataAvailable;
        self.get(READ_SLOT).await
    }

    fn ensure_idle(&self) -> SensorResult<()> {
        match self.state {
            Transaction::Idle => Ok(()),
            state => Err(SensorError::Abandoned { state }),
        }
    }

    /// Poll until the status reads idle, draining a stray ready byte.
    async fn await_idle(&mut self) -> SensorResult<()> {
        let mut polls = 0;
        loop {
            match Status::decode(self.get(STATUS_SLOT).await?) {
                Status::Idle => return Ok(()),
                Status::ReadReady => {
                    let stray = self.get(READ_SLOT).await?;
                    warn!(stray = format_args!("{:#04x}", stray), "drained unread gateway byte");
                }
                Status::Busy(_) => {}
            }
            self.poll.tick(&mut polls, "gateway idle")?;
            sleep(self.poll.interval).await;
        }
    }

    /// Poll until the status announces the requested byte.
    async fn await_read_ready(&mut self) -> SensorResult<()> {
        let mut polls = 0;
        loop {
            if Status::decode(self.get(STATUS_SLOT).await?) == Status::ReadReady {
                return Ok(());
            }
            self.poll.tick(&mut polls, "gateway read ready")?;
            sleep(self.poll.interval).await;
        }
    }

    async fn get(&mut self, slot: u8) -> SensorResult<u8> {
        self.channel
            .read_register(slot)
            .await
            .map_err(|e| SensorError::transport(slot, e))
    }

    async fn put(&mut self, slot: u8, value: u8) -> SensorResult<()> {
        self.channel
            .write_register(slot, value)
            .await
            .map_err(|e| SensorError::transport(slot, e))
    }

    fn log(&self, message: std::fmt::Arguments<'_>) {
        if self.debug {
            debug!("{}", message);
        } else {
            trace!("{}", message);
        }
    }
}
