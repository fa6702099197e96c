//! AS7263 register map
//!
//! Two address spaces are involved:
//!
//! - **Gateway slots**: the three physical I2C registers the host actually
//!   touches (status, write, read).
//! - **Virtual registers**: the sensor's real register file, only reachable by
//!   running the status/write/read handshake against the gateway slots.
//!
//! ```text
//! 0x04        control (gain bits 4-5, mode bits 2-3, data-ready bit 1)
//! 0x05        integration time (x 2.8 ms)
//! 0x06        device temperature (deg C)
//! 0x07        LED control
//! 0x08..0x13  raw counts R S T U V W, u16 big-endian
//! 0x14..0x2B  calibrated R S T U V W, f32 big-endian
//! ```

use std::fmt;

/// Physical gateway register: status byte.
pub const STATUS_SLOT: u8 = 0x00;
/// Physical gateway register: address/data writes.
pub const WRITE_SLOT: u8 = 0x01;
/// Physical gateway register: read-back data.
pub const READ_SLOT: u8 = 0x02;

/// Set on an address byte written to the write slot to select a register write.
pub const WRITE_FLAG: u8 = 0x80;

/// Control value applied by the baseline configuration: gain 64x, mode 3.
pub const DEFAULT_CONTROL: u8 = 0x3C;
/// LED control pattern for illumination on (drive current bit + enable bit).
pub const ILLUMINATION_ON: u8 = 0x09;
/// LED control pattern for illumination off.
pub const ILLUMINATION_OFF: u8 = 0x00;

/// Bit position of the data-ready flag in the control register.
pub const DATA_READY_BIT: u8 = 1;
/// Mode field mask (bits 2-3) in the control register.
pub const MODE_MASK: u8 = 0b0000_1100;
/// Shift of the mode field.
pub const MODE_SHIFT: u8 = 2;
/// Gain field mask (bits 4-5) in the control register.
pub const GAIN_MASK: u8 = 0b0011_0000;
/// Shift of the gain field.
pub const GAIN_SHIFT: u8 = 4;
/// Highest valid operating mode.
pub const MAX_MODE: u8 = 3;
/// Operating mode that converts all six channels.
pub const MODE_ALL_CHANNELS_ONE_SHOT: u8 = 3;

/// Integration time step of register 0x05, in milliseconds.
pub const INTEGRATION_STEP_MS: f32 = 2.8;

/// Number of spectral channels.
pub const CHANNEL_COUNT: usize = 6;
/// Nominal channel wavelengths in nanometers, ascending.
pub const CHANNEL_WAVELENGTHS_NM: [u16; CHANNEL_COUNT] = [610, 680, 730, 760, 810, 860];
/// Datasheet channel letters, in wavelength order.
pub const CHANNEL_NAMES: [&str; CHANNEL_COUNT] = ["R", "S", "T", "U", "V", "W"];

/// Named virtual registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VirtualRegister {
    /// Control/mode register.
    Control = 0x04,
    /// Integration time register.
    IntegrationTime = 0x05,
    /// Device temperature.
    Temperature = 0x06,
    /// LED (illumination) control.
    LedControl = 0x07,
    /// First byte of the raw count block.
    RawCountsStart = 0x08,
    /// First byte of the calibrated value block.
    CalibratedStart = 0x14,
}

impl VirtualRegister {
    /// Raw count block length in bytes (6 channels x 2 bytes).
    pub const RAW_COUNTS_LEN: usize = CHANNEL_COUNT * 2;
    /// Calibrated block length in bytes (6 channels x 4 bytes).
    pub const CALIBRATED_LEN: usize = CHANNEL_COUNT * 4;
    /// Highest valid virtual address.
    pub const LAST_ADDRESS: u8 = 0x2B;

    /// Wire address of this register.
    pub const fn address(self) -> u8 {
        self as u8
    }

    /// Address of the high byte of a channel's raw count.
    pub const fn raw_count(channel: usize) -> u8 {
        VirtualRegister::RawCountsStart as u8 + (channel as u8) * 2
    }

    /// Address of the most significant byte of a channel's calibrated value.
    pub const fn calibrated(channel: usize) -> u8 {
        VirtualRegister::CalibratedStart as u8 + (channel as u8) * 4
    }
}

/// Decoded low two bits of the gateway status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `00`: no transaction pending.
    Idle,
    /// `01`: a byte is waiting in the read slot.
    ReadReady,
    /// `10` or `11`: the sensor is still consuming the last write.
    Busy(u8),
}

impl Status {
    /// Decode a raw status byte.
    pub const fn decode(raw: u8) -> Self {
        match raw & 0x03 {
            0x00 => Status::Idle,
            0x01 => Status::ReadReady,
            bits => Status::Busy(bits),
        }
    }
}

/// Analog gain field of the control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gain {
    /// 1x
    X1 = 0,
    /// 3.7x
    X3_7 = 1,
    /// 16x
    X16 = 2,
    /// 64x (baseline configuration)
    X64 = 3,
}

impl Gain {
    /// Decode the gain field (bits 4-5) of a control word.
    pub const fn from_control(control: u8) -> Self {
        match (control & GAIN_MASK) >> GAIN_SHIFT {
            0 => Gain::X1,
            1 => Gain::X3_7,
            2 => Gain::X16,
            _ => Gain::X64,
        }
    }

    /// Amplification factor.
    pub const fn factor(self) -> f32 {
        match self {
            Gain::X1 => 1.0,
            Gain::X3_7 => 3.7,
            Gain::X16 => 16.0,
            Gain::X64 => 64.0,
        }
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.factor())
    }
}

/// Test bit `pos` of `n`.
pub const fn has_bit(n: u8, pos: u8) -> bool {
    n & (1 << pos) != 0
}

/// Replace the bits selected by `mask` with `value << shift`, keeping the rest.
pub const fn replace_field(current: u8, mask: u8, shift: u8, value: u8) -> u8 {
    (current & !mask) | ((value << shift) & mask)
}
