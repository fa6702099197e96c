//! Spectrum domain entity
//!
//! A [`Spectrum`] is the immutable result of one acquisition: six channel
//! [`Count`]s in ascending wavelength order, the die temperature, and the
//! instant the sensor reported the conversion complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registers::{VirtualRegister, CHANNEL_COUNT, CHANNEL_NAMES, CHANNEL_WAVELENGTHS_NM};

/// One spectral channel of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Count {
    /// Nominal channel wavelength in nanometers.
    pub wavelength_nm: u16,
    /// Factory-calibrated value (sensor-internal units).
    pub calibrated: f32,
    /// Raw ADC count.
    pub raw: u16,
}

/// Raw result bytes exactly as read from the sensor, before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawResult {
    /// Virtual registers 0x08..=0x13.
    pub counts: [u8; VirtualRegister::RAW_COUNTS_LEN],
    /// Virtual registers 0x14..=0x2B.
    pub calibrated: [u8; VirtualRegister::CALIBRATED_LEN],
    /// Virtual register 0x06.
    pub temperature: u8,
}

/// A complete six-band NIR reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Wall-clock time the conversion was confirmed complete.
    pub captured_at: DateTime<Utc>,
    /// `captured_at` as wall-clock nanoseconds since the Unix epoch (not a
    /// monotonic reading), saturating at `i64::MAX`.
    pub captured_at_ns: i64,
    /// Sensor die temperature in degrees Celsius.
    pub temperature_c: u8,
    /// Channels 610, 680, 730, 760, 810 and 860 nm, in that order.
    pub counts: [Count; CHANNEL_COUNT],
}

impl Spectrum {
    /// Decode a set of raw result bytes captured at `captured_at`.
    pub fn decode(captured_at: DateTime<Utc>, raw: &RawResult) -> Self {
        let counts = std::array::from_fn(|channel| {
            let at = channel * 2;
            let raw_count = decode_u16([raw.counts[at], raw.counts[at + 1]]);
            let at = channel * 4;
            let calibrated = decode_f32([
                raw.calibrated[at],
                raw.calibrated[at + 1],
                raw.calibrated[at + 2],
                raw.calibrated[at + 3],
            ]);
            Count {
                wavelength_nm: CHANNEL_WAVELENGTHS_NM[channel],
                calibrated,
                raw: raw_count,
            }
        });

        Self {
            captured_at,
            captured_at_ns: captured_at.timestamp_nanos_opt().unwrap_or(i64::MAX),
            temperature_c: raw.temperature,
            counts,
        }
    }

    /// The channel at `wavelength_nm`, if it is one of the six.
    pub fn channel(&self, wavelength_nm: u16) -> Option<&Count> {
        self.counts.iter().find(|c| c.wavelength_nm == wavelength_nm)
    }

    /// Raw counts in wavelength order.
    pub fn raw_counts(&self) -> [u16; CHANNEL_COUNT] {
        self.counts.map(|c| c.raw)
    }

    /// Calibrated values in wavelength order.
    pub fn calibrated_values(&self) -> [f32; CHANNEL_COUNT] {
        self.counts.map(|c| c.calibrated)
    }

    /// `(name, count)` pairs using the datasheet channel letters.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, &Count)> {
        CHANNEL_NAMES.iter().copied().zip(self.counts.iter())
    }
}

/// Assemble a big-endian unsigned 16-bit count.
pub fn decode_u16(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// Assemble a big-endian IEEE-754 binary32 value.
pub fn decode_f32(bytes: [u8; 4]) -> f32 {
    f32::from_bits(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw_result() -> RawResult {
        let mut counts = [0u8; 12];
        let mut calibrated = [0u8; 24];
        for channel in 0..CHANNEL_COUNT {
            counts[channel * 2..channel * 2 + 2]
                .copy_from_slice(&(100 * (channel as u16 + 1)).to_be_bytes());
            calibrated[channel * 4..channel * 4 + 4]
                .copy_from_slice(&(channel as f32 + 0.5).to_bits().to_be_bytes());
        }
        RawResult {
            counts,
            calibrated,
            temperature: 31,
        }
    }

    #[test]
    fn test_decode_u16_big_endian() {
        assert_eq!(decode_u16([0x01, 0x02]), 258);
        assert_eq!(decode_u16([0xFF, 0xFF]), u16::MAX);
    }

    #[test]
    fn test_decode_f32_big_endian() {
        assert_eq!(decode_f32([0x3F, 0x80, 0x00, 0x00]), 1.0);
        assert_eq!(decode_f32([0xC0, 0x00, 0x00, 0x00]), -2.0);
    }

    #[test]
    fn test_spectrum_has_six_fixed_wavelengths_in_order() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let saturated = RawResult {
            counts: [0xFF; 12],
            calibrated: [0; 24],
            temperature: 0,
        };
        for raw in [raw_result(), saturated] {
            let spectrum = Spectrum::decode(at, &raw);
            let wavelengths: Vec<u16> = spectrum.counts.iter().map(|c| c.wavelength_nm).collect();
            assert_eq!(wavelengths, vec![610, 680, 730, 760, 810, 860]);
        }
    }

    #[test]
    fn test_spectrum_decodes_channels_and_metadata() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let spectrum = Spectrum::decode(at, &raw_result());

        assert_eq!(spectrum.raw_counts(), [100, 200, 300, 400, 500, 600]);
        assert_eq!(spectrum.calibrated_values(), [0.5, 1.5, 2.5, 3.5, 4.5, 5.5]);
        assert_eq!(spectrum.temperature_c, 31);
        assert_eq!(spectrum.captured_at, at);
        assert_eq!(spectrum.captured_at_ns, 1_709_294_400_000_000_000);
        assert_eq!(spectrum.channel(760).map(|c| c.raw), Some(400));
        assert!(spectrum.channel(700).is_none());
        assert_eq!(spectrum.named().next().map(|(name, _)| name), Some("R"));
    }

    #[test]
    fn test_spectrum_serializes_counts_as_array() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let json = serde_json::to_value(Spectrum::decode(at, &raw_result())).unwrap();
        assert_eq!(json["counts"].as_array().map(Vec::len), Some(6));
        assert_eq!(json["counts"][0]["wavelength_nm"], 610);
        assert_eq!(json["temperature_c"], 31);
    }
}
