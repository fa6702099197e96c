//! Configuration System using Figment
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. A TOML file (missing files are skipped)
//! 3. Environment variables prefixed with `AS7263_`, nested keys split on `__`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! AS7263_APPLICATION__LOG_LEVEL=debug
//! AS7263_BUS__MUX_PORT=3
//! AS7263_READINESS__RETRY_ATTEMPTS=20
//! ```
//!
//! # Example
//!
//! ```toml
//! [application]
//! log_level = "info"
//! debug = false
//!
//! [bus]
//! device = "/dev/i2c-1"
//! sensor_address = 73   # 0x49
//! mux_address = 112     # 0x70
//! mux_port = 2
//!
//! [gateway]
//! poll_interval_ms = 1
//!
//! [readiness]
//! retry_attempts = 10
//! retry_delay_ms = 500
//!
//! [acquisition]
//! conversion_latency_ms = 1450
//! timeout_ms = 10000
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::acquisition::AcquisitionPolicy;
use crate::adapters::i2c_mux::MUX_PORTS;
use crate::adapters::ChannelAddress;
use crate::device::DeviceOptions;
use crate::error_recovery::{PollPolicy, RetryPolicy};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "AS7263_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered sources could not be merged or deserialized.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Values parsed but are not usable.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Process-level settings
    pub application: ApplicationSettings,
    /// Where the sensor is on the bus
    pub bus: BusSettings,
    /// Virtual-register gateway polling
    pub gateway: GatewaySettings,
    /// Data-ready poll hardening
    pub readiness: ReadinessSettings,
    /// Measurement cycle
    pub acquisition: AcquisitionSettings,
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log every virtual-register transaction at debug level
    pub debug: bool,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            debug: false,
        }
    }
}

/// Bus location of the sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// I2C character device
    pub device: String,
    /// 7-bit sensor address
    pub sensor_address: u8,
    /// 7-bit multiplexer address
    pub mux_address: u8,
    /// Multiplexer port (0-7)
    pub mux_port: u8,
}

impl Default for BusSettings {
    fn default() -> Self {
        let address = ChannelAddress::default();
        Self {
            device: "/dev/i2c-1".to_string(),
            sensor_address: address.sensor,
            mux_address: address.mux,
            mux_port: address.port,
        }
    }
}

/// Gateway status polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Delay between status polls in milliseconds
    pub poll_interval_ms: u64,
    /// Optional bound on status polls per wait
    pub max_polls: Option<u32>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1,
            max_polls: None,
        }
    }
}

/// Data-ready poll retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    /// Attempts before a failing control read is reported
    pub retry_attempts: u32,
    /// Delay between attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            retry_attempts: policy.max_attempts,
            retry_delay_ms: policy.backoff_delay.as_millis() as u64,
        }
    }
}

/// Measurement cycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Expected conversion time reported by `request`, in milliseconds
    pub conversion_latency_ms: u64,
    /// Optional bound on data-ready polls per acquisition
    pub max_ready_polls: Option<u32>,
    /// Optional whole-acquisition budget in milliseconds
    pub timeout_ms: Option<u64>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            conversion_latency_ms: AcquisitionPolicy::default()
                .conversion_latency
                .as_millis() as u64,
            max_ready_polls: None,
            timeout_ms: None,
        }
    }
}

impl Settings {
    /// Load configuration from a specific file path
    ///
    /// Configuration is merged in this order of precedence (highest to lowest):
    /// 1. Environment variables (`AS7263_` prefix)
    /// 2. The TOML file at `path`, if it exists
    /// 3. Built-in defaults
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the sources cannot be merged or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Settings::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Load from a TOML string layered over defaults (no environment).
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the string cannot be parsed or validation fails.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(toml)),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Self = figment.extract().map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Addresses are 7-bit and the mux port exists
    /// - The readiness retry makes at least one attempt
    /// - Poll and acquisition budgets are non-zero when set
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.bus.mux_port >= MUX_PORTS {
            return Err(ConfigError::ValidationError(format!(
                "Invalid mux_port {}. Must be 0-{}",
                self.bus.mux_port,
                MUX_PORTS - 1
            )));
        }

        for (name, address) in [
            ("sensor_address", self.bus.sensor_address),
            ("mux_address", self.bus.mux_address),
        ] {
            if address > 0x7F {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid {} {:#04x}. Must be a 7-bit address",
                    name, address
                )));
            }
        }

        if self.readiness.retry_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "readiness.retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.gateway.max_polls == Some(0) || self.acquisition.max_ready_polls == Some(0) {
            return Err(ConfigError::ValidationError(
                "Poll budgets must be at least 1 when set".to_string(),
            ));
        }

        if self.acquisition.timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "acquisition.timeout_ms must be non-zero when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Bus location as a transport address.
    pub fn channel_address(&self) -> ChannelAddress {
        ChannelAddress {
            sensor: self.bus.sensor_address,
            mux: self.bus.mux_address,
            port: self.bus.mux_port,
        }
    }

    /// Driver options derived from these settings.
    pub fn device_options(&self) -> DeviceOptions {
        let mut poll = PollPolicy::every(Duration::from_millis(self.gateway.poll_interval_ms));
        poll.max_polls = self.gateway.max_polls;

        DeviceOptions {
            debug: self.application.debug,
            poll,
            readiness: RetryPolicy {
                max_attempts: self.readiness.retry_attempts,
                backoff_delay: Duration::from_millis(self.readiness.retry_delay_ms),
            },
            acquisition: AcquisitionPolicy {
                conversion_latency: Duration::from_millis(self.acquisition.conversion_latency_ms),
                max_ready_polls: self.acquisition.max_ready_polls,
            },
        }
    }

    /// Whole-acquisition budget, if configured.
    pub fn acquisition_timeout(&self) -> Option<Duration> {
        self.acquisition.timeout_ms.map(Duration::from_millis)
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.channel_address(), ChannelAddress::default());
        assert_eq!(settings.readiness.retry_attempts, 10);
        assert_eq!(settings.readiness.retry_delay_ms, 500);
        assert_eq!(settings.acquisition.conversion_latency_ms, 1450);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [bus]
            mux_port = 5

            [gateway]
            max_polls = 1000
            "#,
        )
        .unwrap();
        assert_eq!(settings.bus.mux_port, 5);
        assert_eq!(settings.bus.sensor_address, 0x49);
        assert_eq!(settings.gateway.poll_interval_ms, 1);
        assert_eq!(settings.device_options().poll.max_polls, Some(1000));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "[bus]\nmux_port = 8",
            "[bus]\nsensor_address = 200",
            "[readiness]\nretry_attempts = 0",
            "[application]\nlog_level = \"loud\"",
            "[acquisition]\nmax_ready_polls = 0",
            "[acquisition]\ntimeout_ms = 0",
        ];
        for case in cases {
            let err = Settings::from_toml_str(case).unwrap_err();
            assert!(
                matches!(err, ConfigError::ValidationError(_)),
                "{} should fail validation, got {}",
                case,
                err
            );
        }
    }

    #[test]
    fn test_type_errors_are_load_errors() {
        let err = Settings::from_toml_str("[bus]\nmux_port = \"three\"").unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }

    #[test]
    fn test_device_options_conversion() {
        let settings = Settings::from_toml_str(
            r#"
            [application]
            debug = true

            [readiness]
            retry_attempts = 4
            retry_delay_ms = 25

            [acquisition]
            conversion_latency_ms = 800
            max_ready_polls = 50
            timeout_ms = 3000
            "#,
        )
        .unwrap();
        let options = settings.device_options();
        assert!(options.debug);
        assert_eq!(options.readiness.max_attempts, 4);
        assert_eq!(options.readiness.backoff_delay, Duration::from_millis(25));
        assert_eq!(options.acquisition.conversion_latency, Duration::from_millis(800));
        assert_eq!(options.acquisition.max_ready_polls, Some(50));
        assert_eq!(settings.acquisition_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_rendered_toml_round_trips() {
        let mut settings = Settings::default();
        settings.bus.mux_port = 6;
        let rendered = settings.to_toml().unwrap();
        assert_eq!(Settings::from_toml_str(&rendered).unwrap(), settings);
    }
}
