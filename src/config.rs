//! Station configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/station.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `WEATHER_DAQ_`, nested with `__`
//!
//! Every section has defaults matching the reference station wiring, so an empty or
//! missing file still yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use weather_daq::config::StationConfig;
//!
//! let config = StationConfig::load()?;
//! config.validate()?;
//! println!("Station: {}", config.application.name);
//! # Ok::<(), weather_daq::error::StationError>(())
//! ```
//!
//! Override a single value from the environment:
//! ```bash
//! WEATHER_DAQ_PARTICULATE__PORT=/dev/ttyAMA0 weather-daq run
//! ```

use crate::error::{AppResult, StationError};
use crate::hardware::capabilities::EdgeKind;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/station.toml";

/// Top-level station configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Hall-effect anemometer
    pub anemometer: AnemometerConfig,
    /// Tipping-bucket rain gauge
    pub rain_gauge: RainGaugeConfig,
    /// Four-switch wind vane
    pub wind_vane: WindVaneConfig,
    /// BME280 temperature/pressure/humidity sensor
    pub environment: EnvironmentConfig,
    /// SDS018 particulate sensor
    pub particulate: ParticulateConfig,
    /// Log file locations and cadence
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Station name, used in log output only
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
    /// How long shutdown waits for tasks before aborting them
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Weather Station".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Anemometer wiring and geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnemometerConfig {
    /// BCM pin of the hall sensor
    pub pin: u8,
    /// Cup radius in centimetres
    pub radius_cm: f64,
    /// Hall pulses per full revolution
    pub pulses_per_revolution: u32,
    /// Counting window
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Edge that counts as a pulse
    pub edge: EdgeKind,
    /// Debounce passed to the edge capability (zero disables it)
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for AnemometerConfig {
    fn default() -> Self {
        Self {
            pin: 13,
            radius_cm: 1.7,
            pulses_per_revolution: 1,
            window: Duration::from_secs(1),
            edge: EdgeKind::Falling,
            debounce: Duration::ZERO,
        }
    }
}

impl AnemometerConfig {
    /// Cup circumference in centimetres
    pub fn circumference_cm(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.radius_cm
    }
}

/// Rain gauge wiring and bucket volume
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RainGaugeConfig {
    /// BCM pin of the reed switch
    pub pin: u8,
    /// Rainfall represented by one bucket tip
    pub mm_per_tip: f64,
    /// Edge that counts as a tip
    pub edge: EdgeKind,
    /// Debounce passed to the edge capability (zero disables it)
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
    /// How often the running total is republished
    #[serde(with = "humantime_serde")]
    pub publish_interval: Duration,
}

impl Default for RainGaugeConfig {
    fn default() -> Self {
        Self {
            pin: 5,
            mm_per_tip: 0.2794,
            edge: EdgeKind::Both,
            debounce: Duration::from_millis(300),
            publish_interval: Duration::from_secs(1),
        }
    }
}

/// Wind vane wiring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindVaneConfig {
    /// BCM pins of the four direction switches, in code bit order
    pub pins: Vec<u8>,
    /// Poll period
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for WindVaneConfig {
    fn default() -> Self {
        Self {
            pins: vec![27, 23, 17, 22],
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Environmental sensor bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// I2C bus number
    pub bus: u8,
    /// 7-bit device address
    pub address: u8,
    /// Poll period
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            bus: 1,
            address: 0x76,
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Particulate sensor serial settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticulateConfig {
    /// Whether the particulate task is started at all
    pub enabled: bool,
    /// Serial device path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-attempt deadline for assembling one valid frame
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Discard buffered bytes before each attempt
    pub flush_before_read: bool,
    /// Pause after a successful read
    #[serde(with = "humantime_serde")]
    pub read_interval: Duration,
}

impl Default for ParticulateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_secs(1),
            flush_before_read: true,
            read_interval: Duration::from_secs(1),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Station snapshot log
    pub station_log: PathBuf,
    /// Particulate reading log
    pub particulate_log: PathBuf,
    /// Snapshot logging period
    #[serde(with = "humantime_serde")]
    pub log_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            station_log: PathBuf::from("weather_data.csv"),
            particulate_log: PathBuf::from("sensor_readings.csv"),
            log_interval: Duration::from_secs(1),
        }
    }
}

impl StationConfig {
    /// Load configuration from `config/station.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment overrides apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(path).extract().map_err(StationError::from)
    }

    /// Parse configuration from a TOML string on top of the defaults
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Figment::from(Serialized::defaults(StationConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(StationError::from)
    }

    fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(StationConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("WEATHER_DAQ_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(StationError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(StationError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if !(self.anemometer.radius_cm.is_finite() && self.anemometer.radius_cm > 0.0) {
            return Err(StationError::Configuration(
                "anemometer.radius_cm must be positive and finite".to_string(),
            ));
        }
        if self.anemometer.pulses_per_revolution == 0 {
            return Err(StationError::Configuration(
                "anemometer.pulses_per_revolution must be at least 1".to_string(),
            ));
        }
        if !(self.rain_gauge.mm_per_tip.is_finite() && self.rain_gauge.mm_per_tip > 0.0) {
            return Err(StationError::Configuration(
                "rain_gauge.mm_per_tip must be positive and finite".to_string(),
            ));
        }

        if self.wind_vane.pins.len() != 4 {
            return Err(StationError::Configuration(format!(
                "wind_vane.pins must list exactly 4 pins, got {}",
                self.wind_vane.pins.len()
            )));
        }

        let periods = [
            ("anemometer.window", self.anemometer.window),
            ("rain_gauge.publish_interval", self.rain_gauge.publish_interval),
            ("wind_vane.poll_interval", self.wind_vane.poll_interval),
            ("environment.poll_interval", self.environment.poll_interval),
            ("particulate.read_timeout", self.particulate.read_timeout),
            ("storage.log_interval", self.storage.log_interval),
            ("application.shutdown_timeout", self.application.shutdown_timeout),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(StationError::Configuration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self.particulate.baud_rate == 0 {
            return Err(StationError::Configuration(
                "particulate.baud_rate must be greater than zero".to_string(),
            ));
        }

        let mut pins = HashSet::new();
        let all_pins = [self.anemometer.pin, self.rain_gauge.pin]
            .into_iter()
            .chain(self.wind_vane.pins.iter().copied());
        for pin in all_pins {
            if !pins.insert(pin) {
                return Err(StationError::Configuration(format!(
                    "GPIO pin {pin} is assigned to more than one sensor"
                )));
            }
        }

        if self.storage.station_log == self.storage.particulate_log {
            return Err(StationError::Configuration(
                "storage.station_log and storage.particulate_log must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Vane pins as a fixed array, once validated
    pub fn vane_pins(&self) -> AppResult<[u8; 4]> {
        self.wind_vane.pins.as_slice().try_into().map_err(|_| {
            StationError::Configuration("wind_vane.pins must list exactly 4 pins".to_string())
        })
    }
}
