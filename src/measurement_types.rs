//! Measurement data types shared between the samplers, the aggregator and the log sinks.
//!
//! Values here are plain data. Each one is produced whole by exactly one sampler and is
//! published as a unit, so a reader never sees temperature from one sample next to
//! humidity from another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One calibrated sample from the temperature/pressure/humidity sensor.
///
/// All three fields always come from the same underlying bus transaction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalReading {
    /// Air temperature in °C
    pub temperature_c: f64,
    /// Barometric pressure in hPa
    pub pressure_hpa: f64,
    /// Relative humidity in %RH
    pub humidity_pct: f64,
}

impl EnvironmentalReading {
    /// Bundle a temperature/pressure/humidity triple.
    pub fn new(temperature_c: f64, pressure_hpa: f64, humidity_pct: f64) -> Self {
        Self {
            temperature_c,
            pressure_hpa,
            humidity_pct,
        }
    }
}

/// A decoded particulate reading.
///
/// Only the frame reader can build one, and only after the frame checksum matched.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticulateReading {
    timestamp: DateTime<Utc>,
    pm10: f64,
    pm25: f64,
}

impl ParticulateReading {
    pub(crate) fn from_validated(timestamp: DateTime<Utc>, pm10: f64, pm25: f64) -> Self {
        Self {
            timestamp,
            pm10,
            pm25,
        }
    }

    /// Time the frame was validated
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// PM10 concentration in µg/m³
    pub fn pm10(&self) -> f64 {
        self.pm10
    }

    /// PM2.5 concentration in µg/m³
    pub fn pm25(&self) -> f64 {
        self.pm25
    }

    /// Whether both concentrations are strictly positive.
    ///
    /// Readings failing this check are kept out of the particulate log.
    pub fn is_plausible(&self) -> bool {
        self.pm10 > 0.0 && self.pm25 > 0.0
    }
}
