//! Flat record layouts for the two log files.

use crate::acquisition::state::StationSnapshot;
use crate::acquisition::vane::Direction;
use crate::measurement_types::ParticulateReading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the station log: a snapshot flattened at capture time.
///
/// Fields that have no value yet (sensor unavailable or not sampled) are empty cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Capture time
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Wind speed, km/h
    #[serde(rename = "Wind Speed (km/h)")]
    pub wind_speed_kmh: f64,
    /// Rainfall since start, mm
    #[serde(rename = "Rainfall (mm)")]
    pub rainfall_mm: f64,
    /// Vane direction
    #[serde(rename = "Wind Direction")]
    pub direction: Direction,
    /// Temperature, °C
    #[serde(rename = "Temp (C)")]
    pub temperature_c: Option<f64>,
    /// Pressure, hPa
    #[serde(rename = "Pressure (hPa)")]
    pub pressure_hpa: Option<f64>,
    /// Relative humidity, %
    #[serde(rename = "Humidity (%)")]
    pub humidity_pct: Option<f64>,
    /// PM10, µg/m³
    #[serde(rename = "PM10 (ug/m3)")]
    pub pm10: Option<f64>,
    /// PM2.5, µg/m³
    #[serde(rename = "PM2.5 (ug/m3)")]
    pub pm25: Option<f64>,
}

impl LogRecord {
    /// Flatten `snapshot` with capture time `timestamp`.
    pub fn from_snapshot(snapshot: &StationSnapshot, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            wind_speed_kmh: snapshot.wind_speed_kmh,
            rainfall_mm: snapshot.rainfall_mm,
            direction: snapshot.direction,
            temperature_c: snapshot.environment.map(|e| e.temperature_c),
            pressure_hpa: snapshot.environment.map(|e| e.pressure_hpa),
            humidity_pct: snapshot.environment.map(|e| e.humidity_pct),
            pm10: snapshot.particulate.map(|p| p.pm10()),
            pm25: snapshot.particulate.map(|p| p.pm25()),
        }
    }
}

/// One row of the particulate log, written when a frame validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticulateRecord {
    /// Validation time
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    /// PM10, µg/m³
    #[serde(rename = "PM10 (ug/m3)")]
    pub pm10: f64,
    /// PM2.5, µg/m³
    #[serde(rename = "PM2.5 (ug/m3)")]
    pub pm25: f64,
}

impl From<&ParticulateReading> for ParticulateRecord {
    fn from(reading: &ParticulateReading) -> Self {
        Self {
            timestamp: reading.timestamp(),
            pm10: reading.pm10(),
            pm25: reading.pm25(),
        }
    }
}
