//! Latest-value snapshot shared between the samplers and the logger.
//!
//! Each field group lives in its own `tokio::sync::watch` channel. A publish replaces the
//! whole value in one step and a snapshot borrows whole values, so a multi-value group
//! (the environmental triple, the particulate pair) is never observed half-written.
//! Groups are independent of each other: a snapshot may combine a fresh wind speed with
//! a ten-second-old temperature, which is expected.
//!
//! Each group has exactly one writer task; any number of tasks may read.

use crate::acquisition::vane::Direction;
use crate::measurement_types::{EnvironmentalReading, ParticulateReading};
use tokio::sync::watch;

/// Latest value from every sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationSnapshot {
    /// Wind speed of the last completed window, km/h
    pub wind_speed_kmh: f64,
    /// Rainfall since process start, mm
    pub rainfall_mm: f64,
    /// Last decoded vane direction
    pub direction: Direction,
    /// Last environmental sample, if any succeeded yet
    pub environment: Option<EnvironmentalReading>,
    /// Last validated particulate reading, if any
    pub particulate: Option<ParticulateReading>,
}

impl Default for StationSnapshot {
    fn default() -> Self {
        Self {
            wind_speed_kmh: 0.0,
            rainfall_mm: 0.0,
            direction: Direction::NotAvailable,
            environment: None,
            particulate: None,
        }
    }
}

/// One atomic update to a single field group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldUpdate {
    /// Anemometer window result
    WindSpeed(f64),
    /// Rain gauge running total
    Rainfall(f64),
    /// Vane decode
    Direction(Direction),
    /// Temperature, pressure and humidity together
    Environment(EnvironmentalReading),
    /// PM10 and PM2.5 together
    Particulate(ParticulateReading),
}

/// Concurrently writable station snapshot.
#[derive(Debug)]
pub struct StateAggregator {
    wind_speed: watch::Sender<f64>,
    rainfall: watch::Sender<f64>,
    direction: watch::Sender<Direction>,
    environment: watch::Sender<Option<EnvironmentalReading>>,
    particulate: watch::Sender<Option<ParticulateReading>>,
}

impl Default for StateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StateAggregator {
    /// Aggregator holding [`StationSnapshot::default`] values.
    pub fn new() -> Self {
        let defaults = StationSnapshot::default();
        Self {
            wind_speed: watch::Sender::new(defaults.wind_speed_kmh),
            rainfall: watch::Sender::new(defaults.rainfall_mm),
            direction: watch::Sender::new(defaults.direction),
            environment: watch::Sender::new(defaults.environment),
            particulate: watch::Sender::new(defaults.particulate),
        }
    }

    /// Replace one field group.
    pub fn publish(&self, update: FieldUpdate) {
        match update {
            FieldUpdate::WindSpeed(speed) => {
                self.wind_speed.send_replace(speed);
            }
            FieldUpdate::Rainfall(total) => {
                self.rainfall.send_replace(total);
            }
            FieldUpdate::Direction(direction) => {
                self.direction.send_replace(direction);
            }
            FieldUpdate::Environment(reading) => {
                self.environment.send_replace(Some(reading));
            }
            FieldUpdate::Particulate(reading) => {
                self.particulate.send_replace(Some(reading));
            }
        }
    }

    /// Read every field group as of now.
    pub fn snapshot(&self) -> StationSnapshot {
        StationSnapshot {
            wind_speed_kmh: *self.wind_speed.borrow(),
            rainfall_mm: *self.rainfall.borrow(),
            direction: *self.direction.borrow(),
            environment: *self.environment.borrow(),
            particulate: *self.particulate.borrow(),
        }
    }

    /// Change notifications for the environmental group.
    pub fn watch_environment(&self) -> watch::Receiver<Option<EnvironmentalReading>> {
        self.environment.subscribe()
    }
}
