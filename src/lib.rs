//! # Weather Station Acquisition Library
//!
//! `weather_daq` reads a small weather station attached to a single-board computer and
//! keeps a CSV log of what it measures:
//!
//! - wind speed from a hall-effect anemometer (edge counting over timed windows)
//! - rainfall from a tipping-bucket gauge
//! - wind direction from a four-switch reed vane
//! - temperature, pressure and humidity from a BME280
//! - PM2.5 and PM10 from an SDS018 on a serial port
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: the samplers, the SDS018 frame reader, the shared snapshot and
//!   the scheduler that runs them as tokio tasks.
//! - **`config`**: figment-based configuration (`config/station.toml` plus
//!   `WEATHER_DAQ_*` environment overrides).
//! - **`data`**: log record layouts, the append-only CSV sink and the history reader.
//! - **`error`**: `StationError` and the particulate `FrameError`.
//! - **`hardware`**: capability traits plus serial, mock, simulated and Raspberry Pi
//!   backends.
//! - **`measurement_types`**: measurement values shared across modules.
//! - **`tracing_setup`**: `tracing-subscriber` initialization.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod measurement_types;
pub mod tracing_setup;
