//! End-to-end acquisition runs against mock hardware and real CSV files.
//!
//! Time is paused, so windows and logging periods are exact.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use weather_daq::acquisition::particulate::encode_frame;
use weather_daq::acquisition::{
    AcquisitionScheduler, Direction, StationHardware, StationSinks, TaskKind, TaskOutcome,
};
use weather_daq::config::StationConfig;
use weather_daq::data::history::HistoricalSource;
use weather_daq::data::storage::CsvSink;
use weather_daq::data::{LogRecord, ParticulateRecord};
use weather_daq::error::StationError;
use weather_daq::hardware::mock::{
    DuplexConnector, FailingConnector, MockEnvironmentalSensor, MockGpio,
};
use weather_daq::hardware::capabilities::SerialConnector;
use weather_daq::measurement_types::EnvironmentalReading;

fn config_in(dir: &std::path::Path) -> StationConfig {
    let mut config = StationConfig::default();
    config.storage.station_log = dir.join("weather_data.csv");
    config.storage.particulate_log = dir.join("sensor_readings.csv");
    config.particulate.flush_before_read = false;
    config
}

fn csv_sinks(config: &StationConfig) -> StationSinks {
    StationSinks {
        station: Box::new(CsvSink::<LogRecord>::open(&config.storage.station_log).unwrap()),
        particulate: Box::new(
            CsvSink::<ParticulateRecord>::open(&config.storage.particulate_log).unwrap(),
        ),
    }
}

fn hardware(gpio: &MockGpio, serial: Box<dyn SerialConnector>) -> StationHardware {
    StationHardware {
        gpio: Arc::new(gpio.clone()),
        environment: Box::new(MockEnvironmentalSensor::new(EnvironmentalReading::new(
            21.0, 1011.0, 55.0,
        ))),
        serial: Some(serial),
    }
}

#[tokio::test(start_paused = true)]
async fn test_logger_continues_after_serial_open_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let gpio = MockGpio::new();

    let station = AcquisitionScheduler::new(
        config.clone(),
        hardware(&gpio, Box::new(FailingConnector::new("/dev/ttyUSB0"))),
        csv_sinks(&config),
    )
    .start()
    .unwrap();

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert_eq!(station.task_finished(TaskKind::Particulate), Some(true));
    assert_eq!(station.task_finished(TaskKind::Logger), Some(false));

    let report = station.shutdown().await;
    assert!(matches!(
        report.outcome(TaskKind::Particulate),
        Some(TaskOutcome::Failed(StationError::SerialOpen { .. }))
    ));
    for kind in [
        TaskKind::Anemometer,
        TaskKind::RainGauge,
        TaskKind::WindVane,
        TaskKind::Environment,
        TaskKind::Logger,
    ] {
        assert!(report.outcome(kind).unwrap().is_completed(), "{kind} did not complete");
    }

    let history = HistoricalSource::load(&config.storage.station_log).unwrap();
    assert_eq!(history.len(), 10);
    assert_eq!(history.skipped(), 0);
    let latest = history.latest().unwrap();
    assert_eq!(latest.temperature_c, Some(21.0));
    assert_eq!(latest.pressure_hpa, Some(1011.0));
    assert_eq!(latest.pm10, None);
    assert_eq!(latest.pm25, None);
    // Undriven vane lines read low, which is not a vane position
    assert_eq!(latest.direction, Direction::Invalid);

    let particulate = std::fs::read_to_string(&config.storage.particulate_log).unwrap();
    assert!(particulate.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wind_rain_and_particulate_reach_the_logs() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let gpio = MockGpio::new();
    let (connector, mut sensor) = DuplexConnector::pair(256);

    let station = AcquisitionScheduler::new(
        config.clone(),
        hardware(&gpio, Box::new(connector)),
        csv_sinks(&config),
    )
    .start()
    .unwrap();
    let state = station.state();

    tokio::time::sleep(Duration::from_millis(500)).await;
    gpio.emit_edges(config.anemometer.pin, 10);
    gpio.emit_edges(config.rain_gauge.pin, 4);
    sensor.write_all(&encode_frame(123, 456, [0, 0])).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    let snapshot = state.snapshot();
    // 10 revolutions of a 2π·1.7 cm cup in exactly one second
    let expected_kmh = 10.0 * config.anemometer.circumference_cm() / 100_000.0 * 3600.0;
    assert!((snapshot.wind_speed_kmh - expected_kmh).abs() < 1e-9);
    assert!((snapshot.rainfall_mm - 4.0 * 0.2794).abs() < 1e-12);

    // Edges on the anemometer pin never move the rain total
    gpio.emit_edges(config.anemometer.pin, 50);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!((state.snapshot().rainfall_mm - 4.0 * 0.2794).abs() < 1e-12);

    let report = station.shutdown().await;
    assert!(report.is_clean(), "{report:?}");

    let history = HistoricalSource::load(&config.storage.station_log).unwrap();
    assert_eq!(history.len(), 3);
    let latest = history.latest().unwrap();
    assert_eq!(latest.pm10, Some(45.6));
    assert_eq!(latest.pm25, Some(12.3));

    let mut reader = csv::Reader::from_path(&config.storage.particulate_log).unwrap();
    let rows: Vec<ParticulateRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].pm10, 45.6);
    assert_eq!(rows[0].pm25, 12.3);
}

#[tokio::test(start_paused = true)]
async fn test_restart_appends_to_existing_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    for _ in 0..2 {
        let mut config = config.clone();
        config.particulate.enabled = false;
        let station = AcquisitionScheduler::new(
            config.clone(),
            hardware(&MockGpio::new(), Box::new(FailingConnector::new("unused"))),
            csv_sinks(&config),
        )
        .start()
        .unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(station.shutdown().await.is_clean());
    }

    let text = std::fs::read_to_string(&config.storage.station_log).unwrap();
    assert_eq!(text.matches("Timestamp").count(), 1);
    assert_eq!(HistoricalSource::load(&config.storage.station_log).unwrap().len(), 4);
}
