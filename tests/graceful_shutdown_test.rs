//! Integration tests for graceful shutdown behavior.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use weather_daq::acquisition::{
    AcquisitionScheduler, StationHardware, StationSinks, TaskKind, TaskOutcome,
};
use weather_daq::config::StationConfig;
use weather_daq::data::{LogRecord, MemorySink, RecordSink};
use weather_daq::error::{AppResult, StationError};
use weather_daq::hardware::mock::{DuplexConnector, MockEnvironmentalSensor, MockGpio};

/// Sink whose writes never complete.
struct StuckSink;

#[async_trait]
impl RecordSink<LogRecord> for StuckSink {
    async fn append(&mut self, _record: &LogRecord) -> AppResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

fn station_parts(
    station_sink: Box<dyn RecordSink<LogRecord>>,
) -> (StationHardware, StationSinks, MockGpio, tokio::io::DuplexStream) {
    let gpio = MockGpio::new();
    let (connector, host) = DuplexConnector::pair(256);
    let hardware = StationHardware {
        gpio: Arc::new(gpio.clone()),
        environment: Box::new(MockEnvironmentalSensor::default()),
        serial: Some(Box::new(connector)),
    };
    let sinks = StationSinks {
        station: station_sink,
        particulate: Box::new(MemorySink::new()),
    };
    (hardware, sinks, gpio, host)
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_serial_port_and_pins() {
    let config = StationConfig::default();
    let (hardware, sinks, gpio, mut host) =
        station_parts(Box::new(MemorySink::<LogRecord>::new()));

    let station = AcquisitionScheduler::new(config.clone(), hardware, sinks)
        .start()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gpio.subscriber_count(config.anemometer.pin), 1);

    let report = station.shutdown().await;
    assert!(report.is_clean(), "{report:?}");

    // The reader's end of the pipe is gone
    let err = host.write_all(&[0xAA]).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    assert_eq!(gpio.subscriber_count(config.anemometer.pin), 0);
    assert_eq!(gpio.subscriber_count(config.rain_gauge.pin), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_immediately_after_start() {
    let config = StationConfig::default();
    let (hardware, sinks, _gpio, _host) =
        station_parts(Box::new(MemorySink::<LogRecord>::new()));

    let station = AcquisitionScheduler::new(config, hardware, sinks)
        .start()
        .unwrap();
    let report = station.shutdown().await;
    assert_eq!(report.outcomes.len(), 6);
    assert!(report.into_result().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_stuck_task_is_aborted_after_timeout() {
    let mut config = StationConfig::default();
    config.application.shutdown_timeout = Duration::from_millis(200);
    let (hardware, sinks, _gpio, _host) = station_parts(Box::new(StuckSink));

    let station = AcquisitionScheduler::new(config, hardware, sinks)
        .start()
        .unwrap();
    // Let the logger reach its first (never-ending) append
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let started = tokio::time::Instant::now();
    let report = station.shutdown().await;
    assert_eq!(started.elapsed(), Duration::from_millis(200));
    assert!(matches!(
        report.outcome(TaskKind::Logger),
        Some(TaskOutcome::Aborted)
    ));
    assert!(report.outcome(TaskKind::Particulate).unwrap().is_completed());
    assert!(!report.is_clean());
    assert!(matches!(
        report.into_result(),
        Err(StationError::ShutdownFailed(errors))
            if matches!(errors.as_slice(), [StationError::TaskAborted(task)] if task == "logger")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_run_until_stops_on_signal() {
    let config = StationConfig::default();
    let memory = MemorySink::<LogRecord>::new();
    let (hardware, sinks, _gpio, _host) = station_parts(Box::new(memory.clone()));

    let station = AcquisitionScheduler::new(config, hardware, sinks)
        .start()
        .unwrap();
    let report = station
        .run_until(tokio::time::sleep(Duration::from_millis(3_500)))
        .await;

    assert!(report.is_clean());
    assert_eq!(memory.len(), 3);
}
