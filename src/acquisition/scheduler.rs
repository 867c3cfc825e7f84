//! Acquisition scheduler: one supervised task per sampler plus the logger.
//!
//! Startup:
//! 1. Snapshot defaults are in place (wind 0, rain 0, direction N/A, environment and
//!    particulate unavailable)
//! 2. Anemometer, rain gauge, wind vane, environment, particulate and logger tasks are
//!    spawned, each inside a supervisor wrapper that logs how it ended
//!
//! A task that fails is logged by its supervisor and stays down; its siblings keep
//! running. The particulate task failing to open its port is the usual example.
//!
//! Shutdown sequence ([`RunningStation::shutdown`]):
//! 1. Flip the shared `watch<bool>` shutdown flag
//! 2. Wait for every task until `application.shutdown_timeout`
//! 3. Abort whatever is still running
//!
//! Dropping or aborting a task drops the hardware handles it owns (edge subscriptions,
//! the serial port), so every exit path releases them.

use crate::acquisition::environment::EnvironmentalPoller;
use crate::acquisition::particulate::ParticulateSampler;
use crate::acquisition::pulse::{AnemometerGeometry, PulseCounter, PulseWindowCounter, RainAccumulator};
use crate::acquisition::shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
use crate::acquisition::state::{FieldUpdate, StateAggregator};
use crate::acquisition::vane;
use crate::config::{AnemometerConfig, RainGaugeConfig, StationConfig};
use crate::data::{LogRecord, ParticulateRecord, RecordSink};
use crate::error::{AppResult, StationError};
use crate::hardware::capabilities::{EnvironmentalSensor, GpioCapability, SerialConnector};
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// The six acquisition tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Hall-effect wind speed
    Anemometer,
    /// Tipping-bucket rainfall
    RainGauge,
    /// Reed-switch wind direction
    WindVane,
    /// BME280 temperature/pressure/humidity
    Environment,
    /// SDS018 serial reader
    Particulate,
    /// Periodic snapshot logger
    Logger,
}

impl TaskKind {
    /// Short name used in log fields
    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Anemometer => "anemometer",
            TaskKind::RainGauge => "rain_gauge",
            TaskKind::WindVane => "wind_vane",
            TaskKind::Environment => "environment",
            TaskKind::Particulate => "particulate",
            TaskKind::Logger => "logger",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hardware handles, built once at startup and moved into their tasks.
pub struct StationHardware {
    /// GPIO header shared by the pulse and vane samplers
    pub gpio: Arc<dyn GpioCapability>,
    /// Environmental sensor, owned by the environment task
    pub environment: Box<dyn EnvironmentalSensor>,
    /// Particulate sensor port; `None` leaves the particulate task out
    pub serial: Option<Box<dyn SerialConnector>>,
}

/// Persistence sinks, one per log file.
pub struct StationSinks {
    /// Snapshot rows written by the logger
    pub station: Box<dyn RecordSink<LogRecord>>,
    /// Particulate rows written at validation time
    pub particulate: Box<dyn RecordSink<ParticulateRecord>>,
}

/// How one task ended.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Returned normally after shutdown was requested
    Completed,
    /// Returned an error or panicked
    Failed(StationError),
    /// Did not stop within the shutdown timeout and was aborted
    Aborted,
}

impl TaskOutcome {
    /// Whether the task ended without error
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Per-task outcomes collected by [`RunningStation::shutdown`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Outcomes in spawn order
    pub outcomes: Vec<(TaskKind, TaskOutcome)>,
}

impl ShutdownReport {
    /// Outcome of `kind`, if that task was started
    pub fn outcome(&self, kind: TaskKind) -> Option<&TaskOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| outcome)
    }

    /// Whether every task completed
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_completed())
    }

    /// Collapse into a single result.
    ///
    /// # Errors
    ///
    /// [`StationError::ShutdownFailed`] with every task error, aborted tasks included.
    pub fn into_result(self) -> AppResult<()> {
        let errors: Vec<StationError> = self
            .outcomes
            .into_iter()
            .filter_map(|(kind, outcome)| match outcome {
                TaskOutcome::Completed => None,
                TaskOutcome::Failed(e) => Some(e),
                TaskOutcome::Aborted => Some(StationError::TaskAborted(kind.to_string())),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StationError::ShutdownFailed(errors))
        }
    }
}

/// Builds and starts the station.
pub struct AcquisitionScheduler {
    config: StationConfig,
    hardware: StationHardware,
    sinks: StationSinks,
    state: Arc<StateAggregator>,
}

impl AcquisitionScheduler {
    /// Scheduler over `hardware`, persisting into `sinks`.
    pub fn new(config: StationConfig, hardware: StationHardware, sinks: StationSinks) -> Self {
        Self {
            config,
            hardware,
            sinks,
            state: Arc::new(StateAggregator::new()),
        }
    }

    /// Snapshot shared with the tasks
    pub fn state(&self) -> Arc<StateAggregator> {
        self.state.clone()
    }

    /// Spawn every task on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails only on invalid configuration; hardware problems surface as task outcomes.
    pub fn start(self) -> AppResult<RunningStation> {
        self.config.validate()?;
        let vane_pins = self.config.vane_pins()?;

        let Self {
            config,
            hardware,
            sinks,
            state,
        } = self;
        let (trigger, signal) = shutdown_channel();
        let mut tasks = Vec::with_capacity(6);

        tasks.push(spawn_supervised(
            TaskKind::Anemometer,
            run_anemometer(
                hardware.gpio.clone(),
                config.anemometer.clone(),
                state.clone(),
                signal.clone(),
            ),
        ));

        tasks.push(spawn_supervised(
            TaskKind::RainGauge,
            run_rain_gauge(
                hardware.gpio.clone(),
                config.rain_gauge.clone(),
                state.clone(),
                signal.clone(),
            ),
        ));

        tasks.push(spawn_supervised(
            TaskKind::WindVane,
            run_wind_vane(
                hardware.gpio.clone(),
                vane_pins,
                config.wind_vane.poll_interval,
                state.clone(),
                signal.clone(),
            ),
        ));

        let poller = EnvironmentalPoller::new(
            hardware.environment,
            state.clone(),
            config.environment.poll_interval,
        );
        tasks.push(spawn_supervised(
            TaskKind::Environment,
            poller.run(signal.clone()),
        ));

        match (config.particulate.enabled, hardware.serial) {
            (true, Some(connector)) => {
                let sampler = ParticulateSampler::new(
                    &config.particulate,
                    state.clone(),
                    sinks.particulate,
                );
                let particulate_signal = signal.clone();
                tasks.push(spawn_supervised(TaskKind::Particulate, async move {
                    let stats = sampler.run(connector.as_ref(), particulate_signal).await?;
                    debug!(frames = stats.frames, "particulate reader finished");
                    Ok(())
                }));
            }
            (true, None) => warn!("no serial connector available, particulate task not started"),
            (false, _) => info!("particulate sensor disabled"),
        }

        tasks.push(spawn_supervised(
            TaskKind::Logger,
            run_logger(
                state.clone(),
                sinks.station,
                config.storage.log_interval,
                signal,
            ),
        ));

        info!(
            station = %config.application.name,
            tasks = tasks.len(),
            "acquisition started"
        );

        Ok(RunningStation {
            state,
            trigger,
            tasks,
            shutdown_timeout: config.application.shutdown_timeout,
        })
    }
}

/// Handle on a started station.
pub struct RunningStation {
    state: Arc<StateAggregator>,
    trigger: ShutdownTrigger,
    tasks: Vec<(TaskKind, JoinHandle<AppResult<()>>)>,
    shutdown_timeout: Duration,
}

impl RunningStation {
    /// Snapshot shared with the tasks
    pub fn state(&self) -> Arc<StateAggregator> {
        self.state.clone()
    }

    /// Tasks that were started, in spawn order
    pub fn tasks(&self) -> Vec<TaskKind> {
        self.tasks.iter().map(|(kind, _)| *kind).collect()
    }

    /// Whether `kind` has already ended (`None` if it was never started)
    pub fn task_finished(&self, kind: TaskKind) -> Option<bool> {
        self.tasks
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, handle)| handle.is_finished())
    }

    /// Stop every task and report how each one ended.
    pub async fn shutdown(self) -> ShutdownReport {
        info!("shutting down acquisition");
        self.trigger.trigger();

        let deadline = Instant::now() + self.shutdown_timeout;
        let mut report = ShutdownReport::default();

        for (kind, mut handle) in self.tasks {
            let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => TaskOutcome::Completed,
                Ok(Ok(Err(e))) => TaskOutcome::Failed(e),
                Ok(Err(join_error)) if join_error.is_panic() => {
                    TaskOutcome::Failed(StationError::TaskPanicked(kind.name().to_string()))
                }
                Ok(Err(_)) => TaskOutcome::Aborted,
                Err(_) => {
                    warn!(task = kind.name(), timeout = ?self.shutdown_timeout, "task did not stop in time, aborting");
                    handle.abort();
                    TaskOutcome::Aborted
                }
            };
            report.outcomes.push((kind, outcome));
        }

        info!(clean = report.is_clean(), "acquisition stopped");
        report
    }

    /// Run until `signal` resolves, then shut down.
    pub async fn run_until<F: Future<Output = ()>>(self, signal: F) -> ShutdownReport {
        signal.await;
        info!("shutdown requested");
        self.shutdown().await
    }
}

fn spawn_supervised<F>(kind: TaskKind, task: F) -> (TaskKind, JoinHandle<AppResult<()>>)
where
    F: Future<Output = AppResult<()>> + Send + 'static,
{
    let span = info_span!("task", task = kind.name());
    let handle = tokio::spawn(
        async move {
            debug!("task started");
            let result = task.await;
            match &result {
                Ok(()) => debug!("task stopped"),
                Err(e) => error!(
                    error = %e,
                    resource_fatal = e.is_resource_fatal(),
                    "task failed, other tasks keep running"
                ),
            }
            result
        }
        .instrument(span),
    );
    (kind, handle)
}

fn debounce(configured: Duration) -> Option<Duration> {
    (!configured.is_zero()).then_some(configured)
}

async fn run_anemometer(
    gpio: Arc<dyn GpioCapability>,
    config: AnemometerConfig,
    state: Arc<StateAggregator>,
    mut shutdown: ShutdownSignal,
) -> AppResult<()> {
    let counter = PulseCounter::new();
    let _subscription = gpio.subscribe(
        config.pin,
        config.edge,
        debounce(config.debounce),
        counter.callback(),
    )?;
    let mut windows = PulseWindowCounter::new(counter);
    let geometry = AnemometerGeometry {
        circumference_cm: config.circumference_cm(),
        pulses_per_revolution: config.pulses_per_revolution,
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            window = windows.count_window(config.window) => {
                let speed = geometry.speed_for(window);
                state.publish(FieldUpdate::WindSpeed(speed));
                debug!(edges = window.edges, elapsed = ?window.elapsed, speed_kmh = speed, "wind window");
            }
        }
    }

    Ok(())
}

async fn run_rain_gauge(
    gpio: Arc<dyn GpioCapability>,
    config: RainGaugeConfig,
    state: Arc<StateAggregator>,
    mut shutdown: ShutdownSignal,
) -> AppResult<()> {
    let rain = RainAccumulator::new(config.mm_per_tip);
    let _subscription = gpio.subscribe(
        config.pin,
        config.edge,
        debounce(config.debounce),
        rain.callback(),
    )?;

    let mut ticker = tokio::time::interval(config.publish_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut published_tips = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let tips = rain.tips();
                state.publish(FieldUpdate::Rainfall(rain.total_mm()));
                if tips != published_tips {
                    debug!(tips, total_mm = rain.total_mm(), "rain");
                    published_tips = tips;
                }
            }
        }
    }

    Ok(())
}

async fn run_wind_vane(
    gpio: Arc<dyn GpioCapability>,
    pins: [u8; 4],
    period: Duration,
    state: Arc<StateAggregator>,
    mut shutdown: ShutdownSignal,
) -> AppResult<()> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match vane::read_code(gpio.as_ref(), pins) {
                    Ok(code) => {
                        let direction = vane::decode(code);
                        state.publish(FieldUpdate::Direction(direction));
                        debug!(%code, %direction, "wind vane");
                    }
                    Err(e) => warn!(error = %e, "wind vane read failed, keeping last direction"),
                }
            }
        }
    }

    Ok(())
}

async fn run_logger(
    state: Arc<StateAggregator>,
    mut sink: Box<dyn RecordSink<LogRecord>>,
    period: Duration,
    mut shutdown: ShutdownSignal,
) -> AppResult<()> {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let record = LogRecord::from_snapshot(&state.snapshot(), Utc::now());
                if let Err(e) = sink.append(&record).await {
                    error!(error = %e, "failed to write station record");
                }
            }
        }
    }

    sink.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::particulate::encode_frame;
    use crate::acquisition::vane::Direction;
    use crate::data::MemorySink;
    use crate::hardware::mock::{DuplexConnector, FailingConnector, MockEnvironmentalSensor, MockGpio};
    use crate::measurement_types::EnvironmentalReading;
    use tokio::io::AsyncWriteExt;

    fn test_config() -> StationConfig {
        let mut config = StationConfig::default();
        config.particulate.flush_before_read = false;
        config
    }

    fn sinks() -> (StationSinks, MemorySink<LogRecord>, MemorySink<ParticulateRecord>) {
        let station = MemorySink::new();
        let particulate = MemorySink::new();
        (
            StationSinks {
                station: Box::new(station.clone()),
                particulate: Box::new(particulate.clone()),
            },
            station,
            particulate,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_defaults_before_first_samples() {
        let gpio = MockGpio::new();
        let (sinks, _, _) = sinks();
        let hardware = StationHardware {
            gpio: Arc::new(gpio),
            environment: Box::new(MockEnvironmentalSensor::default()),
            serial: None,
        };
        let scheduler = AcquisitionScheduler::new(test_config(), hardware, sinks);
        let snapshot = scheduler.state().snapshot();
        assert_eq!(snapshot.wind_speed_kmh, 0.0);
        assert_eq!(snapshot.rainfall_mm, 0.0);
        assert_eq!(snapshot.direction, Direction::NotAvailable);
        assert!(snapshot.environment.is_none());
        assert!(snapshot.particulate.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_samplers_publish_and_logger_writes() {
        let gpio = MockGpio::new();
        // North: first switch active (low), others driven high
        for (pin, level) in [(27, false), (23, true), (17, true), (22, true)] {
            gpio.set_level(pin, level);
        }
        let (connector, mut host) = DuplexConnector::pair(256);
        let (sinks, station_log, particulate_log) = sinks();
        let hardware = StationHardware {
            gpio: Arc::new(gpio.clone()),
            environment: Box::new(MockEnvironmentalSensor::new(EnvironmentalReading::new(
                12.5, 1002.0, 80.0,
            ))),
            serial: Some(Box::new(connector)),
        };

        let station = AcquisitionScheduler::new(test_config(), hardware, sinks)
            .start()
            .unwrap();
        let state = station.state();

        tokio::time::sleep(Duration::from_millis(10)).await;
        gpio.emit_edges(5, 3);
        host.write_all(&encode_frame(123, 456, [0, 0])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let snapshot = state.snapshot();
        assert_eq!(snapshot.direction, Direction::North);
        assert!((snapshot.rainfall_mm - 3.0 * 0.2794).abs() < 1e-9);
        assert_eq!(
            snapshot.environment,
            Some(EnvironmentalReading::new(12.5, 1002.0, 80.0))
        );
        let particulate = snapshot.particulate.unwrap();
        assert!((particulate.pm10() - 45.6).abs() < 1e-9);

        let report = station.shutdown().await;
        assert!(report.is_clean(), "{report:?}");
        assert!(!station_log.is_empty());
        assert_eq!(particulate_log.len(), 1);
        // Pulse subscriptions were released on exit
        assert_eq!(gpio.subscriber_count(13), 0);
        assert_eq!(gpio.subscriber_count(5), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_reading_published_but_not_persisted() {
        let (connector, mut host) = DuplexConnector::pair(256);
        let (sinks, _, particulate_log) = sinks();
        let hardware = StationHardware {
            gpio: Arc::new(MockGpio::new()),
            environment: Box::new(MockEnvironmentalSensor::default()),
            serial: Some(Box::new(connector)),
        };
        let station = AcquisitionScheduler::new(test_config(), hardware, sinks)
            .start()
            .unwrap();

        host.write_all(&encode_frame(0, 80, [0, 0])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let reading = station.state().snapshot().particulate.unwrap();
        assert_eq!(reading.pm25(), 0.0);
        assert!(particulate_log.is_empty());
        station.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_serial_failure_is_isolated() {
        let (sinks, station_log, _) = sinks();
        let hardware = StationHardware {
            gpio: Arc::new(MockGpio::new()),
            environment: Box::new(MockEnvironmentalSensor::default()),
            serial: Some(Box::new(FailingConnector::new("/dev/ttyUSB0"))),
        };
        let station = AcquisitionScheduler::new(test_config(), hardware, sinks)
            .start()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(station.task_finished(TaskKind::Particulate), Some(true));
        assert_eq!(station.task_finished(TaskKind::Logger), Some(false));
        assert_eq!(station_log.len(), 5);

        let report = station.shutdown().await;
        assert!(matches!(
            report.outcome(TaskKind::Particulate),
            Some(TaskOutcome::Failed(StationError::SerialOpen { .. }))
        ));
        assert!(report.outcome(TaskKind::Logger).unwrap().is_completed());
        assert!(matches!(
            report.into_result(),
            Err(StationError::ShutdownFailed(errors)) if errors.len() == 1
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_particulate_not_started() {
        let (sinks, _, _) = sinks();
        let mut config = test_config();
        config.particulate.enabled = false;
        let hardware = StationHardware {
            gpio: Arc::new(MockGpio::new()),
            environment: Box::new(MockEnvironmentalSensor::default()),
            serial: Some(Box::new(FailingConnector::new("/dev/ttyUSB0"))),
        };
        let station = AcquisitionScheduler::new(config, hardware, sinks)
            .start()
            .unwrap();

        assert_eq!(station.tasks().len(), 5);
        assert_eq!(station.task_finished(TaskKind::Particulate), None);
        assert!(station.shutdown().await.into_result().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vane_read_failure_keeps_last_direction() {
        let gpio = MockGpio::new();
        for (pin, level) in [(27, false), (23, true), (17, true), (22, true)] {
            gpio.set_level(pin, level);
        }
        gpio.fail_pin(17);
        let (sinks, _, _) = sinks();
        let hardware = StationHardware {
            gpio: Arc::new(gpio.clone()),
            environment: Box::new(MockEnvironmentalSensor::default()),
            serial: None,
        };
        let station = AcquisitionScheduler::new(test_config(), hardware, sinks)
            .start()
            .unwrap();
        let state = station.state();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.snapshot().direction, Direction::NotAvailable);
        assert_eq!(station.task_finished(TaskKind::WindVane), Some(false));

        gpio.restore_pin(17);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(state.snapshot().direction, Direction::North);

        // East pattern behind a failing pin: the last good direction stays published
        gpio.set_level(27, true);
        gpio.set_level(23, false);
        gpio.fail_pin(23);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(state.snapshot().direction, Direction::North);
        assert_eq!(station.task_finished(TaskKind::WindVane), Some(false));

        let report = station.shutdown().await;
        assert!(report.outcome(TaskKind::WindVane).unwrap().is_completed());
    }

    #[test]
    fn test_aborted_task_reports_task_aborted() {
        let report = ShutdownReport {
            outcomes: vec![
                (TaskKind::Anemometer, TaskOutcome::Completed),
                (TaskKind::Logger, TaskOutcome::Aborted),
            ],
        };
        match report.into_result() {
            Err(StationError::ShutdownFailed(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(&errors[0], StationError::TaskAborted(task) if task == "logger"));
            }
            other => panic!("expected ShutdownFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_refuses_to_start() {
        let (sinks, _, _) = sinks();
        let mut config = test_config();
        config.wind_vane.pins = vec![27, 23];
        let hardware = StationHardware {
            gpio: Arc::new(MockGpio::new()),
            environment: Box::new(MockEnvironmentalSensor::default()),
            serial: None,
        };
        assert!(AcquisitionScheduler::new(config, hardware, sinks)
            .start()
            .is_err());
    }
}
