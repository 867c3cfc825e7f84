//! Mock Hardware Implementations
//!
//! Stand-ins for the station hardware, driven by tests and by the simulator.
//!
//! # Available Mocks
//!
//! - `MockGpio` - Pin levels and edge subscriptions, with manual edge injection
//! - `MockEnvironmentalSensor` - Settable reading with a failure switch
//! - `DuplexConnector` - Serial connector backed by an in-memory `tokio::io::duplex` pipe
//! - `FailingConnector` - Serial connector whose port never opens
//!
//! Mock edges are delivered synchronously on the caller's thread. Debounce requests
//! are accepted and ignored.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::io::DuplexStream;

use crate::error::{AppResult, StationError};
use crate::hardware::capabilities::{
    EdgeCallback, EdgeKind, EdgeSubscription, EnvironmentalSensor, GpioCapability,
    SerialConnector,
};
use crate::hardware::serial::DynSerial;
use crate::measurement_types::EnvironmentalReading;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MockGpio - Simulated GPIO header
// =============================================================================

struct Subscriber {
    id: u64,
    edge: EdgeKind,
    callback: Arc<dyn Fn() + Send + Sync>,
}

#[derive(Default)]
struct GpioState {
    levels: HashMap<u8, bool>,
    subscribers: HashMap<u8, Vec<Subscriber>>,
    failing: HashSet<u8>,
    next_id: u64,
}

/// Mock GPIO header
///
/// Unset pins read low, matching a pulled-down input. Clones share the same header.
///
/// # Example
///
/// ```rust,ignore
/// let gpio = MockGpio::new();
/// let counter = PulseCounter::new();
/// let _sub = gpio.subscribe(13, EdgeKind::Falling, None, counter.callback())?;
/// gpio.emit_edges(13, 5);
/// assert_eq!(counter.current(), 5);
/// ```
#[derive(Clone, Default)]
pub struct MockGpio {
    state: Arc<Mutex<GpioState>>,
}

impl MockGpio {
    /// Header with every pin low and no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `count` qualifying edges to every subscriber on `pin`.
    pub fn emit_edges(&self, pin: u8, count: u64) {
        let callbacks: Vec<_> = lock(&self.state)
            .subscribers
            .get(&pin)
            .map(|subs| subs.iter().map(|s| s.callback.clone()).collect())
            .unwrap_or_default();

        for _ in 0..count {
            for callback in &callbacks {
                callback();
            }
        }
    }

    /// Drive `pin` to `level`, firing subscribers whose edge kind matches the change.
    pub fn set_level(&self, pin: u8, level: bool) {
        let callbacks: Vec<_> = {
            let mut state = lock(&self.state);
            let previous = state.levels.insert(pin, level).unwrap_or(false);
            if previous == level {
                return;
            }
            state
                .subscribers
                .get(&pin)
                .map(|subs| {
                    subs.iter()
                        .filter(|s| s.edge.matches(level))
                        .map(|s| s.callback.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        for callback in callbacks {
            callback();
        }
    }

    /// Make every later request on `pin` fail.
    pub fn fail_pin(&self, pin: u8) {
        lock(&self.state).failing.insert(pin);
    }

    /// Undo [`fail_pin`](Self::fail_pin).
    pub fn restore_pin(&self, pin: u8) {
        lock(&self.state).failing.remove(&pin);
    }

    /// Live subscriptions on `pin`
    pub fn subscriber_count(&self, pin: u8) -> usize {
        lock(&self.state)
            .subscribers
            .get(&pin)
            .map_or(0, Vec::len)
    }

    fn check_pin(state: &GpioState, pin: u8) -> AppResult<()> {
        if state.failing.contains(&pin) {
            return Err(StationError::Gpio {
                pin,
                reason: "mock pin configured to fail".to_string(),
            });
        }
        Ok(())
    }
}

impl GpioCapability for MockGpio {
    fn subscribe(
        &self,
        pin: u8,
        edge: EdgeKind,
        _debounce: Option<Duration>,
        callback: EdgeCallback,
    ) -> AppResult<EdgeSubscription> {
        let mut state = lock(&self.state);
        Self::check_pin(&state, pin)?;

        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.entry(pin).or_default().push(Subscriber {
            id,
            edge,
            callback: Arc::from(callback),
        });

        let weak: Weak<Mutex<GpioState>> = Arc::downgrade(&self.state);
        Ok(EdgeSubscription::new(pin, move || {
            if let Some(state) = weak.upgrade() {
                if let Some(subs) = lock(&state).subscribers.get_mut(&pin) {
                    subs.retain(|s| s.id != id);
                }
            }
        }))
    }

    fn read_level(&self, pin: u8) -> AppResult<bool> {
        let state = lock(&self.state);
        Self::check_pin(&state, pin)?;
        Ok(state.levels.get(&pin).copied().unwrap_or(false))
    }
}

// =============================================================================
// MockEnvironmentalSensor
// =============================================================================

#[derive(Debug)]
struct SensorState {
    reading: EnvironmentalReading,
    failing: bool,
    samples: u64,
}

/// Mock BME280
///
/// Returns whatever reading was last set. Clones share state, so a test keeps a
/// [`handle`](Self::handle) after moving the sensor into a poller.
#[derive(Debug, Clone)]
pub struct MockEnvironmentalSensor {
    state: Arc<Mutex<SensorState>>,
}

impl MockEnvironmentalSensor {
    /// Sensor returning `reading`
    pub fn new(reading: EnvironmentalReading) -> Self {
        Self {
            state: Arc::new(Mutex::new(SensorState {
                reading,
                failing: false,
                samples: 0,
            })),
        }
    }

    /// Second handle on the same sensor
    pub fn handle(&self) -> Self {
        self.clone()
    }

    /// Change the reading returned by later samples.
    pub fn set_reading(&self, reading: EnvironmentalReading) {
        lock(&self.state).reading = reading;
    }

    /// Make later samples fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Sample attempts so far, failed ones included
    pub fn samples_taken(&self) -> u64 {
        lock(&self.state).samples
    }
}

impl Default for MockEnvironmentalSensor {
    fn default() -> Self {
        Self::new(EnvironmentalReading::new(20.0, 1013.25, 50.0))
    }
}

#[async_trait]
impl EnvironmentalSensor for MockEnvironmentalSensor {
    async fn sample(&mut self) -> AppResult<EnvironmentalReading> {
        let mut state = lock(&self.state);
        state.samples += 1;
        if state.failing {
            return Err(StationError::Sensor("mock sensor configured to fail".to_string()));
        }
        Ok(state.reading)
    }
}

// =============================================================================
// Serial connectors
// =============================================================================

/// Serial connector over an in-memory pipe.
///
/// The port can be opened once. [`opens`](Self::opens) counts attempts.
pub struct DuplexConnector {
    device: Mutex<Option<DuplexStream>>,
    opens: AtomicU64,
}

impl DuplexConnector {
    /// Connector plus the host end of the pipe, which plays the sensor.
    pub fn pair(buffer: usize) -> (Self, DuplexStream) {
        let (host, device) = tokio::io::duplex(buffer);
        (
            Self {
                device: Mutex::new(Some(device)),
                opens: AtomicU64::new(0),
            },
            host,
        )
    }

    /// Open attempts so far
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SerialConnector for DuplexConnector {
    async fn open(&self) -> AppResult<DynSerial> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match lock(&self.device).take() {
            Some(device) => Ok(Box::new(device)),
            None => Err(StationError::SerialOpen {
                port: self.describe(),
                reason: "port already taken".to_string(),
            }),
        }
    }

    fn describe(&self) -> String {
        "duplex pipe".to_string()
    }
}

/// Serial connector for a device that is not there.
#[derive(Debug, Clone)]
pub struct FailingConnector {
    port: String,
}

impl FailingConnector {
    /// Connector whose `open` always fails for `port`
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }
}

#[async_trait]
impl SerialConnector for FailingConnector {
    async fn open(&self) -> AppResult<DynSerial> {
        Err(StationError::SerialOpen {
            port: self.port.clone(),
            reason: "No such file or directory".to_string(),
        })
    }

    fn describe(&self) -> String {
        self.port.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::pulse::PulseCounter;

    #[test]
    fn test_mock_gpio_delivers_edges_per_pin() {
        let gpio = MockGpio::new();
        let wind = PulseCounter::new();
        let rain = PulseCounter::new();
        let _wind_sub = gpio
            .subscribe(13, EdgeKind::Falling, None, wind.callback())
            .unwrap();
        let _rain_sub = gpio
            .subscribe(5, EdgeKind::Both, None, rain.callback())
            .unwrap();

        gpio.emit_edges(13, 7);
        gpio.emit_edges(6, 3);
        assert_eq!(wind.current(), 7);
        assert_eq!(rain.current(), 0);
    }

    #[test]
    fn test_mock_gpio_level_changes_respect_edge_kind() {
        let gpio = MockGpio::new();
        let falling = PulseCounter::new();
        let both = PulseCounter::new();
        let _a = gpio
            .subscribe(13, EdgeKind::Falling, None, falling.callback())
            .unwrap();
        let _b = gpio
            .subscribe(13, EdgeKind::Both, None, both.callback())
            .unwrap();

        gpio.set_level(13, true);
        gpio.set_level(13, true); // no change, no edge
        gpio.set_level(13, false);

        assert_eq!(falling.current(), 1);
        assert_eq!(both.current(), 2);
        assert!(!gpio.read_level(13).unwrap());
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let gpio = MockGpio::new();
        let counter = PulseCounter::new();
        let sub = gpio
            .subscribe(5, EdgeKind::Both, None, counter.callback())
            .unwrap();
        assert_eq!(gpio.subscriber_count(5), 1);

        drop(sub);
        assert_eq!(gpio.subscriber_count(5), 0);
        gpio.emit_edges(5, 4);
        assert_eq!(counter.current(), 0);

        // Re-subscribing after release works
        let _again = gpio
            .subscribe(5, EdgeKind::Both, None, counter.callback())
            .unwrap();
        assert_eq!(gpio.subscriber_count(5), 1);
    }

    #[test]
    fn test_failing_pin() {
        let gpio = MockGpio::new();
        gpio.fail_pin(27);
        assert!(gpio.read_level(27).unwrap_err().is_resource_fatal());
        assert!(gpio
            .subscribe(27, EdgeKind::Rising, None, Box::new(|| {}))
            .is_err());
    }

    #[tokio::test]
    async fn test_duplex_connector_opens_once() {
        let (connector, _host) = DuplexConnector::pair(64);
        assert!(connector.open().await.is_ok());
        assert!(connector.open().await.is_err());
        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test]
    async fn test_failing_connector() {
        let connector = FailingConnector::new("/dev/ttyUSB0");
        let err = connector.open().await.err().unwrap();
        assert!(matches!(err, StationError::SerialOpen { .. }));
    }
}
