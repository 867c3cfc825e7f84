//! Edge counting for the anemometer and rain gauge.
//!
//! The GPIO capability delivers edges on its own context. The only work done there is a
//! relaxed atomic increment on a shared counter; everything else (windowing, unit
//! conversion, publishing) happens on the sampler task.

use crate::hardware::capabilities::EdgeCallback;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Lock-free edge counter shared between an edge callback and its sampler.
#[derive(Debug, Clone, Default)]
pub struct PulseCounter {
    count: Arc<AtomicU64>,
}

impl PulseCounter {
    /// Counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one edge.
    pub fn record(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Callback suitable for [`GpioCapability::subscribe`](crate::hardware::capabilities::GpioCapability::subscribe).
    pub fn callback(&self) -> EdgeCallback {
        let counter = self.clone();
        Box::new(move || counter.record())
    }

    /// Edges counted so far, without resetting.
    pub fn current(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Read and reset in one atomic step.
    pub fn take(&self) -> u64 {
        self.count.swap(0, Ordering::AcqRel)
    }
}

/// Edges seen during one counting window and how long the window really lasted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseWindow {
    /// Qualifying edges in the window
    pub edges: u64,
    /// Measured wall-clock duration of the window
    pub elapsed: Duration,
}

/// Counts edges over back-to-back timed windows.
///
/// Each window starts at the previous window's closing swap, so an edge arriving while
/// the caller is busy between windows lands in the next window instead of being lost.
#[derive(Debug, Clone)]
pub struct PulseWindowCounter {
    counter: PulseCounter,
    window_start: Instant,
}

impl PulseWindowCounter {
    /// Wrap a counter whose callback is already subscribed and open the first window.
    ///
    /// Edges counted before this call are discarded.
    pub fn new(counter: PulseCounter) -> Self {
        counter.take();
        Self {
            counter,
            window_start: Instant::now(),
        }
    }

    /// Wait `duration`, then read-and-reset the counter, closing the current window.
    ///
    /// The returned window spans from the previous swap to this one, so its `elapsed`
    /// exceeds `duration` by any scheduling jitter or time spent between calls.
    /// Cancelling the future before it completes leaves the window open.
    pub async fn count_window(&mut self, duration: Duration) -> PulseWindow {
        tokio::time::sleep(duration).await;
        let edges = self.counter.take();
        let now = Instant::now();
        let elapsed = now.duration_since(self.window_start);
        self.window_start = now;
        PulseWindow { edges, elapsed }
    }
}

/// Cup anemometer geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnemometerGeometry {
    /// Distance travelled by a cup per revolution, in centimetres
    pub circumference_cm: f64,
    /// Sensor pulses per revolution
    pub pulses_per_revolution: u32,
}

impl AnemometerGeometry {
    /// Wind speed in km/h for `edges` counted over a window of `elapsed`.
    ///
    /// A zero-length window yields 0.
    pub fn wind_speed_kmh(&self, edges: u64, elapsed: Duration) -> f64 {
        let hours = elapsed.as_secs_f64() / 3600.0;
        if hours <= 0.0 || self.pulses_per_revolution == 0 {
            return 0.0;
        }
        let revolutions = edges as f64 / f64::from(self.pulses_per_revolution);
        let distance_km = revolutions * self.circumference_cm / 100_000.0;
        distance_km / hours
    }

    /// Convenience wrapper over [`wind_speed_kmh`](Self::wind_speed_kmh).
    pub fn speed_for(&self, window: PulseWindow) -> f64 {
        self.wind_speed_kmh(window.edges, window.elapsed)
    }
}

/// Running rainfall total for the process lifetime.
///
/// Stores whole tips and multiplies on read, so after N tips the total is exactly
/// `N * mm_per_tip` and only ever grows in `mm_per_tip` steps.
#[derive(Debug, Clone)]
pub struct RainAccumulator {
    tips: PulseCounter,
    mm_per_tip: f64,
}

impl RainAccumulator {
    /// Accumulator with `mm_per_tip` of rain per bucket tip
    pub fn new(mm_per_tip: f64) -> Self {
        Self {
            tips: PulseCounter::new(),
            mm_per_tip,
        }
    }

    /// Callback that records one tip per edge
    pub fn callback(&self) -> EdgeCallback {
        self.tips.callback()
    }

    /// Tips recorded since start
    pub fn tips(&self) -> u64 {
        self.tips.current()
    }

    /// Total rainfall in mm since start
    pub fn total_mm(&self) -> f64 {
        self.tips() as f64 * self.mm_per_tip
    }
}
