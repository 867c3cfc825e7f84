//! Hardware Capabilities
//!
//! The samplers never touch hardware directly. They are handed small capability traits
//! and stay agnostic of whether the other end is a Raspberry Pi, a simulator or a test
//! fixture:
//!
//! - [`GpioCapability`]: edge subscriptions (anemometer, rain gauge) and level reads
//!   (wind vane)
//! - [`EnvironmentalSensor`]: one calibrated temperature/pressure/humidity sample
//! - [`SerialConnector`]: opens the particulate sensor's byte stream
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is thread-safe (requires Send, and Sync where it is shared)
//! - Uses [`AppResult`] for errors so resource failures stay typed
//! - Focuses on ONE thing
//!
//! Resources are released by dropping: an [`EdgeSubscription`] unregisters its callback
//! on drop, and a [`DynSerial`] closes its port on drop. Every exit path of a task,
//! cancellation included, therefore gives the handle back.
//!
//! # Example
//!
//! ```rust,ignore
//! let hits = Arc::new(AtomicU64::new(0));
//! let counter = hits.clone();
//! let _subscription = gpio.subscribe(
//!     13,
//!     EdgeKind::Falling,
//!     None,
//!     Box::new(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     }),
//! )?;
//! ```

use crate::error::AppResult;
use crate::hardware::serial::DynSerial;
use crate::measurement_types::EnvironmentalReading;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Signal transition that triggers an edge callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Low to high
    Rising,
    /// High to low
    Falling,
    /// Either direction
    Both,
}

impl EdgeKind {
    /// Whether a transition to `level` qualifies under this edge kind.
    pub fn matches(self, level: bool) -> bool {
        match self {
            EdgeKind::Rising => level,
            EdgeKind::Falling => !level,
            EdgeKind::Both => true,
        }
    }
}

/// Callback invoked on every qualifying edge.
///
/// Runs on the capability's own context (an interrupt thread on real hardware). It must
/// not block; the samplers only ever pass an atomic increment.
pub type EdgeCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Live edge registration. Dropping it stops callback delivery.
#[must_use = "dropping the subscription unregisters the edge callback"]
pub struct EdgeSubscription {
    pin: u8,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl EdgeSubscription {
    /// Wrap a release action that runs when the subscription is dropped.
    pub fn new(pin: u8, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            pin,
            release: Some(Box::new(release)),
        }
    }

    /// Pin this subscription listens on
    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl fmt::Debug for EdgeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeSubscription")
            .field("pin", &self.pin)
            .finish_non_exhaustive()
    }
}

impl Drop for EdgeSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Capability: GPIO edge delivery and level reads
///
/// # Contract
/// - `subscribe` configures the pin as a pulled-up input and delivers one callback per
///   qualifying edge, honouring `debounce` when given
/// - `read_level` configures the pin as a pulled-down input on first use and returns
///   `true` for a high level
/// - Both are safe to call again after an unclean prior exit
pub trait GpioCapability: Send + Sync {
    /// Register `callback` for edges of kind `edge` on `pin`.
    fn subscribe(
        &self,
        pin: u8,
        edge: EdgeKind,
        debounce: Option<Duration>,
        callback: EdgeCallback,
    ) -> AppResult<EdgeSubscription>;

    /// Read the current level of `pin`.
    fn read_level(&self, pin: u8) -> AppResult<bool>;
}

/// Capability: calibrated environmental sample
///
/// Owned exclusively by the environmental poller, hence `&mut self`.
#[async_trait]
pub trait EnvironmentalSensor: Send {
    /// Take one temperature/pressure/humidity sample.
    async fn sample(&mut self) -> AppResult<EnvironmentalReading>;
}

/// Capability: serial byte stream for the particulate sensor
///
/// `open` is called once by the particulate task. A failure there is fatal to that task
/// alone and is not retried.
#[async_trait]
pub trait SerialConnector: Send + Sync {
    /// Open the port and hand over exclusive ownership of the stream.
    async fn open(&self) -> AppResult<DynSerial>;

    /// Human-readable port description for log output
    fn describe(&self) -> String;
}
