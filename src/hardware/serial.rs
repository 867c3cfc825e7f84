//! Serial Port Abstractions
//!
//! Shared types and utilities for the particulate sensor's serial link.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias for anything that reads and writes like a serial port
//! - [`DynSerial`]: Type-erased boxed serial port
//! - [`TokioSerialConnector`]: [`SerialConnector`] backed by `tokio-serial`
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a serial port with spawn_blocking
//! - [`drain_serial_buffer`]: Discard stale bytes before a read attempt
//!
//! Tests and the simulator substitute `tokio::io::duplex` streams for real ports; both
//! satisfy [`SerialPortIO`].

use crate::error::{AppResult, StationError};
use crate::hardware::capabilities::SerialConnector;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Upper bound on bytes discarded by a single drain, so a chatty device cannot pin the
/// drain loop forever.
const MAX_DRAIN_BYTES: usize = 4096;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing and simulation)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port. Dropping it closes the port.
pub type DynSerial = Box<dyn SerialPortIO>;

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns [`StationError::SerialOpen`] if the port cannot be opened, or
/// [`StationError::SerialFeatureDisabled`] when built without the `serial` feature.
#[cfg(feature = "serial")]
pub async fn open_serial_async(port_path: &str, baud_rate: u32) -> AppResult<DynSerial> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    let opened = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| StationError::SerialOpen {
        port: port_path.to_string(),
        reason: format!("spawn_blocking for serial port opening failed: {e}"),
    })?;

    match opened {
        Ok(stream) => Ok(Box::new(stream)),
        Err(e) => Err(StationError::SerialOpen {
            port: port_path.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Open a serial port asynchronously (serial support disabled at build time).
#[cfg(not(feature = "serial"))]
pub async fn open_serial_async(_port_path: &str, _baud_rate: u32) -> AppResult<DynSerial> {
    Err(StationError::SerialFeatureDisabled)
}

/// Discard stale data from a serial port buffer.
///
/// Reads and throws away bytes until nothing more arrives within `window`. A zero
/// window discards only what is already buffered without waiting for more.
///
/// # Returns
///
/// Total number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, window: Duration) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + window;
    let mut total_discarded = 0usize;

    while total_discarded < MAX_DRAIN_BYTES {
        match tokio::time::timeout_at(deadline, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break, // Real I/O error, the next read reports it
            Err(_) => break,     // Nothing more within the window
        }
    }

    total_discarded
}

// =============================================================================
// Connector
// =============================================================================

/// [`SerialConnector`] for a device path, opened through `tokio-serial`.
#[derive(Debug, Clone)]
pub struct TokioSerialConnector {
    port: String,
    baud_rate: u32,
}

impl TokioSerialConnector {
    /// Create a connector for `port` at `baud_rate`; nothing is opened yet.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl SerialConnector for TokioSerialConnector {
    async fn open(&self) -> AppResult<DynSerial> {
        open_serial_async(&self.port, self.baud_rate).await
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port, self.baud_rate)
    }
}
