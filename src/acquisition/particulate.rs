//! SDS018 particulate sensor protocol.
//!
//! The sensor streams undelimited 10-byte frames at roughly 1 Hz:
//!
//! ```text
//! byte  0     1     2      3      4     5     6    7    8         9
//!       0xAA  0xC0  PM2.5  PM2.5  PM10  PM10  ID   ID   checksum  0xAB
//!                   low    high   low   high
//! ```
//!
//! The checksum is the wrapping sum of bytes 2 to 7. The tail byte is not checked.
//! Concentrations are little-endian tenths of µg/m³.
//!
//! [`ParticulateFrameReader`] resynchronizes on the header, reads the rest of the frame
//! as one block and verifies it, all under a single per-attempt deadline.
//! [`ParticulateSampler`] is the long-running task around it.

use crate::acquisition::shutdown::ShutdownSignal;
use crate::acquisition::state::{FieldUpdate, StateAggregator};
use crate::config::ParticulateConfig;
use crate::data::{ParticulateRecord, RecordSink};
use crate::error::{AppResult, FrameError};
use crate::hardware::capabilities::SerialConnector;
use crate::hardware::serial::drain_serial_buffer;
use crate::measurement_types::ParticulateReading;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// First header byte
pub const SYNC1: u8 = 0xAA;
/// Second header byte (measurement reply)
pub const SYNC2: u8 = 0xC0;
/// Tail byte
pub const TAIL: u8 = 0xAB;
/// Length of a whole frame including header and tail
pub const FRAME_LEN: usize = 10;

/// Wrapping byte sum used by the frame checksum.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Verify and decode one complete frame.
///
/// `frame[0..2]` is assumed to be the header already matched by the reader.
pub fn decode_frame(
    frame: &[u8; FRAME_LEN],
    timestamp: DateTime<Utc>,
) -> Result<ParticulateReading, FrameError> {
    let calculated = checksum(&frame[2..8]);
    let received = frame[8];
    if calculated != received {
        return Err(FrameError::Checksum {
            received,
            calculated,
        });
    }

    let pm25 = f64::from(u16::from_le_bytes([frame[2], frame[3]])) / 10.0;
    let pm10 = f64::from(u16::from_le_bytes([frame[4], frame[5]])) / 10.0;
    Ok(ParticulateReading::from_validated(timestamp, pm10, pm25))
}

/// Build a well-formed frame from raw tenth-µg/m³ values.
///
/// Used by the simulator and by tests.
pub fn encode_frame(pm25_raw: u16, pm10_raw: u16, device_id: [u8; 2]) -> [u8; FRAME_LEN] {
    let [pm25_lo, pm25_hi] = pm25_raw.to_le_bytes();
    let [pm10_lo, pm10_hi] = pm10_raw.to_le_bytes();
    let mut frame = [
        SYNC1,
        SYNC2,
        pm25_lo,
        pm25_hi,
        pm10_lo,
        pm10_hi,
        device_id[0],
        device_id[1],
        0,
        TAIL,
    ];
    frame[8] = checksum(&frame[2..8]);
    frame
}

/// Per-attempt reader settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReaderConfig {
    /// Deadline for one attempt, measured from its start
    pub read_timeout: Duration,
    /// Discard already-buffered bytes before each attempt
    pub flush_before_read: bool,
}

impl Default for FrameReaderConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            flush_before_read: true,
        }
    }
}

impl From<&ParticulateConfig> for FrameReaderConfig {
    fn from(config: &ParticulateConfig) -> Self {
        Self {
            read_timeout: config.read_timeout,
            flush_before_read: config.flush_before_read,
        }
    }
}

/// Counters kept across read attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Frames that passed the checksum
    pub frames: u64,
    /// Frames rejected by the checksum
    pub checksum_failures: u64,
    /// Attempts that hit the deadline
    pub timeouts: u64,
    /// Bytes thrown away by flushing or resynchronization
    pub bytes_discarded: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    SeekingHeader,
    SeekingHeader2,
    ReadingPayload,
}

/// Frame reader over any async byte stream.
///
/// Owns the stream; dropping the reader closes it.
#[derive(Debug)]
pub struct ParticulateFrameReader<S> {
    port: S,
    config: FrameReaderConfig,
    stats: ReaderStats,
}

impl<S: AsyncRead + Unpin> ParticulateFrameReader<S> {
    /// Wrap an open stream
    pub fn new(port: S, config: FrameReaderConfig) -> Self {
        Self {
            port,
            config,
            stats: ReaderStats::default(),
        }
    }

    /// One read attempt.
    ///
    /// # Errors
    ///
    /// - [`FrameError::NoData`] if no complete frame arrived before the deadline
    /// - [`FrameError::Checksum`] if a complete frame failed verification
    /// - [`FrameError::Io`] if the stream failed or reached end of file
    pub async fn read(&mut self) -> Result<ParticulateReading, FrameError> {
        let deadline = Instant::now() + self.config.read_timeout;

        if self.config.flush_before_read {
            let flushed = drain_serial_buffer(&mut self.port, Duration::ZERO).await;
            if flushed > 0 {
                debug!(bytes = flushed, "flushed stale serial input");
                self.stats.bytes_discarded += flushed as u64;
            }
        }

        let assembled = tokio::time::timeout_at(
            deadline,
            assemble_frame(&mut self.port, &mut self.stats.bytes_discarded),
        )
        .await;

        let frame = match assembled {
            Ok(frame) => frame?,
            Err(_) => {
                self.stats.timeouts += 1;
                return Err(FrameError::NoData(self.config.read_timeout));
            }
        };

        match decode_frame(&frame, Utc::now()) {
            Ok(reading) => {
                self.stats.frames += 1;
                Ok(reading)
            }
            Err(e) => {
                self.stats.checksum_failures += 1;
                Err(e)
            }
        }
    }

    /// Counters so far
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Give the stream back
    pub fn into_inner(self) -> S {
        self.port
    }
}

/// Scan for the header and read the rest of one frame.
async fn assemble_frame<S: AsyncRead + Unpin>(
    port: &mut S,
    discarded: &mut u64,
) -> std::io::Result<[u8; FRAME_LEN]> {
    let mut frame = [0u8; FRAME_LEN];
    let mut state = SyncState::SeekingHeader;

    loop {
        state = match state {
            SyncState::SeekingHeader => {
                if port.read_u8().await? == SYNC1 {
                    SyncState::SeekingHeader2
                } else {
                    *discarded += 1;
                    SyncState::SeekingHeader
                }
            }
            SyncState::SeekingHeader2 => {
                // A mismatch drops both bytes and starts over, even if the second
                // byte was itself SYNC1.
                if port.read_u8().await? == SYNC2 {
                    SyncState::ReadingPayload
                } else {
                    *discarded += 2;
                    SyncState::SeekingHeader
                }
            }
            SyncState::ReadingPayload => {
                frame[0] = SYNC1;
                frame[1] = SYNC2;
                port.read_exact(&mut frame[2..]).await?;
                return Ok(frame);
            }
        };
    }
}

/// Long-running particulate acquisition task.
pub struct ParticulateSampler {
    reader_config: FrameReaderConfig,
    read_interval: Duration,
    state: Arc<StateAggregator>,
    sink: Box<dyn RecordSink<ParticulateRecord>>,
}

impl ParticulateSampler {
    /// Sampler publishing into `state` and persisting plausible readings to `sink`.
    pub fn new(
        config: &ParticulateConfig,
        state: Arc<StateAggregator>,
        sink: Box<dyn RecordSink<ParticulateRecord>>,
    ) -> Self {
        Self {
            reader_config: FrameReaderConfig::from(config),
            read_interval: config.read_interval,
            state,
            sink,
        }
    }

    /// Open the port through `connector` and read until shutdown.
    ///
    /// The port is owned by this future and is closed on every exit path, including
    /// the future being dropped.
    ///
    /// # Errors
    ///
    /// Fails if the port cannot be opened or breaks while open. Neither is retried.
    pub async fn run(
        mut self,
        connector: &dyn SerialConnector,
        mut shutdown: ShutdownSignal,
    ) -> AppResult<ReaderStats> {
        let port_name = connector.describe();
        let port = tokio::select! {
            _ = shutdown.cancelled() => return Ok(ReaderStats::default()),
            opened = connector.open() => opened?,
        };
        info!(port = %port_name, "particulate sensor port opened");

        let mut reader = ParticulateFrameReader::new(port, self.reader_config);
        let result = self.read_loop(&mut reader, &mut shutdown).await;
        let stats = reader.stats();
        drop(reader);
        info!(
            port = %port_name,
            frames = stats.frames,
            checksum_failures = stats.checksum_failures,
            timeouts = stats.timeouts,
            "particulate sensor port released"
        );

        if let Err(e) = self.sink.flush().await {
            warn!(error = %e, "failed to flush particulate log");
        }

        result.map(|()| stats)
    }

    async fn read_loop<S: AsyncRead + Unpin>(
        &mut self,
        reader: &mut ParticulateFrameReader<S>,
        shutdown: &mut ShutdownSignal,
    ) -> AppResult<()> {
        loop {
            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                attempt = reader.read() => attempt,
            };

            match attempt {
                Ok(reading) => {
                    self.handle_reading(reading).await;
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.read_interval) => {}
                    }
                }
                Err(e @ FrameError::Checksum { .. }) => warn!(error = %e, "discarding frame"),
                Err(e @ FrameError::NoData(_)) => debug!(error = %e, "no particulate frame"),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn handle_reading(&mut self, reading: ParticulateReading) {
        self.state.publish(FieldUpdate::Particulate(reading));

        if !reading.is_plausible() {
            warn!(
                pm10 = reading.pm10(),
                pm25 = reading.pm25(),
                "Invalid reading. Skipping save."
            );
            return;
        }

        debug!(pm10 = reading.pm10(), pm25 = reading.pm25(), "particulate reading");
        if let Err(e) = self.sink.append(&ParticulateRecord::from(&reading)).await {
            warn!(error = %e, "failed to persist particulate reading");
        }
    }
}
