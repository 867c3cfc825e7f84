//! Read side of the station log.
//!
//! Loads the persisted station records as a sequence ordered by timestamp, the way a
//! dashboard or plotting tool consumes them. Rows that no longer parse (hand edits, a
//! row cut short by power loss) are skipped and counted.

use crate::data::LogRecord;
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Station log loaded into memory, oldest first.
#[derive(Debug, Clone)]
pub struct HistoricalSource {
    path: PathBuf,
    records: Vec<LogRecord>,
    skipped: usize,
}

impl HistoricalSource {
    /// Load every parseable row of the station log at `path`.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (row, result) in reader.deserialize::<LogRecord>().enumerate() {
            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(row = row + 1, error = %e, "skipping malformed station record");
                }
            }
        }

        records.sort_by_key(|record| record.timestamp);

        Ok(Self {
            path,
            records,
            skipped,
        })
    }

    /// File the records were loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, oldest first
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// The newest record
    pub fn latest(&self) -> Option<&LogRecord> {
        self.records.last()
    }

    /// Up to `n` newest records, oldest first
    pub fn last(&self, n: usize) -> &[LogRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    /// Records captured in `[from, to)`
    pub fn between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Iterator<Item = &LogRecord> {
        self.records
            .iter()
            .filter(move |record| record.timestamp >= from && record.timestamp < to)
    }

    /// Rows that failed to parse
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of loaded records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record was loaded
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::vane::Direction;
    use crate::data::storage::CsvSink;
    use crate::data::RecordSink;
    use chrono::{Duration, TimeZone};

    fn record_at(offset_secs: i64, wind: f64) -> LogRecord {
        LogRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            wind_speed_kmh: wind,
            rainfall_mm: 0.0,
            direction: Direction::NotAvailable,
            temperature_c: None,
            pressure_hpa: None,
            humidity_pct: None,
            pm10: None,
            pm25: None,
        }
    }

    #[tokio::test]
    async fn test_records_come_back_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather_data.csv");

        let mut sink = CsvSink::open(&path).unwrap();
        for (offset, wind) in [(20, 3.0), (0, 1.0), (10, 2.0)] {
            sink.append(&record_at(offset, wind)).await.unwrap();
        }

        let history = HistoricalSource::load(&path).unwrap();
        assert_eq!(history.path(), path.as_path());
        assert_eq!(history.len(), 3);
        let winds: Vec<f64> = history.records().iter().map(|r| r.wind_speed_kmh).collect();
        assert_eq!(winds, vec![1.0, 2.0, 3.0]);
        assert_eq!(history.latest().unwrap().wind_speed_kmh, 3.0);
        assert_eq!(history.last(2).len(), 2);
        assert_eq!(history.last(10).len(), 3);
        assert_eq!(history.records()[0].direction, Direction::NotAvailable);
        assert_eq!(history.records()[0].temperature_c, None);
    }

    #[tokio::test]
    async fn test_between_is_half_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather_data.csv");
        let mut sink = CsvSink::open(&path).unwrap();
        for offset in 0..5 {
            sink.append(&record_at(offset * 60, offset as f64)).await.unwrap();
        }

        let history = HistoricalSource::load(&path).unwrap();
        let from = history.records()[1].timestamp;
        let to = history.records()[3].timestamp;
        let winds: Vec<f64> = history.between(from, to).map(|r| r.wind_speed_kmh).collect();
        assert_eq!(winds, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather_data.csv");
        let mut sink = CsvSink::open(&path).unwrap();
        sink.append(&record_at(0, 1.0)).await.unwrap();
        drop(sink);

        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("not-a-timestamp,abc\n");
        std::fs::write(&path, text).unwrap();

        let history = HistoricalSource::load(&path).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.skipped(), 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HistoricalSource::load(dir.path().join("absent.csv")).is_err());
    }
}
