//! Record types and persistence sinks.
//!
//! The acquisition tasks only know the [`RecordSink`] trait. [`storage::CsvSink`] is the
//! production implementation; [`MemorySink`] keeps records in memory for tests and
//! embedding.

pub mod history;
pub mod records;
pub mod storage;

use crate::error::AppResult;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

pub use records::{LogRecord, ParticulateRecord};

/// Append-only destination for records of type `R`.
///
/// Implementations never rewrite or truncate what was already appended.
#[async_trait]
pub trait RecordSink<R: Sync>: Send {
    /// Append one record.
    async fn append(&mut self, record: &R) -> AppResult<()>;

    /// Push buffered records to durable storage.
    async fn flush(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// In-memory sink; clones share the same record list.
#[derive(Debug)]
pub struct MemorySink<R> {
    records: Arc<Mutex<Vec<R>>>,
}

impl<R> Clone for MemorySink<R> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
        }
    }
}

impl<R> Default for MemorySink<R> {
    fn default() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<R: Clone> MemorySink<R> {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything appended so far
    pub fn records(&self) -> Vec<R> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records appended so far
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing was appended yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> RecordSink<R> for MemorySink<R> {
    async fn append(&mut self, record: &R) -> AppResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
