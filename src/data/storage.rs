//! CSV record sink.
//!
//! The header row is written only when the file is new or empty; after that the file is
//! only ever appended to, so restarting the station continues the same log.

use crate::data::RecordSink;
use crate::error::AppResult;
use async_trait::async_trait;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Append-only CSV writer for records of type `R`.
pub struct CsvSink<R> {
    path: PathBuf,
    writer: csv::Writer<File>,
    _record: PhantomData<fn(&R)>,
}

impl<R> CsvSink<R> {
    /// Open (or create) `path` for appending.
    ///
    /// Missing parent directories are created.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let needs_header = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);

        tracing::info!(
            path = %path.display(),
            new_file = needs_header,
            "CSV sink ready"
        );

        Ok(Self {
            path,
            writer,
            _record: PhantomData,
        })
    }

    /// File this sink appends to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<R: Serialize + Sync> RecordSink<R> for CsvSink<R> {
    async fn append(&mut self, record: &R) -> AppResult<()> {
        self.writer.serialize(record)?;
        // One row per tick; keep the file current for readers tailing it.
        self.writer.flush()?;
        Ok(())
    }

    async fn flush(&mut self) -> AppResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}
