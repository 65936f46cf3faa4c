// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Per-task-attempt writer of compressed, newline-delimited JSON staging blobs
//!
//! One writer owns exactly one blob, named after its task attempt, so writers
//! running concurrently never coordinate. Records are encoded into a local
//! buffer; every `flush_interval` records the buffer is handed to the blob's
//! upload, which bounds both memory use and the data lost if the task dies.
//! The blob only becomes visible once [`StagedRecordWriter::close`] succeeds.

use crate::error::{ClientError, ExportError};
use crate::storage::{BlobSink, StorageClient};
use crate::target::{Compression, StagingArea, StagingLocation, TaskAttemptId};
use bytes::Bytes;
use diagnostics::*;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;

pub const DEFAULT_FLUSH_INTERVAL: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    pub flush_interval: usize,
    pub compression: Compression,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            compression: Compression::Gzip,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub records: u64,
    pub flushes: u64,
    pub bytes_uploaded: u64,
}

enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Plain(Vec<u8>),
}

impl Encoder {
    fn new(compression: Compression) -> Self {
        match compression {
            Compression::Gzip => Encoder::Gzip(GzEncoder::new(Vec::new(), flate2::Compression::default())),
            Compression::None => Encoder::Plain(Vec::new()),
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Encoder::Gzip(gz) => gz,
            Encoder::Plain(buf) => buf,
        }
    }

    /// Everything encoded so far, leaving the stream open.
    fn drain(&mut self) -> std::io::Result<Vec<u8>> {
        match self {
            Encoder::Gzip(gz) => {
                gz.flush()?;
                Ok(std::mem::take(gz.get_mut()))
            }
            Encoder::Plain(buf) => Ok(std::mem::take(buf)),
        }
    }

    /// The remaining bytes, including the gzip trailer.
    fn finish(self) -> std::io::Result<Vec<u8>> {
        match self {
            Encoder::Gzip(gz) => gz.finish(),
            Encoder::Plain(buf) => Ok(buf),
        }
    }
}

pub struct StagedRecordWriter {
    location: StagingLocation,
    sink: Option<Box<dyn BlobSink>>,
    encoder: Option<Encoder>,
    flush_interval: usize,
    since_flush: usize,
    stats: WriterStats,
}

impl StagedRecordWriter {
    /// Open the blob for `attempt` under `staging`.
    pub async fn create(
        storage: &dyn StorageClient,
        staging: &StagingArea,
        attempt: &TaskAttemptId,
        options: WriterOptions,
    ) -> Result<Self, ExportError> {
        let location = staging.location_for(attempt, options.compression);
        let sink = storage
            .open_blob(&location)
            .await
            .map_err(|source| ExportError::WriterIo {
                location: location.uri(),
                source,
            })?;

        let uri = location.uri();
        debug!("opened staging blob {uri}");

        Ok(Self {
            location,
            sink: Some(sink),
            encoder: Some(Encoder::new(options.compression)),
            flush_interval: options.flush_interval.max(1),
            since_flush: 0,
            stats: WriterStats::default(),
        })
    }

    #[must_use]
    pub fn location(&self) -> &StagingLocation {
        &self.location
    }

    #[must_use]
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    fn io_error(&self, source: impl Into<ClientError>) -> ExportError {
        ExportError::WriterIo {
            location: self.location.uri(),
            source: source.into(),
        }
    }

    fn encoder(&mut self) -> Result<&mut Encoder, ExportError> {
        let location = self.location.uri();
        self.encoder.as_mut().ok_or_else(|| ExportError::WriterIo {
            location,
            source: ClientError::Other("writer already closed".to_string()),
        })
    }

    /// Serialize `record` as one line of the blob.
    ///
    /// A record that fails to serialize leaves the blob untouched.
    pub async fn write<T: Serialize + ?Sized>(&mut self, record: &T) -> Result<(), ExportError> {
        let mut line = serde_json::to_vec(record).map_err(|e| ExportError::InvalidRecord {
            location: self.location.uri(),
            message: e.to_string(),
        })?;
        line.push(b'\n');
        let written = self.encoder()?.writer().write_all(&line);
        written.map_err(|e| self.io_error(e))?;

        self.stats.records += 1;
        self.since_flush += 1;
        if self.since_flush >= self.flush_interval {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write one pre-rendered JSON document, normalised to a single line.
    pub async fn write_json_line(&mut self, line: &str) -> Result<(), ExportError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| ExportError::InvalidRecord {
                location: self.location.uri(),
                message: e.to_string(),
            })?;
        self.write(&value).await
    }

    /// Push everything buffered so far to the blob's upload.
    pub async fn flush(&mut self) -> Result<(), ExportError> {
        let bytes = self.encoder()?.drain().map_err(|e| self.io_error(e))?;
        self.since_flush = 0;
        if bytes.is_empty() {
            return Ok(());
        }
        self.upload(bytes).await?;
        self.stats.flushes += 1;

        let uri = self.location.uri();
        let records = self.stats.records;
        debug!("flushed {uri} at {records} records");
        Ok(())
    }

    async fn upload(&mut self, bytes: Vec<u8>) -> Result<(), ExportError> {
        let len = bytes.len() as u64;
        let location = self.location.uri();
        let sink = self.sink.as_mut().ok_or_else(|| ExportError::WriterIo {
            location: location.clone(),
            source: ClientError::Other("writer already closed".to_string()),
        })?;
        sink.append(Bytes::from(bytes))
            .await
            .map_err(|source| ExportError::WriterIo { location, source })?;
        self.stats.bytes_uploaded += len;
        Ok(())
    }

    /// Flush the remaining buffer and publish the blob.
    ///
    /// Must be called from the task-completion hook; an unclosed writer
    /// publishes nothing. A failed close aborts the upload.
    pub async fn close(mut self) -> Result<WriterStats, ExportError> {
        if let Err(e) = self.publish().await {
            if let Some(sink) = self.sink.take() {
                if let Err(abort_error) = sink.abort().await {
                    let error_msg = abort_error.to_string();
                    warn!("abort after failed close: {error_msg}");
                }
            }
            return Err(e);
        }

        let uri = self.location.uri();
        let records = self.stats.records;
        let bytes = self.stats.bytes_uploaded;
        info!("closed staging blob {uri}: {records} records, {bytes} bytes");
        Ok(self.stats)
    }

    async fn publish(&mut self) -> Result<(), ExportError> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| self.io_error(ClientError::Other("writer already closed".to_string())))?;
        let tail = encoder.finish().map_err(|e| self.io_error(e))?;
        if !tail.is_empty() {
            self.upload(tail).await?;
            self.stats.flushes += 1;
        }

        let sink = self
            .sink
            .take()
            .ok_or_else(|| self.io_error(ClientError::Other("writer already closed".to_string())))?;
        sink.finish().await.map_err(|e| self.io_error(e))
    }

    /// Discard the upload after a failed task attempt.
    pub async fn abort(mut self) -> Result<(), ExportError> {
        self.encoder = None;
        match self.sink.take() {
            Some(sink) => sink.abort().await.map_err(|e| self.io_error(e)),
            None => Ok(()),
        }
    }
}

impl Drop for StagedRecordWriter {
    fn drop(&mut self) {
        if self.sink.is_some() {
            let uri = self.location.uri();
            let records = self.stats.records;
            warn!("staging writer for {uri} dropped without close, {records} records not published");
        }
    }
}
