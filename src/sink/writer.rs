//! Batch accumulation in front of a fact sink.
//!
//! The writer owns its buffer: records accumulate until the configured
//! batch size, then flush as one sink write. A failed flush hands the
//! whole batch back inside the error; batches already flushed stay
//! persisted.

use snafu::IntoError;
use std::time::Instant;
use tracing::{debug, warn};

use super::FactSink;
use crate::emit;
use crate::enrich::EnrichedTransaction;
use crate::error::{WriteError, WriteFailureSnafu};
use crate::metrics::events::{BatchesFlushed, FlushCompleted, PendingRecords, RecordsWritten};

/// Counters for a completed writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterStats {
    pub records_written: usize,
    pub batches_flushed: usize,
}

/// Accumulates enriched transactions and flushes them to a [`FactSink`]
/// in fixed-size batches.
pub struct BatchWriter<S> {
    sink: S,
    buffer: Vec<EnrichedTransaction>,
    batch_size: usize,
    flush_retries: usize,
    records_written: usize,
    batches_flushed: usize,
}

impl<S: FactSink> BatchWriter<S> {
    pub fn new(sink: S, batch_size: usize, flush_retries: usize) -> Self {
        Self {
            sink,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            flush_retries,
            records_written: 0,
            batches_flushed: 0,
        }
    }

    /// Append one record, flushing when the buffer reaches the batch
    /// size. The flush happens on the add that fills the batch, never
    /// later.
    pub fn add(&mut self, record: EnrichedTransaction) -> Result<(), WriteError> {
        self.buffer.push(record);
        emit!(PendingRecords {
            count: self.buffer.len(),
        });
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush whatever is buffered. An empty buffer is a no-op and does
    /// not count as a batch.
    pub fn flush(&mut self) -> Result<(), WriteError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let records = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        emit!(PendingRecords { count: 0 });

        let start = Instant::now();
        let mut attempt = 0;
        loop {
            match self.sink.write_batch(&records) {
                Ok(()) => break,
                Err(error) if attempt < self.flush_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        retries = self.flush_retries,
                        error = %error,
                        "Batch write failed, retrying"
                    );
                }
                Err(error) => return Err(WriteFailureSnafu { records }.into_error(error)),
            }
        }

        let count = records.len();
        self.records_written += count;
        self.batches_flushed += 1;
        emit!(RecordsWritten {
            count: count as u64,
        });
        emit!(BatchesFlushed { count: 1 });
        emit!(FlushCompleted {
            duration: start.elapsed(),
        });
        debug!(records = count, batch = self.batches_flushed, "Flushed batch");
        Ok(())
    }

    /// Records currently buffered and not yet persisted.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn batches_flushed(&self) -> usize {
        self.batches_flushed
    }

    /// Flush the tail batch and return the final counters.
    pub fn finish(mut self) -> Result<WriterStats, WriteError> {
        self.flush()?;
        Ok(WriterStats {
            records_written: self.records_written,
            batches_flushed: self.batches_flushed,
        })
    }
}
