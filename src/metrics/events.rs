//! Typed internal events.
//!
//! Every observable moment in a run has a small struct here, and its
//! `InternalEvent` impl owns the Prometheus metric name plus a trace
//! line. Call sites go through the `emit!` macro and never touch metric
//! names directly.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// A pipeline occurrence that records itself as a metric.
pub trait InternalEvent {
    /// Record the metric (and usually a trace line) for this event.
    fn emit(self);
}

/// Event emitted when transaction records are read from the source.
pub struct RecordsRead {
    pub count: u64,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(count = self.count, "Records read");
        counter!("starling_records_read_total").increment(self.count);
    }
}

/// Event emitted when records finish enrichment.
pub struct RecordsEnriched {
    pub count: u64,
}

impl InternalEvent for RecordsEnriched {
    fn emit(self) {
        trace!(count = self.count, "Records enriched");
        counter!("starling_records_enriched_total").increment(self.count);
    }
}

/// Event emitted when malformed records are skipped.
pub struct RecordsSkipped {
    pub count: u64,
}

impl InternalEvent for RecordsSkipped {
    fn emit(self) {
        trace!(count = self.count, "Records skipped");
        counter!("starling_records_skipped_total").increment(self.count);
    }
}

/// Event emitted when records are persisted to the fact table.
pub struct RecordsWritten {
    pub count: u64,
}

impl InternalEvent for RecordsWritten {
    fn emit(self) {
        trace!(count = self.count, "Records written");
        counter!("starling_records_written_total").increment(self.count);
    }
}

/// Event emitted when a batch commits to the sink.
pub struct BatchesFlushed {
    pub count: u64,
}

impl InternalEvent for BatchesFlushed {
    fn emit(self) {
        trace!(count = self.count, "Batches flushed");
        counter!("starling_batches_flushed_total").increment(self.count);
    }
}

/// Reference dimension a transaction joins against.
#[derive(Debug, Clone, Copy)]
pub enum Dimension {
    Customer,
    Product,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Customer => "customer",
            Dimension::Product => "product",
        }
    }
}

/// Event emitted when a transaction finds no match in a dimension.
pub struct DimensionMiss {
    pub dimension: Dimension,
}

impl InternalEvent for DimensionMiss {
    fn emit(self) {
        trace!(dimension = self.dimension.as_str(), "Dimension miss");
        counter!("starling_dimension_misses_total", "dimension" => self.dimension.as_str())
            .increment(1);
    }
}

/// Event emitted when a reference partition contains duplicate keys.
pub struct DuplicateReferenceKeys {
    pub partition: String,
    pub count: u64,
}

impl InternalEvent for DuplicateReferenceKeys {
    fn emit(self) {
        trace!(
            partition = %self.partition,
            count = self.count,
            "Duplicate reference keys"
        );
        counter!("starling_duplicate_reference_keys_total", "partition" => self.partition)
            .increment(self.count);
    }
}

// ============================================================================
// Histogram events for timing
// ============================================================================

/// Event emitted when a reference partition finishes loading.
pub struct PartitionLoaded {
    pub partition: String,
    pub records: usize,
    pub duration: Duration,
}

impl InternalEvent for PartitionLoaded {
    fn emit(self) {
        trace!(
            partition = %self.partition,
            records = self.records,
            duration_ms = self.duration.as_millis(),
            "Partition loaded"
        );
        gauge!("starling_partition_records", "partition" => self.partition.clone())
            .set(self.records as f64);
        histogram!("starling_partition_load_duration_seconds", "partition" => self.partition)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a batch flush completes.
pub struct FlushCompleted {
    pub duration: Duration,
}

impl InternalEvent for FlushCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "Flush completed");
        histogram!("starling_flush_duration_seconds").record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Gauge events for backpressure
// ============================================================================

/// Gauge update for the writer's accumulation buffer.
pub struct PendingRecords {
    pub count: usize,
}

impl InternalEvent for PendingRecords {
    fn emit(self) {
        trace!(count = self.count, "Pending records");
        gauge!("starling_pending_records").set(self.count as f64);
    }
}
