//! Error types for starling using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;

use crate::enrich::EnrichedTransaction;

// ============ Reference Errors ============

/// Errors that can occur while loading reference partitions.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReferenceError {
    /// Reference database could not be opened.
    #[snafu(display("Reference source unavailable: {path}"))]
    Unavailable {
        path: String,
        source: rusqlite::Error,
    },

    /// Query against a reference partition failed.
    #[snafu(display("Failed to query reference partition '{partition}'"))]
    PartitionQuery {
        partition: String,
        source: rusqlite::Error,
    },

    /// A required column is absent from the partition.
    #[snafu(display("Reference partition '{partition}' is missing required column '{column}'"))]
    SchemaMismatch { partition: String, column: String },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Transaction source path is empty.
    #[snafu(display("Transaction source path cannot be empty"))]
    EmptyTransactionPath,

    /// Reference database path is empty.
    #[snafu(display("Reference database path cannot be empty"))]
    EmptyReferenceDatabase,

    /// A reference partition name is empty.
    #[snafu(display("Reference partition name for {role} data cannot be empty"))]
    EmptyPartitionName { role: String },

    /// Sink database path is empty.
    #[snafu(display("Sink database path cannot be empty"))]
    EmptySinkDatabase,

    /// Fact table name is empty.
    #[snafu(display("Fact table name cannot be empty"))]
    EmptyFactTable,

    /// Batch size of zero would never flush.
    #[snafu(display("Batch size must be at least 1"))]
    ZeroBatchSize,

    /// Worker count of zero would never process anything.
    #[snafu(display("enrich_workers must be at least 1"))]
    ZeroWorkers,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Stream Errors ============

/// Errors that can occur while reading the transaction stream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StreamError {
    /// Transaction source file could not be opened.
    #[snafu(display("Transaction source unavailable: {path}"))]
    OpenSource {
        path: String,
        source: std::io::Error,
    },

    /// Zstd decoder creation failed.
    #[snafu(display("Zstd decompression failed for {path}"))]
    ZstdDecoder {
        path: String,
        source: std::io::Error,
    },

    /// A record does not conform to the transaction schema.
    #[snafu(display("Malformed transaction record at line {line}: {reason}"))]
    MalformedRecord { line: u64, reason: String },

    /// Underlying read failure (I/O or stream corruption).
    #[snafu(display("Failed to read transaction stream {path}"))]
    Read { path: String, source: csv::Error },
}

// ============ Enrichment Errors ============

/// Errors that can occur while deriving enriched fields.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EnrichError {
    /// A numeric operand of TotalSales failed to parse.
    #[snafu(display(
        "Cannot derive TotalSales for order {order_id}: {field} value '{value}' is not numeric"
    ))]
    NumericParse {
        order_id: String,
        field: String,
        value: String,
        source: std::num::ParseFloatError,
    },
}

// ============ Sink Errors ============

/// Errors that can occur in the fact-table backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Sink database could not be opened.
    #[snafu(display("Sink database unavailable: {path}"))]
    OpenSink {
        path: String,
        source: rusqlite::Error,
    },

    /// Fact table creation failed.
    #[snafu(display("Failed to create fact table '{table}'"))]
    CreateTable {
        table: String,
        source: rusqlite::Error,
    },

    /// Could not start a sink transaction.
    #[snafu(display("Failed to begin sink transaction"))]
    BeginTransaction { source: rusqlite::Error },

    /// Row insert failed inside a batch transaction.
    #[snafu(display("Failed to insert into fact table '{table}'"))]
    Insert {
        table: String,
        source: rusqlite::Error,
    },

    /// Batch commit failed; no rows from the batch were persisted.
    #[snafu(display("Failed to commit batch to fact table"))]
    Commit { source: rusqlite::Error },
}

// ============ Write Errors ============

/// Errors raised by the batch writer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// A batch flush failed. The unpersisted records ride along so the
    /// caller can log or retry them; earlier batches are unaffected.
    #[snafu(display("Failed to persist batch of {} enriched records", records.len()))]
    WriteFailure {
        records: Vec<EnrichedTransaction>,
        source: SinkError,
    },
}

impl WriteError {
    /// The records that were not persisted.
    pub fn failed_records(&self) -> &[EnrichedTransaction] {
        match self {
            WriteError::WriteFailure { records, .. } => records,
        }
    }
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ DLQ Errors ============

/// Errors that can occur while writing the dead letter queue.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix is intentional to avoid snafu selector conflicts (e.g., WriteSnafu)
#[allow(clippy::enum_variant_names)]
pub enum DlqError {
    /// Failed to open the DLQ file.
    #[snafu(display("Failed to open DLQ file {path}"))]
    DlqOpen {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize a rejected record.
    #[snafu(display("Failed to serialize DLQ record"))]
    DlqSerialize { source: serde_json::Error },

    /// Failed to write to the DLQ file.
    #[snafu(display("Failed to write to DLQ"))]
    DlqWrite { source: std::io::Error },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Reference loading error.
    #[snafu(display("Reference error"))]
    Reference { source: ReferenceError },

    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Transaction stream error.
    #[snafu(display("Stream error"))]
    Stream { source: StreamError },

    /// Enrichment error.
    #[snafu(display("Enrichment error"))]
    Enrich { source: EnrichError },

    /// Sink backend error.
    #[snafu(display("Sink error"))]
    Sink { source: SinkError },

    /// Batch write error.
    #[snafu(display("Write error"))]
    Write { source: WriteError },

    /// Task join error.
    #[snafu(display("Task join error"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// DLQ error.
    #[snafu(display("DLQ error"))]
    Dlq { source: DlqError },

    /// Skip limit exceeded.
    #[snafu(display("Max skipped records exceeded: {count} records skipped"))]
    MaxSkippedExceeded { count: usize },

    /// A pipeline worker thread panicked.
    #[snafu(display("Pipeline worker thread panicked"))]
    WorkerPanic,
}
