//! Run configuration.
//!
//! Loads the YAML config file, expands environment variable references
//! in it, and validates the result before the pipeline starts.

mod vars;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyFactTableSnafu, EmptyPartitionNameSnafu, EmptyReferenceDatabaseSnafu,
    EmptySinkDatabaseSnafu, EmptyTransactionPathSnafu, EnvInterpolationSnafu, ReadFileSnafu,
    YamlParseSnafu, ZeroBatchSizeSnafu, ZeroWorkersSnafu,
};

/// Top-level configuration for an enrichment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub reference: ReferenceConfig,
    pub transactions: TransactionConfig,
    pub sink: SinkConfig,
    /// Metrics endpoint settings (on by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Skip budget and dead letter queue settings.
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
}

/// Reference (dimension) data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Path to the database holding the reference partitions.
    pub database: String,

    /// Name of the customer partition (default: "customers").
    #[serde(default = "default_customer_partition")]
    pub customer_partition: String,

    /// Name of the product partition (default: "products").
    #[serde(default = "default_product_partition")]
    pub product_partition: String,
}

fn default_customer_partition() -> String {
    "customers".to_string()
}

fn default_product_partition() -> String {
    "products".to_string()
}

/// Transaction stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Path to the transaction CSV file.
    pub path: String,

    /// Compression format of the transaction file.
    #[serde(default)]
    pub compression: CompressionFormat,

    /// Whether the first line is a header row to skip (default: true).
    #[serde(default = "default_has_header")]
    pub has_header: bool,

    /// What to do with records that fail schema checks (default: skip).
    #[serde(default)]
    pub on_malformed: MalformedPolicy,

    /// Number of enrichment worker threads (default: 1, strictly ordered).
    #[serde(default = "default_enrich_workers")]
    pub enrich_workers: usize,
}

fn default_has_header() -> bool {
    true
}

fn default_enrich_workers() -> usize {
    1
}

/// Policy for records that fail transaction schema checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Log, count, optionally quarantine to the DLQ, and continue.
    #[default]
    Skip,
    /// Abort the run on the first malformed record.
    Fail,
}

/// Sink configuration for the fact table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Path to the warehouse database.
    pub database: String,

    /// Name of the fact table (default: "star_schema_transactions").
    #[serde(default = "default_fact_table")]
    pub fact_table: String,

    /// Number of enriched records per batch insert (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries per failed flush before surfacing the error (default: 0).
    #[serde(default)]
    pub flush_retries: usize,

    /// Create the fact table if it does not exist (default: true).
    #[serde(default = "default_create_table")]
    pub create_table: bool,
}

fn default_fact_table() -> String {
    "star_schema_transactions".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_create_table() -> bool {
    true
}

/// Prometheus endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to install the recorder and serve scrapes (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Bind address for the scrape endpoint (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// How far a run tolerates bad input before giving up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Abort once this many records have been skipped (0 = unlimited).
    #[serde(default)]
    pub max_skipped: usize,
    /// Directory for rejected-record files; unset disables the DLQ.
    #[serde(default)]
    pub dlq_path: Option<String>,
}

/// Compression format for the transaction source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl Config {
    /// Load configuration from a YAML file, expanding environment
    /// variable references first.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration, optionally leaving `$VAR` references verbatim.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;

        let content = if interpolate_env {
            match vars::expand(&content) {
                Ok(expanded) => expanded,
                Err(problems) => {
                    return EnvInterpolationSnafu {
                        message: problems.join("\n"),
                    }
                    .fail();
                }
            }
        } else {
            content
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.transactions.path.is_empty(), EmptyTransactionPathSnafu);
        ensure!(
            !self.reference.database.is_empty(),
            EmptyReferenceDatabaseSnafu
        );
        ensure!(
            !self.reference.customer_partition.is_empty(),
            EmptyPartitionNameSnafu { role: "customer" }
        );
        ensure!(
            !self.reference.product_partition.is_empty(),
            EmptyPartitionNameSnafu { role: "product" }
        );
        ensure!(!self.sink.database.is_empty(), EmptySinkDatabaseSnafu);
        ensure!(!self.sink.fact_table.is_empty(), EmptyFactTableSnafu);
        ensure!(self.sink.batch_size > 0, ZeroBatchSizeSnafu);
        ensure!(self.transactions.enrich_workers > 0, ZeroWorkersSnafu);
        Ok(())
    }
}
