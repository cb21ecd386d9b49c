//! starling: A standalone tool for enriching sales transactions into a
//! star-schema fact table.
//!
//! This tool streams CSV transaction records, joins in-memory customer and
//! product reference partitions loaded from SQLite, derives the TotalSales
//! measure, and batch-writes the enriched rows to the fact table.

mod config;
mod dlq;
mod enrich;
mod error;
mod metrics;
mod pipeline;
mod reference;
mod sink;
mod source;

use std::path::PathBuf;

use clap::Parser;
use snafu::prelude::*;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use pipeline::run_pipeline;

/// Sales transaction enrichment tool.
#[derive(Parser, Debug)]
#[command(name = "starling")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML file describing the transaction source, reference partitions,
    /// and fact-table sink.
    #[arg(short, long)]
    config: PathBuf,

    /// Log filter applied when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and print the resolved run plan
    /// without processing anything.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    info!("starling {} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!("Serving metrics at http://{}/metrics", config.metrics.address);
    }

    if args.dry_run {
        print_run_plan(&config);
        return Ok(());
    }

    let stats = run_pipeline(config).await?;
    info!(
        "Done: {} records enriched, {} written",
        stats.records_enriched, stats.records_written
    );

    Ok(())
}

/// Log the resolved configuration for a dry run.
fn print_run_plan(config: &Config) {
    info!("Dry run mode - validating configuration");
    info!(
        "Transactions: {} ({:?}, {} worker(s), {:?} on malformed)",
        config.transactions.path,
        config.transactions.compression,
        config.transactions.enrich_workers,
        config.transactions.on_malformed
    );
    info!(
        "Reference: {} (partitions {}, {})",
        config.reference.database,
        config.reference.customer_partition,
        config.reference.product_partition
    );
    info!(
        "Sink: {} table {} (batch size {})",
        config.sink.database, config.sink.fact_table, config.sink.batch_size
    );
    match config.error_handling.max_skipped {
        0 => info!("Skip budget: unlimited"),
        budget => info!("Skip budget: {budget}"),
    }
    info!("Configuration is valid");
}
